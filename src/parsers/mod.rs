pub mod clover;

use std::io::BufRead;

use quick_xml::events::BytesStart;
use quick_xml::Reader;

use crate::error::ClovrError;

/// Streaming XML reader with whitespace-only text skipped.
pub(crate) fn xml_reader<R: BufRead>(input: R) -> Reader<R> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    reader
}

/// Attach the reader's byte offset to an XML error.
pub(crate) fn xml_err<R>(source: quick_xml::Error, reader: &Reader<R>) -> ClovrError {
    ClovrError::Xml {
        source,
        position: reader.buffer_position(),
    }
}

/// Unescaped value of attribute `name`, if present and well-formed.
pub(crate) fn get_attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

/// Counters are tolerant: anything that is not a non-negative integer reads
/// as 0.
pub(crate) fn parse_count(value: &str) -> u64 {
    value.trim().parse().unwrap_or(0)
}

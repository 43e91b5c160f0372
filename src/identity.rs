//! Report identities: tell several reports on one build apart.
//!
//! The first report on a build keeps the empty identity, so a single-report
//! build keeps the bare `clover` / `clover.xml` names. Every further report
//! gets a distinct identity, explicit or generated.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use uuid::Uuid;

use crate::error::{ClovrError, Result};
use crate::history::BuildId;

/// Length of a generated identity.
pub const GENERATED_LEN: usize = 8;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static IDENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReportIdentity(Arc<str>);

impl ReportIdentity {
    /// The empty identity of a build's first report.
    pub fn legacy() -> Self {
        ReportIdentity(Arc::from(""))
    }

    /// An explicit identity. It becomes part of URLs and file names, so only
    /// letters, digits, `.`, `_` and `-` are allowed, and it cannot start
    /// with punctuation. The empty string is the legacy identity.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::legacy());
        }
        if !IDENTITY_RE.is_match(value) {
            return Err(ClovrError::InvalidIdentity(value.to_string()));
        }
        Ok(ReportIdentity(Arc::from(value)))
    }

    /// A fresh random identity: 8 base-36 characters.
    pub fn generate() -> Self {
        let mut n = Uuid::new_v4().as_u128();
        let mut token = [b'0'; GENERATED_LEN];
        for slot in token.iter_mut().rev() {
            *slot = BASE36[(n % 36) as usize];
            n /= 36;
        }
        // BASE36 is ASCII, so the token is valid UTF-8.
        ReportIdentity(Arc::from(String::from_utf8_lossy(&token).as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_legacy(&self) -> bool {
        self.0.is_empty()
    }

    /// `clover` for the legacy identity, `clover-<id>` otherwise.
    pub fn url_name(&self) -> String {
        if self.is_legacy() {
            "clover".to_string()
        } else {
            format!("clover-{}", self.0)
        }
    }

    /// `clover.xml` for the legacy identity, `clover-<id>.xml` otherwise.
    pub fn xml_file_name(&self) -> String {
        format!("{}.xml", self.url_name())
    }

    /// Human label: `Clover Coverage Report` or `Clover Coverage Report (<id>)`.
    pub fn display_name(&self) -> String {
        if self.is_legacy() {
            "Clover Coverage Report".to_string()
        } else {
            format!("Clover Coverage Report ({})", self.0)
        }
    }
}

impl Default for ReportIdentity {
    fn default() -> Self {
        Self::legacy()
    }
}

impl fmt::Display for ReportIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReportIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Next free identity on a build that already carries `existing`.
///
/// A build with no reports gets the legacy identity. Otherwise a generated
/// identity is drawn until it collides with nothing in `existing`.
pub fn next_identity<'a, I>(existing: I) -> ReportIdentity
where
    I: IntoIterator<Item = &'a ReportIdentity>,
{
    let taken: HashSet<&str> = existing.into_iter().map(ReportIdentity::as_str).collect();
    if taken.is_empty() {
        return ReportIdentity::legacy();
    }
    loop {
        let candidate = ReportIdentity::generate();
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
    }
}

/// Identity for a new report on `build`: the requested one if it is valid
/// and unused, a fresh one when nothing was requested.
pub fn resolve_identity(
    build: BuildId,
    requested: Option<&str>,
    existing: &[ReportIdentity],
) -> Result<ReportIdentity> {
    match requested.filter(|r| !r.is_empty()) {
        Some(value) => {
            let identity = ReportIdentity::parse(value)?;
            if existing.contains(&identity) {
                return Err(ClovrError::DuplicateIdentity {
                    build: build.0,
                    identity: identity.to_string(),
                });
            }
            Ok(identity)
        }
        None => Ok(next_identity(existing)),
    }
}

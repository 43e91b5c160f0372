//! `x/y` coverage ratios and the percentage rules coverage displays depend on.
//!
//! The rounding is deliberately asymmetric: the covered percentage is
//! truncated (99.99% shows as 99.9%, never 100%) while the uncovered
//! percentage is rounded up (0.01% uncovered shows as 0.1%, never 0%).

use std::fmt;
use std::hash::{Hash, Hasher};

/// Values this close to a tenth are treated as sitting exactly on it, so
/// binary noise such as `9.999999999999` does not round the wrong way.
const TENTHS_EPSILON: f64 = 1e-9;

/// Represents `x/y` where x is the numerator and y the denominator.
#[derive(Debug, Clone, Copy)]
pub struct Ratio {
    numerator: f64,
    denominator: f64,
}

impl Ratio {
    /// Create a ratio. Any pair is accepted, including `0/0` and
    /// `covered > total`.
    #[must_use]
    pub fn create(numerator: f64, denominator: f64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    #[must_use]
    pub fn numerator(&self) -> f64 {
        self.numerator
    }

    #[must_use]
    pub fn denominator(&self) -> f64 {
        self.denominator
    }

    /// Percentage as a float.
    ///
    /// `n >= d` (including `0/0`, "nothing to cover") is 100%. Any other
    /// ratio with a non-positive denominator is 0%.
    #[must_use]
    pub fn percentage_float(&self) -> f64 {
        if self.numerator >= self.denominator {
            return 100.0;
        }
        if self.denominator <= 0.0 {
            return 0.0;
        }
        100.0 * self.numerator / self.denominator
    }

    /// Integer percentage, truncated toward zero: 99.9% is 99.
    #[must_use]
    pub fn percentage(&self) -> i32 {
        self.percentage_float() as i32
    }

    /// Covered percentage with at most one decimal, rounded down, e.g.
    /// `"99.9%"`. `"-"` when there is nothing to measure.
    #[must_use]
    pub fn percentage_string(&self) -> String {
        if self.has_data() {
            format!("{}%", format_tenths(self.percentage_float(), Rounding::Down))
        } else {
            "-".to_string()
        }
    }

    /// Uncovered percentage with at most one decimal, rounded up.
    #[must_use]
    pub fn uncovered_percentage_string(&self) -> String {
        let uncovered = 100.0 - self.percentage_float();
        format!("{}%", format_tenths(uncovered, Rounding::Up))
    }

    /// Width of the covered part of a coverage bar, as a CSS-style percentage.
    #[must_use]
    pub fn bar_width(&self) -> String {
        format!("{}%", format_tenths(self.percentage_float(), Rounding::Down))
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        self.denominator > 0.0
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        self.numerator.to_bits() == other.numerator.to_bits()
            && self.denominator.to_bits() == other.denominator.to_bits()
    }
}

impl Eq for Ratio {}

impl Hash for Ratio {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.numerator.to_bits().hash(state);
        self.denominator.to_bits().hash(state);
    }
}

/// Formats as `x/y`; whole numbers print without a fraction.
impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[derive(Clone, Copy)]
enum Rounding {
    /// Toward zero.
    Down,
    /// Away from zero.
    Up,
}

/// Format with at most one fractional digit: `90`, `90.9`, `0.1`.
fn format_tenths(value: f64, rounding: Rounding) -> String {
    let scaled = value.abs() * 10.0;
    let nearest = scaled.round();
    let tenths = if (scaled - nearest).abs() < TENTHS_EPSILON {
        nearest
    } else {
        match rounding {
            Rounding::Down => scaled.floor(),
            Rounding::Up => scaled.ceil(),
        }
    } as u64;

    let sign = if value < 0.0 && tenths != 0 { "-" } else { "" };
    let (whole, frac) = (tenths / 10, tenths % 10);
    if frac == 0 {
        format!("{sign}{whole}")
    } else {
        format!("{sign}{whole}.{frac}")
    }
}

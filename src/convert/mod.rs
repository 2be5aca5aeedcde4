//! Numeric conversion layer (spec §4.3-§4.5): pure arithmetic, no
//! dependency on the accessor/decorator framework above it.

pub mod fixed_point;
pub mod ieee754;
pub mod numeric;

pub use fixed_point::FixedPointConverter;
pub use ieee754::IEEE754SingleConverter;
pub use numeric::{convert, Arithmetic};

/// Non-`bool` boolean user type (spec §9 design note): sidesteps
/// `Vec<bool>` pessimisation and carries the string conversions
/// ("true"/"false", "0"/"1", "True", ...) the original `Boolean` wrapper
/// supports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Boolean(pub bool);

impl From<bool> for Boolean {
    fn from(b: bool) -> Self {
        Boolean(b)
    }
}

impl From<Boolean> for bool {
    fn from(b: Boolean) -> Self {
        b.0
    }
}

impl std::str::FromStr for Boolean {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "true" | "True" | "TRUE" | "1" => Ok(Boolean(true)),
            "false" | "False" | "FALSE" | "0" => Ok(Boolean(false)),
            other => other.parse::<i64>().map(|v| Boolean(v != 0)),
        }
    }
}

impl std::fmt::Display for Boolean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", if self.0 { "true" } else { "false" })
    }
}

impl Arithmetic for Boolean {
    const IS_FLOAT: bool = false;
    const IS_SIGNED: bool = false;
    const IS_BOOL: bool = true;

    fn to_f64(self) -> f64 {
        self.0.to_f64()
    }
    fn min_value() -> Self {
        Boolean(false)
    }
    fn max_value() -> Self {
        Boolean(true)
    }
    fn from_f64_saturating(x: f64) -> Self {
        Boolean(bool::from_f64_saturating(x))
    }
    fn round_half_away_from_zero(self) -> Self {
        self
    }
    fn from_bool(b: bool) -> Self {
        Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn boolean_string_conversions() {
        assert_eq!(Boolean::from_str("True").unwrap(), Boolean(true));
        assert_eq!(Boolean::from_str("0").unwrap(), Boolean(false));
        assert_eq!(Boolean(true).to_string(), "true");
    }
}

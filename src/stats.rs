//! Operational Statistics Surface
//!
//! Every pool, queue and scheduler exposes a flat list of name/value pairs
//! for monitoring. There is no fixed schema beyond the pair itself, so the
//! surface can grow without breaking collectors.

use std::fmt;

/// A single named statistic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatPair {
    /// Dotted stat name, e.g. `pool.inbound.active`
    pub name: String,
    /// Stringified value
    pub value: String,
}

impl StatPair {
    /// Create a stat pair from any displayable value
    pub fn new(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for StatPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of a global declaration, or of a program that will become one.
/// Names are compared as plain strings; qualification is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstantName(pub String);

impl ConstantName {
    pub fn new(name: impl Into<String>) -> ConstantName {
        ConstantName(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConstantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConstantName {
    fn from(s: &str) -> ConstantName {
        ConstantName(s.to_string())
    }
}

/// Derives the name of the obligation at the given position of a declaration.
/// The derivation is deterministic so that the same declaration always
/// produces the same obligation names, and positions stay readable (1-based).
pub fn obligation_name(base: &ConstantName, index: usize) -> ConstantName {
    ConstantName(format!("{}_obligation_{}", base.0, index + 1))
}

/// Whether a finished declaration is visible outside its enclosing scope.
/// Carried through to hooks so they can mirror the declaration correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obligation_names_are_one_based_and_deterministic() {
        let base = ConstantName::new("add_assoc");
        assert_eq!(obligation_name(&base, 0).as_str(), "add_assoc_obligation_1");
        assert_eq!(obligation_name(&base, 2).as_str(), "add_assoc_obligation_3");
        assert_eq!(obligation_name(&base, 2), obligation_name(&base, 2));
    }
}

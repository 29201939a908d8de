use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An ordering constraint between two universe variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    Le,
    Lt,
    Eq,
}

/// The universe state accumulated for one declaration: the universe
/// variables it mentions plus the ordering constraints between them.
/// Grows as obligations are solved, and is restricted to the variables the
/// final term actually uses exactly once, at finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseContext {
    vars: BTreeSet<String>,
    constraints: BTreeSet<(String, ConstraintKind, String)>,
}

impl UniverseContext {
    pub fn new() -> UniverseContext {
        UniverseContext::default()
    }

    pub fn with_vars<I, S>(vars: I) -> UniverseContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ctx = UniverseContext::new();
        for v in vars {
            ctx.vars.insert(v.into());
        }
        ctx
    }

    pub fn add_var(&mut self, var: impl Into<String>) {
        self.vars.insert(var.into());
    }

    /// Adding a constraint implicitly declares both endpoints.
    pub fn add_constraint(
        &mut self,
        lhs: impl Into<String>,
        kind: ConstraintKind,
        rhs: impl Into<String>,
    ) {
        let lhs = lhs.into();
        let rhs = rhs.into();
        self.vars.insert(lhs.clone());
        self.vars.insert(rhs.clone());
        self.constraints.insert((lhs, kind, rhs));
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.constraints.is_empty()
    }

    pub fn vars(&self) -> &BTreeSet<String> {
        &self.vars
    }

    pub fn contains_var(&self, var: &str) -> bool {
        self.vars.contains(var)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &(String, ConstraintKind, String)> {
        self.constraints.iter()
    }

    /// Accumulates another context into this one.
    pub fn merge(&mut self, other: &UniverseContext) {
        self.vars.extend(other.vars.iter().cloned());
        self.constraints.extend(other.constraints.iter().cloned());
    }

    /// Restricts this context to the given variables, keeping a constraint
    /// only when both endpoints survive. This is the minimization step that
    /// runs once per declaration, after all substitutions.
    pub fn restrict(&self, used: &BTreeSet<String>) -> UniverseContext {
        let vars: BTreeSet<String> = self.vars.intersection(used).cloned().collect();
        let constraints = self
            .constraints
            .iter()
            .filter(|(lhs, _, rhs)| vars.contains(lhs) && vars.contains(rhs))
            .cloned()
            .collect();
        UniverseContext { vars, constraints }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_accumulates() {
        let mut a = UniverseContext::with_vars(["u"]);
        let mut b = UniverseContext::new();
        b.add_constraint("u", ConstraintKind::Lt, "v");
        a.merge(&b);
        assert!(a.contains_var("u"));
        assert!(a.contains_var("v"));
        assert_eq!(a.constraints().count(), 1);

        // Merging twice changes nothing.
        a.merge(&b);
        assert_eq!(a.constraints().count(), 1);
    }

    #[test]
    fn test_restrict_drops_unused_vars_and_dangling_constraints() {
        let mut ctx = UniverseContext::new();
        ctx.add_constraint("u", ConstraintKind::Le, "v");
        ctx.add_constraint("v", ConstraintKind::Lt, "w");

        let used: BTreeSet<String> = ["u".to_string(), "v".to_string()].into();
        let restricted = ctx.restrict(&used);
        assert!(restricted.contains_var("u"));
        assert!(!restricted.contains_var("w"));
        assert_eq!(restricted.constraints().count(), 1);
    }
}

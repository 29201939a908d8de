use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::env::GlobalRef;
use crate::error::{Error, Result};
use crate::names::ConstantName;
use crate::tactic::Tactic;
use crate::term::Term;
use crate::universe::UniverseContext;

/// Whether a solved body may be unfolded by its dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opacity {
    Opaque,
    Transparent,
}

/// Whether a solved body is folded into the declaration eagerly, or kept
/// behind its own named constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefineMode {
    Inline,
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationStatus {
    pub opacity: Opacity,
    pub define: DefineMode,
}

impl ObligationStatus {
    pub fn transparent() -> ObligationStatus {
        ObligationStatus {
            opacity: Opacity::Transparent,
            define: DefineMode::Inline,
        }
    }

    pub fn opaque() -> ObligationStatus {
        ObligationStatus {
            opacity: Opacity::Opaque,
            define: DefineMode::Defer,
        }
    }

    /// Only a transparent, inline obligation gets folded directly into the
    /// declaration; everything else becomes its own constant.
    pub fn inlinable(&self) -> bool {
        self.opacity == Opacity::Transparent && self.define == DefineMode::Inline
    }
}

/// Where an obligation came from. Diagnostics only; nothing downstream
/// depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub source: String,
    pub first_line: u32,
    pub last_line: u32,
}

impl Location {
    pub fn new(source: impl Into<String>, first_line: u32, last_line: u32) -> Location {
        Location {
            source: source.into(),
            first_line,
            last_line,
        }
    }

    pub fn unknown() -> Location {
        Location::new("<unknown>", 0, 0)
    }
}

/// The solved body of an obligation, as dependents will see it.
/// Inline bodies are folded in; named bodies live in the global store and
/// are referenced by constant, keeping the original term around so that
/// transparent ones can still be unfolded on request.
#[derive(Debug, Clone)]
pub enum OblBody {
    Inline(Term),
    Named { re: GlobalRef, term: Term },
}

/// A single unit of delayed work: a goal type that must be inhabited before
/// the owning declaration can be assembled.
pub struct Obligation {
    pub name: ConstantName,
    pub goal_type: Term,
    pub location: Location,

    /// Positions of the obligations whose solved terms this one's type or
    /// proof may mention. Must form a DAG across the whole declaration.
    pub deps: BTreeSet<usize>,

    pub status: ObligationStatus,

    /// Attempted automatically whenever this obligation becomes attemptable.
    /// None means it has to be solved by hand.
    pub default_strategy: Option<Arc<dyn Tactic>>,

    /// Absent until solved. Transitions to Some exactly once.
    body: Option<OblBody>,

    /// The universe constraints the solution brought with it.
    universes: UniverseContext,
}

impl Obligation {
    pub fn new(
        name: ConstantName,
        goal_type: Term,
        location: Location,
        deps: BTreeSet<usize>,
        status: ObligationStatus,
    ) -> Obligation {
        Obligation {
            name,
            goal_type,
            location,
            deps,
            status,
            default_strategy: None,
            body: None,
            universes: UniverseContext::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Tactic>) -> Obligation {
        self.default_strategy = Some(strategy);
        self
    }

    pub fn is_solved(&self) -> bool {
        self.body.is_some()
    }

    pub fn body(&self) -> Option<&OblBody> {
        self.body.as_ref()
    }

    pub fn solved_universes(&self) -> &UniverseContext {
        &self.universes
    }

    /// Stores the solved body. Solving is monotonic: a second call for the
    /// same obligation is a bug in the calling pass.
    pub fn set_body(&mut self, body: OblBody, universes: UniverseContext) {
        assert!(
            self.body.is_none(),
            "obligation '{}' was already solved",
            self.name
        );
        self.body = Some(body);
        self.universes = universes;
    }

    /// The term this obligation contributes to a dependent. Errors when the
    /// obligation hasn't been solved; callers must check attemptability
    /// first.
    pub fn contribution(&self, expand_transparent: bool) -> Result<Term> {
        match &self.body {
            None => Err(Error::UnsolvedDependency(self.name.clone())),
            Some(OblBody::Inline(term)) => Ok(term.clone()),
            Some(OblBody::Named { re, term }) => {
                if expand_transparent && self.status.opacity == Opacity::Transparent {
                    Ok(term.clone())
                } else {
                    Ok(Term::Const(re.name.clone()))
                }
            }
        }
    }
}

impl fmt::Debug for Obligation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obligation")
            .field("name", &self.name)
            .field("goal_type", &self.goal_type)
            .field("deps", &self.deps)
            .field("status", &self.status)
            .field("has_strategy", &self.default_strategy.is_some())
            .field("solved", &self.body.is_some())
            .finish()
    }
}

/// Panics if any dependency is out of range or the dependency relation has a
/// cycle. Callers are required to hand us a DAG; this catches the ones that
/// don't.
pub fn assert_acyclic(obligations: &[Obligation]) {
    // 0 = unvisited, 1 = on the current path, 2 = done
    let mut mark = vec![0u8; obligations.len()];
    let mut stack: Vec<(usize, Vec<usize>)> = Vec::new();
    for start in 0..obligations.len() {
        if mark[start] != 0 {
            continue;
        }
        stack.push((start, obligations[start].deps.iter().copied().collect()));
        mark[start] = 1;
        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(dep) => {
                    assert!(
                        dep < obligations.len(),
                        "obligation '{}' depends on out-of-range position {}",
                        obligations[*node].name,
                        dep
                    );
                    match mark[dep] {
                        0 => {
                            mark[dep] = 1;
                            let deps = obligations[dep].deps.iter().copied().collect();
                            stack.push((dep, deps));
                        }
                        1 => panic!(
                            "obligation dependencies form a cycle through '{}'",
                            obligations[dep].name
                        ),
                        _ => {}
                    }
                }
                None => {
                    mark[*node] = 2;
                    stack.pop();
                }
            }
        }
    }
}

/// The transitive closure of obligation i's dependencies: everything whose
/// solved term must be substituted into its type before it can be attempted.
pub fn dependencies(obligations: &[Obligation], i: usize) -> BTreeSet<usize> {
    assert!(i < obligations.len(), "obligation position out of range");
    let mut closure = BTreeSet::new();
    let mut worklist: Vec<usize> = obligations[i].deps.iter().copied().collect();
    while let Some(dep) = worklist.pop() {
        if closure.insert(dep) {
            worklist.extend(obligations[dep].deps.iter().copied());
        }
    }
    closure
}

/// An obligation is attemptable once every direct dependency has a solved
/// body. Attemptability only ever reports; selection policy stays with the
/// declaration lifecycle.
pub fn attemptable(obligations: &[Obligation], i: usize) -> bool {
    obligations[i]
        .deps
        .iter()
        .all(|&dep| obligations[dep].is_solved())
}

/// For each requested position, the pair of (solved term, goal type) to
/// substitute into a dependent, in position order. The type comes out with
/// its own dependencies already substituted. Errors if any requested
/// position has no solved body yet.
pub fn substitute(
    expand_transparent: bool,
    obligations: &[Obligation],
    indices: &BTreeSet<usize>,
) -> Result<Vec<(usize, Term, Term)>> {
    let mut out = Vec::new();
    for &i in indices {
        let term = obligations[i].contribution(expand_transparent)?;
        let ty = grounded_goal_type(obligations, i)?;
        out.push((i, term, ty));
    }
    Ok(out)
}

/// The goal type of obligation i with every transitive dependency's solved
/// term substituted in. This is the type an attempt actually proves.
pub fn grounded_goal_type(obligations: &[Obligation], i: usize) -> Result<Term> {
    let mut map = BTreeMap::new();
    for dep in dependencies(obligations, i) {
        map.insert(dep, obligations[dep].contribution(true)?);
    }
    Ok(obligations[i].goal_type.subst_holes(&map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obl(name: &str, deps: &[usize]) -> Obligation {
        Obligation::new(
            ConstantName::new(name),
            Term::constant("True"),
            Location::unknown(),
            deps.iter().copied().collect(),
            ObligationStatus::transparent(),
        )
    }

    fn solved(name: &str, deps: &[usize], term: Term) -> Obligation {
        let mut o = obl(name, deps);
        o.set_body(OblBody::Inline(term), UniverseContext::new());
        o
    }

    #[test]
    fn test_transitive_dependencies() {
        let obls = vec![obl("a", &[]), obl("b", &[0]), obl("c", &[1])];
        assert_eq!(dependencies(&obls, 0), BTreeSet::new());
        assert_eq!(dependencies(&obls, 2), BTreeSet::from([0, 1]));
    }

    #[test]
    fn test_attemptable_tracks_direct_deps_only() {
        let obls = vec![
            solved("a", &[], Term::constant("tt")),
            obl("b", &[0]),
            obl("c", &[1]),
        ];
        assert!(attemptable(&obls, 0));
        assert!(attemptable(&obls, 1));
        assert!(!attemptable(&obls, 2));
    }

    #[test]
    fn test_substitute_fails_on_unsolved_dependency() {
        let obls = vec![obl("a", &[])];
        let err = substitute(true, &obls, &BTreeSet::from([0])).unwrap_err();
        assert!(matches!(err, Error::UnsolvedDependency(_)));
    }

    #[test]
    fn test_transparent_named_bodies_unfold_on_request() {
        let mut o = obl("a", &[]);
        o.status = ObligationStatus {
            opacity: Opacity::Transparent,
            define: DefineMode::Defer,
        };
        o.set_body(
            OblBody::Named {
                re: GlobalRef::new(ConstantName::new("p_obligation_1")),
                term: Term::constant("tt"),
            },
            UniverseContext::new(),
        );
        let obls = vec![o];

        let expanded = substitute(true, &obls, &BTreeSet::from([0])).unwrap();
        assert_eq!(expanded[0].1, Term::constant("tt"));

        let folded = substitute(false, &obls, &BTreeSet::from([0])).unwrap();
        assert_eq!(folded[0].1, Term::constant("p_obligation_1"));
    }

    #[test]
    fn test_opaque_bodies_never_unfold() {
        let mut o = obl("a", &[]);
        o.status = ObligationStatus::opaque();
        o.set_body(
            OblBody::Named {
                re: GlobalRef::new(ConstantName::new("p_obligation_1")),
                term: Term::constant("tt"),
            },
            UniverseContext::new(),
        );
        let obls = vec![o];
        let result = substitute(true, &obls, &BTreeSet::from([0])).unwrap();
        assert_eq!(result[0].1, Term::constant("p_obligation_1"));
    }

    #[test]
    fn test_grounded_goal_type_substitutes_the_chain() {
        let a = solved("a", &[], Term::constant("zero"));
        let mut b = obl("b", &[0]);
        b.goal_type = Term::apply(Term::constant("eq"), vec![Term::Hole(0), Term::Hole(0)]);
        let obls = vec![a, b];
        let ty = grounded_goal_type(&obls, 1).unwrap();
        assert_eq!(
            ty,
            Term::apply(
                Term::constant("eq"),
                vec![Term::constant("zero"), Term::constant("zero")]
            )
        );
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn test_cyclic_dependencies_are_rejected() {
        let obls = vec![obl("a", &[1]), obl("b", &[0])];
        assert_acyclic(&obls);
    }
}

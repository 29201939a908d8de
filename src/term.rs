use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::names::ConstantName;

/// Identifies one metavariable within a single proof.
/// Metavariables are proof-local; they never escape into the global store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaId(pub u32);

/// The term language the engine works over.
///
/// This is deliberately the minimum structure needed to track placeholders:
/// the kernel owns the real typed representation, and we only ever hand it
/// fully elaborated terms. `Hole` marks the position of an obligation within
/// its declaration; `Meta` marks an open goal within a single proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// A variable, bound by an enclosing binder or by the ambient section.
    Var(String),

    /// A reference to a registered global declaration.
    Const(ConstantName),

    /// The placeholder for the obligation at this position.
    Hole(usize),

    /// An in-proof metavariable, standing for an open goal.
    Meta(MetaId),

    /// A sort living at the given universe variable.
    Sort(String),

    App(Box<Term>, Box<Term>),

    /// fun (name : type) => body
    Lam(String, Box<Term>, Box<Term>),

    /// (name : type) -> body. Use "_" for a non-dependent arrow.
    Pi(String, Box<Term>, Box<Term>),
}

impl Term {
    pub fn var(name: impl Into<String>) -> Term {
        Term::Var(name.into())
    }

    pub fn constant(name: impl Into<ConstantName>) -> Term {
        Term::Const(name.into())
    }

    /// Builds a curried application of f to the given arguments.
    pub fn apply(f: Term, args: Vec<Term>) -> Term {
        args.into_iter()
            .fold(f, |acc, arg| Term::App(Box::new(acc), Box::new(arg)))
    }

    pub fn lam(name: impl Into<String>, ty: Term, body: Term) -> Term {
        Term::Lam(name.into(), Box::new(ty), Box::new(body))
    }

    pub fn pi(name: impl Into<String>, ty: Term, body: Term) -> Term {
        Term::Pi(name.into(), Box::new(ty), Box::new(body))
    }

    pub fn arrow(input: Term, output: Term) -> Term {
        Term::pi("_", input, output)
    }

    /// All obligation positions this term still mentions.
    pub fn holes(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.visit(&mut |t| {
            if let Term::Hole(i) = t {
                out.insert(*i);
            }
        });
        out
    }

    /// All open metavariables this term mentions.
    pub fn metas(&self) -> BTreeSet<MetaId> {
        let mut out = BTreeSet::new();
        self.visit(&mut |t| {
            if let Term::Meta(m) = t {
                out.insert(*m);
            }
        });
        out
    }

    /// All global constants this term refers to.
    pub fn constants(&self) -> BTreeSet<ConstantName> {
        let mut out = BTreeSet::new();
        self.visit(&mut |t| {
            if let Term::Const(c) = t {
                out.insert(c.clone());
            }
        });
        out
    }

    /// All universe variables this term mentions through its sorts.
    pub fn universe_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.visit(&mut |t| {
            if let Term::Sort(u) = t {
                out.insert(u.clone());
            }
        });
        out
    }

    /// Whether the term mentions a variable with this name.
    /// Shadowing is ignored; our binders never reuse section variable names.
    pub fn mentions_var(&self, name: &str) -> bool {
        let mut found = false;
        self.visit(&mut |t| {
            if let Term::Var(v) = t {
                if v == name {
                    found = true;
                }
            }
        });
        found
    }

    /// A term is ground once no obligation holes and no metavariables remain.
    pub fn is_ground(&self) -> bool {
        self.holes().is_empty() && self.metas().is_empty()
    }

    /// Replaces obligation holes by position. Holes without an entry stay.
    pub fn subst_holes(&self, map: &BTreeMap<usize, Term>) -> Term {
        self.rebuild(&|t| match t {
            Term::Hole(i) => map.get(i).cloned(),
            _ => None,
        })
    }

    /// Replaces metavariables. Replacement terms are substituted as-is;
    /// resolving chains of assignments is the proof state's job.
    pub fn subst_metas(&self, map: &HashMap<MetaId, Term>) -> Term {
        self.rebuild(&|t| match t {
            Term::Meta(m) => map.get(m).cloned(),
            _ => None,
        })
    }

    fn visit(&self, f: &mut impl FnMut(&Term)) {
        f(self);
        match self {
            Term::App(a, b) => {
                a.visit(f);
                b.visit(f);
            }
            Term::Lam(_, ty, body) | Term::Pi(_, ty, body) => {
                ty.visit(f);
                body.visit(f);
            }
            _ => {}
        }
    }

    /// Rebuilds the term, replacing any node for which f returns Some.
    fn rebuild(&self, f: &impl Fn(&Term) -> Option<Term>) -> Term {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        match self {
            Term::App(a, b) => Term::App(Box::new(a.rebuild(f)), Box::new(b.rebuild(f))),
            Term::Lam(name, ty, body) => Term::Lam(
                name.clone(),
                Box::new(ty.rebuild(f)),
                Box::new(body.rebuild(f)),
            ),
            Term::Pi(name, ty, body) => Term::Pi(
                name.clone(),
                Box::new(ty.rebuild(f)),
                Box::new(body.rebuild(f)),
            ),
            _ => self.clone(),
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Term::Var(_) | Term::Const(_) | Term::Hole(_) | Term::Meta(_) | Term::Sort(_)
        )
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Var(name) => write!(f, "{}", name),
            Term::Const(name) => write!(f, "{}", name),
            Term::Hole(i) => write!(f, "?{}", i),
            Term::Meta(m) => write!(f, "?m{}", m.0),
            Term::Sort(u) => write!(f, "Sort({})", u),
            Term::App(a, b) => {
                write!(f, "{} ", a)?;
                if b.is_atomic() {
                    write!(f, "{}", b)
                } else {
                    write!(f, "({})", b)
                }
            }
            Term::Lam(name, ty, body) => write!(f, "fun ({} : {}) => {}", name, ty, body),
            Term::Pi(name, ty, body) => {
                if name == "_" {
                    if ty.is_atomic() {
                        write!(f, "{} -> {}", ty, body)
                    } else {
                        write!(f, "({}) -> {}", ty, body)
                    }
                } else {
                    write!(f, "({} : {}) -> {}", name, ty, body)
                }
            }
        }
    }
}

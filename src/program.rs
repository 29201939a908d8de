use std::collections::BTreeSet;
use std::fmt;

use crate::env::GlobalRef;
use crate::hooks::Hook;
use crate::names::{ConstantName, Visibility};
use crate::obligation::{self, OblBody, Obligation};
use crate::term::Term;
use crate::universe::UniverseContext;

/// The recursion structure of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecursionKind {
    Definition,
    Fixpoint,
    CoFixpoint,
}

/// One member of a declaration. A plain definition has exactly one; a
/// fixpoint or cofixpoint group has one per mutually recursive body.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: ConstantName,

    /// The declared type, which may mention obligation holes.
    pub ty: Term,

    /// The body with obligation holes still in it.
    pub skeleton: Term,

    /// Argument names, for recursive members. Metadata for assembly and
    /// display; the engine doesn't interpret them.
    pub args: Vec<String>,
}

/// How far along a program is after an operation on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// This many obligations still need solving.
    Remain(usize),

    /// All obligations are solved, but completion waits on other open
    /// programs.
    Dependent,

    /// Fully assembled and registered. For a mutual group this is the
    /// primary member's reference.
    Defined(GlobalRef),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Remain(n) => write!(f, "{} obligations remaining", n),
            Progress::Dependent => write!(f, "waiting on other programs"),
            Progress::Defined(re) => write!(f, "defined {}", re.name),
        }
    }
}

/// The aggregate for one declaration whose term still has obligations in it.
///
/// Created before any obligation is solved, mutated in place as they are,
/// and removed from the registry the moment the final term is registered.
pub struct ProgramDeclaration {
    /// The primary name: the single member's for a definition, the first
    /// member's for a mutual group. This is the registry key.
    pub name: ConstantName,

    pub kind: RecursionKind,
    pub members: Vec<Member>,

    /// Grows as obligations are solved.
    pub universes: UniverseContext,

    /// Notations to re-establish around the final declaration. Opaque to
    /// the engine, carried through for the registration layer.
    pub notations: Vec<String>,

    /// Open programs this one's completion waits on, beyond its own
    /// obligations.
    pub waits_on: BTreeSet<ConstantName>,

    pub visibility: Visibility,

    /// Set when the program was force-closed with admitted placeholders.
    pub admitted: bool,

    pub(crate) hooks: Vec<Hook>,

    obligations: Vec<Obligation>,
    remaining: usize,
}

impl ProgramDeclaration {
    /// Positions in `obligations` are fixed from here on: dependency sets
    /// refer to them for the life of the program, so they are never
    /// renumbered. The dependency relation must already be a DAG.
    pub fn new(
        kind: RecursionKind,
        members: Vec<Member>,
        obligations: Vec<Obligation>,
        visibility: Visibility,
    ) -> ProgramDeclaration {
        assert!(!members.is_empty(), "a program needs at least one member");
        for (i, member) in members.iter().enumerate() {
            for other in &members[i + 1..] {
                assert!(
                    member.name != other.name,
                    "duplicate member name '{}'",
                    member.name
                );
            }
        }
        for (i, obl) in obligations.iter().enumerate() {
            for other in &obligations[i + 1..] {
                assert!(
                    obl.name != other.name,
                    "duplicate obligation name '{}'",
                    obl.name
                );
            }
        }
        obligation::assert_acyclic(&obligations);
        for member in &members {
            for hole in member.skeleton.holes().iter().chain(member.ty.holes().iter()) {
                assert!(
                    *hole < obligations.len(),
                    "member '{}' mentions obligation {} but only {} exist",
                    member.name,
                    hole,
                    obligations.len()
                );
            }
        }
        let remaining = obligations.iter().filter(|o| !o.is_solved()).count();
        let name = members[0].name.clone();
        let program = ProgramDeclaration {
            name,
            kind,
            members,
            universes: UniverseContext::new(),
            notations: Vec::new(),
            waits_on: BTreeSet::new(),
            visibility,
            admitted: false,
            hooks: Vec::new(),
            obligations,
            remaining,
        };
        program.check_invariant();
        program
    }

    pub fn with_notations(mut self, notations: Vec<String>) -> ProgramDeclaration {
        self.notations = notations;
        self
    }

    pub fn with_waits_on(mut self, waits_on: BTreeSet<ConstantName>) -> ProgramDeclaration {
        self.waits_on = waits_on;
        self
    }

    pub fn with_universes(mut self, universes: UniverseContext) -> ProgramDeclaration {
        self.universes = universes;
        self
    }

    pub fn add_hook(&mut self, hook: Hook) {
        self.hooks.push(hook);
    }

    pub fn member_names(&self) -> Vec<ConstantName> {
        self.members.iter().map(|m| m.name.clone()).collect()
    }

    pub fn has_member(&self, name: &ConstantName) -> bool {
        self.members.iter().any(|m| &m.name == name)
    }

    pub fn obligations(&self) -> &[Obligation] {
        &self.obligations
    }

    pub fn obligation(&self, index: usize) -> Option<&Obligation> {
        self.obligations.get(index)
    }

    /// Resolves an obligation by name.
    pub fn find_obligation(&self, name: &str) -> Option<usize> {
        self.obligations.iter().position(|o| o.name.as_str() == name)
    }

    pub fn remaining_count(&self) -> usize {
        self.remaining
    }

    pub fn all_solved(&self) -> bool {
        self.remaining == 0
    }

    /// Whether finalization can run: every obligation solved and nothing
    /// else to wait for.
    pub fn ready_to_finalize(&self) -> bool {
        self.all_solved() && self.waits_on.is_empty()
    }

    /// The first unsolved obligation, lowest position first, whose
    /// dependencies are all solved. This is the default selection policy;
    /// nothing stronger is promised.
    pub fn next_attemptable(&self) -> Option<usize> {
        (0..self.obligations.len()).find(|&i| {
            !self.obligations[i].is_solved() && obligation::attemptable(&self.obligations, i)
        })
    }

    /// Stores a solved body and folds its universe constraints into the
    /// program's accumulated context.
    pub fn set_body(&mut self, index: usize, body: OblBody, universes: UniverseContext) {
        self.universes.merge(&universes);
        self.obligations[index].set_body(body, universes);
        self.remaining -= 1;
        self.check_invariant();
    }

    /// The invariant the whole lifecycle leans on: the cached remaining
    /// count always matches the obligations actually unsolved. Checked
    /// after every mutation.
    pub fn check_invariant(&self) {
        let unsolved = self.obligations.iter().filter(|o| !o.is_solved()).count();
        assert_eq!(
            self.remaining, unsolved,
            "program '{}' thinks {} obligations remain but {} are unsolved",
            self.name, self.remaining, unsolved
        );
    }
}

impl fmt::Debug for ProgramDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members.len())
            .field("obligations", &self.obligations)
            .field("remaining", &self.remaining)
            .field("waits_on", &self.waits_on)
            .field("admitted", &self.admitted)
            .finish()
    }
}

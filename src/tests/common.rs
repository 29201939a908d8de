use std::sync::Arc;

use crate::env::{Declaration, GlobalEnv};
use crate::names::{ConstantName, Visibility};
use crate::obligation::{Location, Obligation, ObligationStatus, Opacity};
use crate::session::{MemberDef, ProgramOptions, Session};
use crate::tactic::{Exact, Tactic, Unchecked};
use crate::term::Term;
use crate::universe::UniverseContext;

/// A session with a handful of ambient declarations to prove things about.
pub fn base_session() -> Session {
    let mut session = Session::new();
    let env = session.env_mut();
    register_axiom(env, "True", Term::Sort("u0".to_string()), &["u0"]);
    register_axiom(env, "False", Term::Sort("u0".to_string()), &["u0"]);
    register_axiom(env, "tt", Term::constant("True"), &[]);
    register_axiom(env, "triple", Term::var("triple_t"), &[]);
    session
}

fn register_axiom(env: &mut GlobalEnv, name: &str, ty: Term, universe_vars: &[&str]) {
    let mut universes = UniverseContext::new();
    for var in universe_vars {
        universes.add_var(*var);
    }
    env.register(Declaration {
        name: ConstantName::new(name),
        ty,
        body: None,
        universes,
        opacity: Opacity::Opaque,
        visibility: Visibility::Public,
        admitted: false,
    })
    .expect("seeding the environment failed");
}

/// An unsolved obligation with goal True and no default strategy.
pub fn obl(name: &str, deps: &[usize]) -> Obligation {
    Obligation::new(
        ConstantName::new(name),
        Term::constant("True"),
        Location::new("test.v", 1, 1),
        deps.iter().copied().collect(),
        ObligationStatus::transparent(),
    )
}

/// The tactic that properly proves a True goal.
pub fn exact_tt() -> Arc<dyn Tactic> {
    Arc::new(Exact(Term::constant("tt")))
}

/// A tactic that closes any goal, flagged unsafe.
pub fn close_anything() -> Arc<dyn Tactic> {
    Arc::new(Unchecked(Term::constant("tt")))
}

/// A member whose skeleton applies `triple` to the given number of holes.
pub fn member(name: &str, holes: usize) -> MemberDef {
    let skeleton = if holes == 0 {
        Term::constant("tt")
    } else {
        Term::apply(Term::constant("triple"), (0..holes).map(Term::Hole).collect())
    };
    MemberDef {
        name: ConstantName::new(name),
        ty: Term::constant("True"),
        skeleton,
        args: Vec::new(),
    }
}

/// A three-obligation chain: each one depends on the one before it.
pub fn chain_obligations(base: &str) -> Vec<Obligation> {
    vec![
        obl(&format!("{}_obligation_1", base), &[]),
        obl(&format!("{}_obligation_2", base), &[0]),
        obl(&format!("{}_obligation_3", base), &[1]),
    ]
}

pub fn options() -> ProgramOptions {
    ProgramOptions::default()
}

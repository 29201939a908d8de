use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::deferred::Deferred;
use crate::env::GlobalEnv;
use crate::error::{Error, Result};
use crate::names::{ConstantName, Visibility};
use crate::obligation::Opacity;
use crate::tactic::Tactic;
use crate::term::{MetaId, Term};
use crate::universe::UniverseContext;

/// One open goal: hypotheses in order of introduction, plus the conclusion
/// to prove under them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofGoal {
    pub context: Vec<(String, Term)>,
    pub conclusion: Term,
}

impl ProofGoal {
    pub fn conclude(conclusion: Term) -> ProofGoal {
        ProofGoal {
            context: Vec::new(),
            conclusion,
        }
    }

    /// The goal as a standalone statement: the conclusion closed over its
    /// context. This is the type an admitted placeholder gets.
    pub fn closed_type(&self) -> Term {
        self.context
            .iter()
            .rev()
            .fold(self.conclusion.clone(), |acc, (name, ty)| {
                Term::pi(name.clone(), ty.clone(), acc)
            })
    }
}

/// What should happen when this proof closes successfully.
pub enum ProofEnding {
    /// A standalone theorem or definition.
    Regular {
        name: ConstantName,
        ty: Term,
        visibility: Visibility,
    },

    /// This proof closes one obligation of a program.
    Obligation { program: ConstantName, index: usize },

    /// A caller-driven assembly protocol: the finisher is invoked exactly
    /// once with the minimized universe state and the elaborated terms.
    Derive { finish: FinishFn },
    Equations { finish: FinishFn },
}

pub type FinishFn = Box<dyn FnOnce(&UniverseContext, &[Term]) -> std::result::Result<(), String>>;

/// What a fully proved proof hands to the finalizer.
pub struct ProofPayload {
    pub terms: Vec<Term>,
    pub universes: UniverseContext,

    /// The section variables the proof is allowed to close over, when
    /// `set_used_variables` restricted them.
    pub used_vars: Option<Vec<String>>,
}

/// How the proof ended.
pub enum ClosedResult {
    /// Fully proved. The payload may be a deferred computation so that
    /// elaboration can be checked out of line; it is forced at most once.
    Proved(Deferred<ProofPayload>),

    /// Given up on. Each remaining goal becomes an axiom-like placeholder.
    Admitted {
        goals: Vec<Term>,
        universes: UniverseContext,
    },
}

/// A proof that has reached a terminal state, ready for the finalizer.
/// Consumed exactly once.
pub struct ClosedProof {
    pub ending: ProofEnding,
    pub opacity: Opacity,

    /// Session identifier for deferred payloads, None when closed eagerly.
    pub key: Option<u64>,

    pub result: ClosedResult,
}

impl fmt::Debug for ClosedProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosedProof")
            .field("opacity", &self.opacity)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// The state machine for an in-progress proof.
///
/// A live value is always in the Open state; the two terminal transitions
/// (`close_proof`, `admit`) consume it. Tactic application either succeeds
/// and transforms the goal list, or fails and leaves everything untouched.
pub struct ProofState {
    /// Open goals. Each carries the metavariable its proof will fill.
    goals: Vec<(MetaId, ProofGoal)>,

    /// Index of the designated focused goal.
    focused: usize,

    assignments: HashMap<MetaId, Term>,
    root: MetaId,
    next_meta: u32,

    /// Universe constraints accumulated across tactic steps.
    universes: UniverseContext,

    /// Ambient section variables the proof may close over.
    section_vars: Vec<(String, Term)>,
    used_vars: Option<Vec<String>>,

    /// Runs against remaining goals when a tactic line ends open-ended.
    pending_cleanup: Option<Arc<dyn Tactic>>,

    ending: ProofEnding,
}

impl fmt::Debug for ProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofState")
            .field("goals", &self.goals)
            .field("focused", &self.focused)
            .field("assignments", &self.assignments)
            .field("root", &self.root)
            .field("next_meta", &self.next_meta)
            .field("section_vars", &self.section_vars)
            .field("used_vars", &self.used_vars)
            .finish_non_exhaustive()
    }
}

impl ProofState {
    pub fn new(ending: ProofEnding, goal: ProofGoal) -> ProofState {
        ProofState {
            goals: vec![(MetaId(0), goal)],
            focused: 0,
            assignments: HashMap::new(),
            root: MetaId(0),
            next_meta: 1,
            universes: UniverseContext::new(),
            section_vars: Vec::new(),
            used_vars: None,
            pending_cleanup: None,
            ending,
        }
    }

    pub fn with_section_vars(mut self, vars: Vec<(String, Term)>) -> ProofState {
        self.section_vars = vars;
        self
    }

    pub fn with_cleanup(mut self, tactic: Arc<dyn Tactic>) -> ProofState {
        self.pending_cleanup = Some(tactic);
        self
    }

    pub fn ending(&self) -> &ProofEnding {
        &self.ending
    }

    pub fn get_open_goals(&self) -> usize {
        self.goals.len()
    }

    pub fn is_complete(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn focused_goal(&self) -> Option<&ProofGoal> {
        self.goals.get(self.focused).map(|(_, g)| g)
    }

    pub fn open_goals(&self) -> impl Iterator<Item = &ProofGoal> {
        self.goals.iter().map(|(_, g)| g)
    }

    pub fn universes(&self) -> &UniverseContext {
        &self.universes
    }

    /// Changes which goal is focused.
    pub fn focus(&mut self, index: usize) -> Result<()> {
        if index >= self.goals.len() {
            return Err(Error::NoOpenGoals);
        }
        self.focused = index;
        Ok(())
    }

    /// Applies a tactic to the focused goal. On success the goal is replaced
    /// by the tactic's subgoals; on failure the state is untouched. Returns
    /// whether the step was unsafe.
    pub fn apply_tactic(&mut self, tactic: &dyn Tactic, env: &GlobalEnv) -> Result<bool> {
        self.apply_at(self.focused, tactic, env)
    }

    /// Applies a tactic to exactly the first open goal and reports whether
    /// the tactic used any unsafe step.
    pub fn by(&mut self, tactic: &dyn Tactic, env: &GlobalEnv) -> Result<bool> {
        self.apply_at(0, tactic, env)
    }

    fn apply_at(&mut self, index: usize, tactic: &dyn Tactic, env: &GlobalEnv) -> Result<bool> {
        let (meta, goal) = match self.goals.get(index) {
            Some((m, g)) => (*m, g),
            None => return Err(Error::NoOpenGoals),
        };
        let outcome = tactic.apply(goal, env).map_err(|e| Error::TacticFailure {
            tactic: tactic.name().to_string(),
            message: e.0,
        })?;

        // The outcome's proof refers to its subgoals positionally;
        // renumber into metavariables that are fresh for this proof.
        debug_assert!(
            outcome
                .proof
                .metas()
                .iter()
                .all(|m| (m.0 as usize) < outcome.subgoals.len()),
            "tactic '{}' produced a proof referring to goals it didn't return",
            tactic.name()
        );
        let mut renumber = HashMap::new();
        let mut replacements = Vec::with_capacity(outcome.subgoals.len());
        for (k, subgoal) in outcome.subgoals.into_iter().enumerate() {
            let fresh = MetaId(self.next_meta);
            self.next_meta += 1;
            renumber.insert(MetaId(k as u32), Term::Meta(fresh));
            replacements.push((fresh, subgoal));
        }
        let proof = outcome.proof.subst_metas(&renumber);

        self.assignments.insert(meta, proof);
        self.universes.merge(&outcome.universes);
        self.goals.splice(index..=index, replacements);
        if self.focused >= self.goals.len() {
            self.focused = 0;
        }
        Ok(outcome.unsafe_used)
    }

    /// Runs the pending cleanup tactic, if any, once against every goal that
    /// was open when the line ended. Failures are ignored; goals the cleanup
    /// can't close just stay open. Subgoals the cleanup creates are not
    /// revisited.
    pub fn end_tactic_line(&mut self, env: &GlobalEnv) {
        let Some(cleanup) = self.pending_cleanup.clone() else {
            return;
        };
        let snapshot: Vec<MetaId> = self.goals.iter().map(|(m, _)| *m).collect();
        for meta in snapshot {
            let Some(index) = self.goals.iter().position(|(m, _)| *m == meta) else {
                continue;
            };
            let _ = self.apply_at(index, cleanup.as_ref(), env);
        }
    }

    /// Restricts which ambient section variables the proof may close over,
    /// and returns their required closure: the requested variables plus any
    /// section variable mentioned by the type of an included one. Only
    /// callable while the proof is open, which a live value always is.
    pub fn set_used_variables(&mut self, names: &[&str]) -> Result<Vec<String>> {
        for name in names {
            if !self.section_vars.iter().any(|(v, _)| v == name) {
                return Err(Error::UnknownVariable(name.to_string()));
            }
        }
        let mut included: BTreeSet<String> = names.iter().map(|s| s.to_string()).collect();
        loop {
            let mut grew = false;
            for (var, ty) in &self.section_vars {
                if !included.contains(var) {
                    continue;
                }
                for (other, _) in &self.section_vars {
                    if !included.contains(other) && ty.mentions_var(other) {
                        included.insert(other.clone());
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }
        // Report in section order, not alphabetically.
        let closure: Vec<String> = self
            .section_vars
            .iter()
            .filter(|(v, _)| included.contains(v))
            .map(|(v, _)| v.clone())
            .collect();
        self.used_vars = Some(closure.clone());
        Ok(closure)
    }

    /// The proof term, once no goals remain.
    pub fn proof_term(&self) -> Option<Term> {
        if !self.is_complete() {
            return None;
        }
        Some(resolve(&self.assignments, &Term::Meta(self.root)))
    }

    /// Closes a fully proved proof. With a key, elaboration is wrapped in a
    /// deferred computation so checking can happen out of line; otherwise it
    /// happens now.
    pub fn close_proof(self, opacity: Opacity, defer_key: Option<u64>) -> Result<ClosedProof> {
        let open = self.goals.len();
        if open > 0 {
            return Err(Error::OpenGoals(open));
        }
        let ProofState {
            assignments,
            root,
            universes,
            used_vars,
            ending,
            ..
        } = self;
        let build = move || {
            let term = resolve(&assignments, &Term::Meta(root));
            debug_assert!(term.metas().is_empty(), "closed proof left metavariables");
            ProofPayload {
                terms: vec![term],
                universes,
                used_vars,
            }
        };
        let payload = match defer_key {
            Some(_) => Deferred::new(build),
            None => Deferred::ready(build()),
        };
        Ok(ClosedProof {
            ending,
            opacity,
            key: defer_key,
            result: ClosedResult::Proved(payload),
        })
    }

    /// Gives up: every remaining goal becomes an admitted placeholder.
    pub fn admit(self) -> ClosedProof {
        let goals = self.goals.iter().map(|(_, g)| g.closed_type()).collect();
        ClosedProof {
            ending: self.ending,
            opacity: Opacity::Opaque,
            key: None,
            result: ClosedResult::Admitted {
                goals,
                universes: self.universes,
            },
        }
    }
}

/// Resolves metavariable assignments recursively. Assignments only ever
/// point at strictly fresher metavariables, so this terminates.
fn resolve(assignments: &HashMap<MetaId, Term>, term: &Term) -> Term {
    let mut out = term.clone();
    loop {
        let metas = out.metas();
        let assigned: HashMap<MetaId, Term> = metas
            .iter()
            .filter_map(|m| assignments.get(m).map(|t| (*m, t.clone())))
            .collect();
        if assigned.is_empty() {
            return out;
        }
        out = out.subst_metas(&assigned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tactic::{Assumption, Exact, Fail, Intro};

    fn true_goal() -> ProofGoal {
        ProofGoal::conclude(Term::pi(
            "h",
            Term::constant("True"),
            Term::constant("True"),
        ))
    }

    fn regular_ending() -> ProofEnding {
        ProofEnding::Regular {
            name: ConstantName::new("lemma"),
            ty: Term::constant("True"),
            visibility: Visibility::Public,
        }
    }

    #[test]
    fn test_intro_assumption_close() {
        let env = GlobalEnv::new();
        let mut state = ProofState::new(regular_ending(), true_goal());
        assert_eq!(state.get_open_goals(), 1);

        state.by(&Intro, &env).unwrap();
        assert_eq!(state.get_open_goals(), 1);

        state.by(&Assumption, &env).unwrap();
        assert!(state.is_complete());

        let term = state.proof_term().unwrap();
        assert_eq!(
            term,
            Term::lam("h", Term::constant("True"), Term::var("h"))
        );

        let closed = state.close_proof(Opacity::Transparent, None).unwrap();
        match closed.result {
            ClosedResult::Proved(payload) => {
                assert_eq!(payload.force().terms.len(), 1);
            }
            _ => panic!("expected a proved result"),
        }
    }

    #[test]
    fn test_failed_tactic_leaves_state_unchanged() {
        let env = GlobalEnv::new();
        let mut state = ProofState::new(regular_ending(), true_goal());
        let before = state.focused_goal().unwrap().clone();

        let err = state.by(&Fail, &env).unwrap_err();
        assert!(matches!(err, Error::TacticFailure { .. }));
        assert_eq!(state.get_open_goals(), 1);
        assert_eq!(state.focused_goal().unwrap(), &before);

        // Still usable afterwards.
        state.by(&Intro, &env).unwrap();
        state.by(&Assumption, &env).unwrap();
        assert!(state.is_complete());
    }

    #[test]
    fn test_close_requires_no_open_goals() {
        let state = ProofState::new(regular_ending(), true_goal());
        let err = state.close_proof(Opacity::Transparent, None).unwrap_err();
        assert!(matches!(err, Error::OpenGoals(1)));
    }

    #[test]
    fn test_deferred_close_delays_elaboration() {
        let env = GlobalEnv::new();
        let mut state = ProofState::new(regular_ending(), true_goal());
        state.by(&Intro, &env).unwrap();
        state.by(&Assumption, &env).unwrap();

        let closed = state.close_proof(Opacity::Transparent, Some(7)).unwrap();
        assert_eq!(closed.key, Some(7));
        match &closed.result {
            ClosedResult::Proved(payload) => {
                assert!(!payload.is_forced());
                payload.force();
                assert!(payload.is_forced());
            }
            _ => panic!("expected a proved result"),
        }
    }

    #[test]
    fn test_admit_collects_remaining_goals() {
        let env = GlobalEnv::new();
        let mut state = ProofState::new(regular_ending(), true_goal());
        state.by(&Intro, &env).unwrap();

        let closed = state.admit();
        match closed.result {
            ClosedResult::Admitted { goals, .. } => {
                assert_eq!(goals.len(), 1);
                // The hypothesis introduced by intro is closed back over.
                assert_eq!(
                    goals[0],
                    Term::pi("h", Term::constant("True"), Term::constant("True"))
                );
            }
            _ => panic!("expected an admitted result"),
        }
    }

    #[test]
    fn test_pending_cleanup_runs_once_per_goal() {
        let mut env = GlobalEnv::new();
        env.register(crate::env::Declaration {
            name: ConstantName::new("True"),
            ty: Term::var("prop"),
            body: None,
            universes: UniverseContext::new(),
            opacity: Opacity::Opaque,
            visibility: Visibility::Public,
            admitted: false,
        })
        .unwrap();
        env.register(crate::env::Declaration {
            name: ConstantName::new("tt"),
            ty: Term::constant("True"),
            body: None,
            universes: UniverseContext::new(),
            opacity: Opacity::Opaque,
            visibility: Visibility::Public,
            admitted: false,
        })
        .unwrap();

        let mut state = ProofState::new(
            regular_ending(),
            ProofGoal::conclude(Term::pi(
                "h",
                Term::constant("True"),
                Term::constant("True"),
            )),
        )
        .with_cleanup(Arc::new(Exact(Term::constant("tt"))));

        state.by(&Intro, &env).unwrap();
        state.end_tactic_line(&env);
        assert!(state.is_complete());
    }

    #[test]
    fn test_set_used_variables_returns_closure() {
        let section_vars = vec![
            ("A".to_string(), Term::Sort("u".to_string())),
            ("x".to_string(), Term::var("A")),
            ("y".to_string(), Term::var("A")),
        ];
        let mut state =
            ProofState::new(regular_ending(), true_goal()).with_section_vars(section_vars);

        // Asking for x pulls in A, because x's type mentions it.
        let closure = state.set_used_variables(&["x"]).unwrap();
        assert_eq!(closure, vec!["A".to_string(), "x".to_string()]);

        let err = state.set_used_variables(&["zzz"]).unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(_)));
    }
}

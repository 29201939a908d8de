use std::fmt;

use crate::env::GlobalEnv;
use crate::proof_state::ProofGoal;
use crate::term::{MetaId, Term};
use crate::universe::UniverseContext;

/// Why a tactic refused to act. Tactic failures are always recoverable: the
/// proof state it was applied to is left exactly as it was.
#[derive(Debug, Clone)]
pub struct TacticError(pub String);

impl fmt::Display for TacticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a successful tactic application produced.
pub struct TacticOutcome {
    /// The proof skeleton for the goal the tactic was applied to. It may
    /// refer to the subgoals positionally: Meta(k) stands for subgoals[k].
    /// The proof state renumbers these into fresh metavariables.
    pub proof: Term,

    /// New goals, replacing the one the tactic consumed.
    pub subgoals: Vec<ProofGoal>,

    /// Universe constraints the step introduced, merged into the proof's
    /// accumulated context.
    pub universes: UniverseContext,

    /// Whether the step bypassed checking. Reported back to the caller of
    /// `by` so it can mark the proof accordingly.
    pub unsafe_used: bool,
}

impl TacticOutcome {
    /// An outcome that closes the goal outright.
    pub fn closes(proof: Term) -> TacticOutcome {
        TacticOutcome {
            proof,
            subgoals: Vec::new(),
            universes: UniverseContext::new(),
            unsafe_used: false,
        }
    }

    pub fn with_universes(mut self, universes: UniverseContext) -> TacticOutcome {
        self.universes = universes;
        self
    }
}

/// An opaque, possibly-failing procedure over a single goal.
///
/// The engine never looks inside a tactic; it only runs one against the
/// focused goal and folds the outcome into the proof state.
pub trait Tactic {
    fn name(&self) -> &str;

    fn apply(&self, goal: &ProofGoal, env: &GlobalEnv) -> Result<TacticOutcome, TacticError>;
}

/// Closes the goal with the given term, when we can see that it fits.
/// A constant checks against its declared type; a variable checks against
/// the goal's context. Anything else is refused, since full type inference
/// belongs to the kernel.
pub struct Exact(pub Term);

impl Tactic for Exact {
    fn name(&self) -> &str {
        "exact"
    }

    fn apply(&self, goal: &ProofGoal, env: &GlobalEnv) -> Result<TacticOutcome, TacticError> {
        match &self.0 {
            Term::Const(name) => {
                let decl = env
                    .get(name)
                    .ok_or_else(|| TacticError(format!("unknown constant '{}'", name)))?;
                if decl.ty != goal.conclusion {
                    return Err(TacticError(format!(
                        "'{}' has type {}, but the goal is {}",
                        name, decl.ty, goal.conclusion
                    )));
                }
                Ok(TacticOutcome::closes(self.0.clone()).with_universes(decl.universes.clone()))
            }
            Term::Var(x) => {
                let ty = goal
                    .context
                    .iter()
                    .rev()
                    .find(|(name, _)| name == x)
                    .map(|(_, ty)| ty)
                    .ok_or_else(|| TacticError(format!("no hypothesis named '{}'", x)))?;
                if *ty != goal.conclusion {
                    return Err(TacticError(format!(
                        "hypothesis '{}' has type {}, but the goal is {}",
                        x, ty, goal.conclusion
                    )));
                }
                Ok(TacticOutcome::closes(self.0.clone()))
            }
            other => Err(TacticError(format!(
                "cannot check that {} inhabits the goal",
                other
            ))),
        }
    }
}

/// Closes the goal with any hypothesis whose type matches the conclusion.
pub struct Assumption;

impl Tactic for Assumption {
    fn name(&self) -> &str {
        "assumption"
    }

    fn apply(&self, goal: &ProofGoal, _env: &GlobalEnv) -> Result<TacticOutcome, TacticError> {
        for (name, ty) in goal.context.iter().rev() {
            if *ty == goal.conclusion {
                return Ok(TacticOutcome::closes(Term::var(name.clone())));
            }
        }
        Err(TacticError("no hypothesis matches the goal".to_string()))
    }
}

/// For a goal (x : A) -> B, introduces x and leaves B to prove.
pub struct Intro;

impl Tactic for Intro {
    fn name(&self) -> &str {
        "intro"
    }

    fn apply(&self, goal: &ProofGoal, _env: &GlobalEnv) -> Result<TacticOutcome, TacticError> {
        let Term::Pi(name, ty, body) = &goal.conclusion else {
            return Err(TacticError(format!(
                "goal {} is not a function type",
                goal.conclusion
            )));
        };
        let hyp_name = if name == "_" { "h".to_string() } else { name.clone() };
        let mut context = goal.context.clone();
        context.push((hyp_name.clone(), (**ty).clone()));
        let subgoal = ProofGoal {
            context,
            conclusion: (**body).clone(),
        };
        Ok(TacticOutcome {
            proof: Term::lam(hyp_name, (**ty).clone(), Term::Meta(MetaId(0))),
            subgoals: vec![subgoal],
            universes: UniverseContext::new(),
            unsafe_used: false,
        })
    }
}

/// Closes the goal with the given term without any checking at all.
/// The resulting proof reports that an unsafe step was used.
pub struct Unchecked(pub Term);

impl Tactic for Unchecked {
    fn name(&self) -> &str {
        "unchecked"
    }

    fn apply(&self, _goal: &ProofGoal, _env: &GlobalEnv) -> Result<TacticOutcome, TacticError> {
        let mut outcome = TacticOutcome::closes(self.0.clone());
        outcome.unsafe_used = true;
        Ok(outcome)
    }
}

/// Always fails. Useful as a stand-in strategy in tests.
pub struct Fail;

impl Tactic for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    fn apply(&self, _goal: &ProofGoal, _env: &GlobalEnv) -> Result<TacticOutcome, TacticError> {
        Err(TacticError("fail tactic always fails".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Declaration;
    use crate::names::{ConstantName, Visibility};
    use crate::obligation::Opacity;

    fn env_with_tt() -> GlobalEnv {
        let mut env = GlobalEnv::new();
        env.register(Declaration {
            name: ConstantName::new("True"),
            ty: Term::Sort("u0".to_string()),
            body: None,
            universes: UniverseContext::with_vars(["u0"]),
            opacity: Opacity::Opaque,
            visibility: Visibility::Public,
            admitted: false,
        })
        .unwrap();
        env.register(Declaration {
            name: ConstantName::new("tt"),
            ty: Term::constant("True"),
            body: None,
            universes: UniverseContext::new(),
            opacity: Opacity::Opaque,
            visibility: Visibility::Public,
            admitted: false,
        })
        .unwrap();
        env
    }

    fn goal(conclusion: Term) -> ProofGoal {
        ProofGoal {
            context: Vec::new(),
            conclusion,
        }
    }

    #[test]
    fn test_exact_checks_declared_type() {
        let env = env_with_tt();
        let ok = Exact(Term::constant("tt")).apply(&goal(Term::constant("True")), &env);
        assert!(ok.is_ok());
        assert!(ok.unwrap().subgoals.is_empty());

        let bad = Exact(Term::constant("tt")).apply(&goal(Term::constant("False")), &env);
        assert!(bad.is_err());
    }

    #[test]
    fn test_intro_then_assumption() {
        let env = env_with_tt();
        let implication = Term::pi("h", Term::constant("True"), Term::constant("True"));
        let outcome = Intro.apply(&goal(implication), &env).unwrap();
        assert_eq!(outcome.subgoals.len(), 1);

        let closed = Assumption.apply(&outcome.subgoals[0], &env).unwrap();
        assert_eq!(closed.proof, Term::var("h"));
    }

    #[test]
    fn test_unchecked_reports_unsafe() {
        let env = env_with_tt();
        let outcome = Unchecked(Term::constant("tt"))
            .apply(&goal(Term::constant("False")), &env)
            .unwrap();
        assert!(outcome.unsafe_used);
    }
}

use thiserror::Error;

use crate::names::ConstantName;

/// The errors that commands can surface to their caller.
/// All of these are recoverable: they leave the registry and the global
/// environment exactly as they were.
#[derive(Debug, Error)]
pub enum Error {
    /// A command needed a single open program, but none or several were open
    /// and the caller didn't name one. Carries every open program name so the
    /// message can list them.
    #[error("{}", ambiguous_message(.open))]
    AmbiguousProgram { open: Vec<ConstantName> },

    /// A program name that isn't open. Carries the open names so the
    /// message can suggest what the caller might have meant.
    #[error("no open program named '{name}'{}", suggest_open(.open))]
    UnknownProgram {
        name: ConstantName,
        open: Vec<ConstantName>,
    },

    /// A bad obligation index or name, including obligations that are
    /// already solved.
    #[error("no open obligation '{target}' in program '{program}'")]
    UnknownObligation {
        program: ConstantName,
        target: String,
    },

    /// The name collides with an existing global declaration or open program.
    #[error("'{0}' is already declared")]
    AlreadyDeclared(ConstantName),

    /// One or more programs still have open obligations at a scope boundary.
    #[error("{}", unsolved_message(.programs))]
    UnsolvedObligations {
        programs: Vec<(ConstantName, usize)>,
    },

    /// A tactic did not produce a valid proof step. The proof state is
    /// unchanged; retrying with a different tactic is fine.
    #[error("tactic '{tactic}' failed: {message}")]
    TacticFailure { tactic: String, message: String },

    /// Substitution was requested for an obligation whose body isn't there
    /// yet. Callers must only substitute already-solved dependencies.
    #[error("obligation '{0}' has no solved body yet")]
    UnsolvedDependency(ConstantName),

    /// A section variable name that doesn't exist in the proof's ambient
    /// context.
    #[error("unknown section variable '{0}'")]
    UnknownVariable(String),

    /// A proof cannot be closed while goals remain open.
    #[error("cannot close the proof: {0} goals are still open")]
    OpenGoals(usize),

    /// There is no goal left for a tactic to act on.
    #[error("no open goals")]
    NoOpenGoals,

    /// Obligation selection found nothing to attempt: everything is either
    /// solved or blocked on unsolved dependencies.
    #[error("no attemptable obligations remain in program '{0}'")]
    NoObligationsRemain(ConstantName),

    /// A derive/equations finishing function reported a problem, or was
    /// handed a proof it cannot assemble.
    #[error("finishing function failed: {0}")]
    FinishFailed(String),

    /// A supporting library required for program mode isn't loaded.
    #[error("required library '{0}' is not loaded")]
    LibraryNotLoaded(ConstantName),
}

pub type Result<T> = std::result::Result<T, Error>;

fn ambiguous_message(open: &[ConstantName]) -> String {
    if open.is_empty() {
        "no programs are open".to_string()
    } else {
        let names: Vec<String> = open.iter().map(|n| n.to_string()).collect();
        format!(
            "{} programs are open ({}); name one explicitly",
            open.len(),
            names.join(", ")
        )
    }
}

fn suggest_open(open: &[ConstantName]) -> String {
    if open.is_empty() {
        String::new()
    } else {
        let names: Vec<String> = open.iter().map(|n| n.to_string()).collect();
        format!(" (open programs: {})", names.join(", "))
    }
}

fn unsolved_message(programs: &[(ConstantName, usize)]) -> String {
    let parts: Vec<String> = programs
        .iter()
        .map(|(name, remaining)| format!("{} ({} remaining)", name, remaining))
        .collect();
    format!("unsolved obligations at scope close: {}", parts.join(", "))
}

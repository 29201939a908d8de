use std::sync::Arc;

use crate::env::GlobalRef;
use crate::error::{Error, Result};
use crate::names::ConstantName;
use crate::program::Progress;
use crate::session::Session;
use crate::tactic::Tactic;

/// The Solver drives obligation-solving passes over a session's open
/// programs. It is separate from the Session because a session is long-lived
/// data, while a solver exists for one command: it borrows the session,
/// reports everything it does through a single event handler, and leaves its
/// metrics behind for the caller.
pub struct Solver<'a> {
    session: &'a mut Session,

    /// A single event handler is used across the whole pass.
    event_handler: Box<dyn FnMut(SolveEvent) + 'a>,

    pub status: SolveStatus,

    /// Metrics collected while solving.
    pub metrics: SolveMetrics,
}

/// One thing that happened during a solving pass.
#[derive(Debug, Clone)]
pub struct SolveEvent {
    /// The program the event is about.
    pub program: ConstantName,

    /// The obligation, when the event concerns one.
    pub obligation: Option<ConstantName>,

    pub kind: SolveEventKind,
}

#[derive(Debug, Clone)]
pub enum SolveEventKind {
    /// An attempt produced a solved body.
    Solved,

    /// The tactic failed outright. Carries its message.
    Failed(String),

    /// The tactic ran but left this many goals open, so nothing was stored.
    LeftOpen(usize),

    /// The obligation was force-closed with an admitted placeholder.
    Admitted,

    /// The whole program finished and was registered.
    Completed(GlobalRef),

    /// A post-registration hook failed. The declaration stays registered.
    HookFailed(String),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SolveStatus {
    /// Everything attempted got solved.
    Good,

    /// Some obligations resisted their tactic and stay open.
    Warning,

    /// Something went wrong after registration, like a failing hook.
    Error,
}

impl SolveStatus {
    pub fn verb(&self) -> &str {
        match self {
            SolveStatus::Good => "succeeded",
            SolveStatus::Warning => "warned",
            SolveStatus::Error => "errored",
        }
    }

    pub fn warn(&mut self) {
        if *self == SolveStatus::Good {
            *self = SolveStatus::Warning;
        }
    }

    pub fn is_good(&self) -> bool {
        *self == SolveStatus::Good
    }
}

/// Metrics collected across one solving command.
#[derive(Clone, Debug, Default)]
pub struct SolveMetrics {
    /// Attempts made, whether or not they stuck.
    pub attempts: i32,

    /// Obligations that got a solved body.
    pub solved: i32,

    /// Attempts whose tactic failed.
    pub failures: i32,

    /// Obligations force-closed with a placeholder.
    pub admitted: i32,

    /// Programs that reached registration.
    pub programs_completed: i32,
}

impl SolveMetrics {
    pub fn new() -> SolveMetrics {
        SolveMetrics::default()
    }

    pub fn print(&self, status: SolveStatus) {
        println!();
        println!("{}/{} attempts solved", self.solved, self.attempts);
        if self.failures > 0 {
            println!("{} attempts failed", self.failures);
        }
        if self.admitted > 0 {
            println!("{} obligations admitted", self.admitted);
        }
        if self.programs_completed > 0 {
            println!("{} programs completed", self.programs_completed);
        }
        println!("solving {}", status.verb());
    }
}

impl<'a> Solver<'a> {
    pub fn new(session: &'a mut Session, event_handler: impl FnMut(SolveEvent) + 'a) -> Solver<'a> {
        Solver {
            session,
            event_handler: Box::new(event_handler),
            status: SolveStatus::Good,
            metrics: SolveMetrics::new(),
        }
    }

    /// Attempts the next attemptable obligation of one program (or the
    /// unique open one) with the given tactic, falling back to the
    /// obligation's own default strategy.
    pub fn solve_obligation(
        &mut self,
        program: Option<&ConstantName>,
        tactic: Option<Arc<dyn Tactic>>,
    ) -> Result<Progress> {
        let Solver {
            session,
            event_handler,
            status,
            metrics,
        } = self;
        with_tracking(metrics, status, event_handler, |events| {
            let key = session.registry.resolve(program)?;
            let (index, default) = {
                let prog = session.registry.get(&key).unwrap();
                let index = prog
                    .next_attemptable()
                    .ok_or_else(|| Error::NoObligationsRemain(key.clone()))?;
                (index, prog.obligations()[index].default_strategy.clone())
            };
            match tactic.or(default) {
                Some(t) => {
                    session.attempt_obligation(&key, index, t.as_ref(), events)?;
                }
                None => {
                    let name = session.registry.get(&key).unwrap().obligations()[index]
                        .name
                        .clone();
                    events(SolveEvent {
                        program: key.clone(),
                        obligation: Some(name),
                        kind: SolveEventKind::Failed("no tactic to apply".to_string()),
                    });
                }
            }
            session.conclude(&key, events)
        })
    }

    /// Runs the fixed-point pass over one program (or the unique open one).
    /// With a tactic, every unsolved obligation is attempted with it;
    /// without, only the ones carrying default strategies.
    pub fn solve_obligations(
        &mut self,
        program: Option<&ConstantName>,
        tactic: Option<Arc<dyn Tactic>>,
    ) -> Result<Progress> {
        let Solver {
            session,
            event_handler,
            status,
            metrics,
        } = self;
        with_tracking(metrics, status, event_handler, |events| {
            let key = session.registry.resolve(program)?;
            session.auto_pass(&key, tactic.as_ref(), events)?;
            session.conclude(&key, events)
        })
    }

    /// Runs the fixed-point pass over every open program, reporting each
    /// program's progress. Programs completed by an earlier cascade in the
    /// same call are skipped.
    pub fn solve_all_obligations(
        &mut self,
        tactic: Option<Arc<dyn Tactic>>,
    ) -> Result<Vec<(ConstantName, Progress)>> {
        let keys = self.session.registry.names();
        let mut results = Vec::new();
        for key in keys {
            if self.session.registry.get(&key).is_none() {
                continue;
            }
            let progress = self.solve_obligations(Some(&key), tactic.clone())?;
            results.push((key, progress));
        }
        Ok(results)
    }
}

/// Wraps an event handler so that metrics and status track what flows
/// through it, then runs the pass body with the wrapped handler.
fn with_tracking<T>(
    metrics: &mut SolveMetrics,
    status: &mut SolveStatus,
    handler: &mut Box<dyn FnMut(SolveEvent) + '_>,
    body: impl FnOnce(&mut dyn FnMut(SolveEvent)) -> Result<T>,
) -> Result<T> {
    let mut relay = |event: SolveEvent| {
        match &event.kind {
            SolveEventKind::Solved => {
                metrics.attempts += 1;
                metrics.solved += 1;
            }
            SolveEventKind::Failed(_) => {
                metrics.attempts += 1;
                metrics.failures += 1;
                status.warn();
            }
            SolveEventKind::LeftOpen(_) => {
                metrics.attempts += 1;
                status.warn();
            }
            SolveEventKind::Admitted => {
                metrics.admitted += 1;
            }
            SolveEventKind::Completed(_) => {
                metrics.programs_completed += 1;
            }
            SolveEventKind::HookFailed(_) => {
                *status = SolveStatus::Error;
            }
        }
        handler(event);
    };
    body(&mut relay)
}

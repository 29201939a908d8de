use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::env::{Declaration, GlobalEnv};
use crate::error::{Error, Result};
use crate::finalizer::{self, FinalizeReport};
use crate::hooks::Hook;
use crate::names::{ConstantName, Visibility};
use crate::obligation::{self, Obligation, Opacity};
use crate::program::{Member, ProgramDeclaration, Progress, RecursionKind};
use crate::proof_state::{ClosedProof, ClosedResult, ProofEnding, ProofGoal, ProofState};
use crate::registry::ProgramRegistry;
use crate::solver::{SolveEvent, SolveEventKind};
use crate::tactic::Tactic;
use crate::term::Term;
use crate::universe::UniverseContext;

/// One member of a program as handed to the declaration commands.
pub struct MemberDef {
    pub name: ConstantName,
    pub ty: Term,
    pub skeleton: Term,
    pub args: Vec<String>,
}

/// The options a declaration command can carry.
pub struct ProgramOptions {
    pub notations: Vec<String>,
    pub visibility: Visibility,

    /// Other open programs this declaration's completion waits on.
    pub waits_on: BTreeSet<ConstantName>,

    /// The universe state the elaborated skeleton arrived with.
    pub universes: UniverseContext,

    /// Fired exactly once, after the final declaration is registered.
    pub hooks: Vec<Hook>,
}

impl Default for ProgramOptions {
    fn default() -> ProgramOptions {
        ProgramOptions {
            notations: Vec::new(),
            visibility: Visibility::Public,
            waits_on: BTreeSet::new(),
            universes: UniverseContext::new(),
            hooks: Vec::new(),
        }
    }
}

/// Picks an obligation by position or by name.
#[derive(Debug, Clone)]
pub enum OblSelector {
    /// Zero-based position within the program's obligation sequence.
    Index(usize),
    Name(String),
}

/// What finishing a closed proof produced.
pub enum FinishResult {
    /// A standalone declaration went into the global store.
    Registered(Vec<FinalizeReport>),

    /// An obligation was stored; this is how far its program got.
    Obligation(Progress),

    /// A derive/equations finishing function was invoked.
    Delegated,
}

/// Read-only status for one obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationSnapshot {
    pub name: String,
    pub goal: String,
    pub solved: bool,
    pub deps: Vec<usize>,
    pub location: String,
}

/// Read-only status for one open program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSnapshot {
    pub name: String,
    pub members: Vec<String>,
    pub remaining: usize,
    pub admitted: bool,
    pub dependent: bool,
    pub obligations: Vec<ObligationSnapshot>,
}

/// The owning context for one document's worth of declarations: the global
/// environment, the open programs, and the commands that drive both.
///
/// Everything here is single-threaded by design. Commands run one at a time,
/// and a solving cascade runs to completion before its command returns.
pub struct Session {
    pub(crate) env: GlobalEnv,
    pub(crate) registry: ProgramRegistry,
    required_libraries: Vec<ConstantName>,
    next_proof_key: u64,
}

impl Session {
    pub fn new() -> Session {
        Session {
            env: GlobalEnv::new(),
            registry: ProgramRegistry::new(),
            required_libraries: Vec::new(),
            next_proof_key: 0,
        }
    }

    pub fn env(&self) -> &GlobalEnv {
        &self.env
    }

    /// Direct access for seeding the environment with ambient declarations.
    pub fn env_mut(&mut self) -> &mut GlobalEnv {
        &mut self.env
    }

    pub fn open_programs(&self) -> Vec<ConstantName> {
        self.registry.names()
    }

    pub fn open_program_count(&self) -> usize {
        self.registry.open_count()
    }

    /// The unique open program, or an error listing all open names.
    pub fn get_unique_open_prog(&self, name: Option<&ConstantName>) -> Result<ConstantName> {
        self.registry.resolve(name)
    }

    /// A fresh identifier for keying a deferred proof computation.
    pub fn fresh_proof_key(&mut self) -> u64 {
        self.next_proof_key += 1;
        self.next_proof_key
    }

    pub fn require_library(&mut self, name: ConstantName) {
        self.required_libraries.push(name);
    }

    /// Checks that the supporting libraries program mode needs are loaded.
    pub fn check_program_libraries(&self) -> Result<()> {
        for lib in &self.required_libraries {
            if !self.env.contains(lib) {
                return Err(Error::LibraryNotLoaded(lib.clone()));
            }
        }
        Ok(())
    }

    /// Starts a program for a single definition whose term still contains
    /// obligation holes. Every obligation with a default strategy is
    /// attempted right away, repeatedly, until no further progress is made;
    /// if that closes everything the declaration is registered before this
    /// returns.
    pub fn add_definition(
        &mut self,
        member: MemberDef,
        obligations: Vec<Obligation>,
        options: ProgramOptions,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        self.add_program(
            RecursionKind::Definition,
            vec![member],
            obligations,
            options,
            events,
        )
    }

    /// The mutually recursive variant. All members share one obligation
    /// sequence; hole positions index into it across the whole group.
    pub fn add_mutual_definitions(
        &mut self,
        kind: RecursionKind,
        members: Vec<MemberDef>,
        obligations: Vec<Obligation>,
        options: ProgramOptions,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        self.add_program(kind, members, obligations, options, events)
    }

    fn add_program(
        &mut self,
        kind: RecursionKind,
        members: Vec<MemberDef>,
        obligations: Vec<Obligation>,
        options: ProgramOptions,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        for member in &members {
            if self.env.contains(&member.name) {
                return Err(Error::AlreadyDeclared(member.name.clone()));
            }
        }
        let members: Vec<Member> = members
            .into_iter()
            .map(|m| Member {
                name: m.name,
                ty: m.ty,
                skeleton: m.skeleton,
                args: m.args,
            })
            .collect();
        let mut program = ProgramDeclaration::new(kind, members, obligations, options.visibility)
            .with_notations(options.notations)
            .with_waits_on(options.waits_on)
            .with_universes(options.universes);
        for hook in options.hooks {
            program.add_hook(hook);
        }
        let key = program.name.clone();
        self.registry.insert(program)?;

        self.auto_pass(&key, None, events)?;
        self.conclude(&key, events)
    }

    /// Opens an interactive proof for one obligation, chosen by position or
    /// name. The optional tactic (falling back to the obligation's default
    /// strategy) becomes the proof's pending cleanup.
    pub fn obligation(
        &self,
        selector: OblSelector,
        program: Option<&ConstantName>,
        tactic: Option<Arc<dyn Tactic>>,
    ) -> Result<ProofState> {
        let key = self.registry.resolve(program)?;
        let prog = self.registry.get(&key).unwrap();
        let index = match &selector {
            OblSelector::Index(i) => {
                if *i >= prog.obligations().len() {
                    return Err(Error::UnknownObligation {
                        program: key,
                        target: i.to_string(),
                    });
                }
                *i
            }
            OblSelector::Name(name) => {
                prog.find_obligation(name)
                    .ok_or_else(|| Error::UnknownObligation {
                        program: key.clone(),
                        target: name.clone(),
                    })?
            }
        };
        let obl = &prog.obligations()[index];
        if obl.is_solved() {
            return Err(Error::UnknownObligation {
                program: key,
                target: format!("{} (already solved)", obl.name),
            });
        }
        let goal_ty = obligation::grounded_goal_type(prog.obligations(), index)?;
        let mut state = ProofState::new(
            ProofEnding::Obligation {
                program: key,
                index,
            },
            ProofGoal::conclude(goal_ty),
        );
        if let Some(t) = tactic.or_else(|| obl.default_strategy.clone()) {
            state = state.with_cleanup(t);
        }
        Ok(state)
    }

    /// Opens the first attemptable obligation, lowest position first.
    pub fn next_obligation(
        &self,
        program: Option<&ConstantName>,
        tactic: Option<Arc<dyn Tactic>>,
    ) -> Result<ProofState> {
        let key = self.registry.resolve(program)?;
        let prog = self.registry.get(&key).unwrap();
        let index = prog
            .next_attemptable()
            .ok_or_else(|| Error::NoObligationsRemain(key.clone()))?;
        self.obligation(OblSelector::Index(index), Some(&key), tactic)
    }

    /// Opens an interactive proof for a standalone theorem.
    pub fn start_theorem(
        &self,
        name: ConstantName,
        ty: Term,
        visibility: Visibility,
    ) -> Result<ProofState> {
        if self.env.contains(&name) {
            return Err(Error::AlreadyDeclared(name));
        }
        let goal = ProofGoal::conclude(ty.clone());
        Ok(ProofState::new(
            ProofEnding::Regular {
                name,
                ty,
                visibility,
            },
            goal,
        ))
    }

    /// Consumes a closed proof and routes it by its ending kind. This is the
    /// declaration finalizer's entry point.
    pub fn finish(
        &mut self,
        closed: ClosedProof,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<FinishResult> {
        let ClosedProof {
            ending,
            opacity,
            key: _,
            result,
        } = closed;
        match ending {
            ProofEnding::Regular {
                name,
                ty,
                visibility,
            } => self.finish_regular(name, ty, visibility, opacity, result),
            ProofEnding::Obligation { program, index } => match result {
                ClosedResult::Proved(payload) => {
                    let payload = payload.into_inner();
                    let term = payload
                        .terms
                        .into_iter()
                        .next()
                        .expect("proved payload with no term");
                    self.update_obls(&program, index, term, payload.universes, events)
                        .map(FinishResult::Obligation)
                }
                ClosedResult::Admitted { .. } => {
                    let key = self.registry.resolve(Some(&program))?;
                    self.check_open_obligation(&key, index)?;
                    finalizer::admit_obligation(
                        &mut self.env,
                        self.registry.get_mut(&key).unwrap(),
                        index,
                    )?;
                    self.registry.get_mut(&key).unwrap().admitted = true;
                    self.emit_admitted(&key, index, events);
                    self.auto_pass(&key, None, events)?;
                    self.conclude(&key, events).map(FinishResult::Obligation)
                }
            },
            ProofEnding::Derive { finish } | ProofEnding::Equations { finish } => match result {
                ClosedResult::Proved(payload) => {
                    let payload = payload.into_inner();
                    let mut used = BTreeSet::new();
                    for term in &payload.terms {
                        used.extend(term.universe_vars());
                    }
                    let minimized = payload.universes.restrict(&used);
                    finish(&minimized, &payload.terms).map_err(Error::FinishFailed)?;
                    Ok(FinishResult::Delegated)
                }
                ClosedResult::Admitted { .. } => Err(Error::FinishFailed(
                    "a derive or equations proof cannot be admitted".to_string(),
                )),
            },
        }
    }

    fn finish_regular(
        &mut self,
        name: ConstantName,
        ty: Term,
        visibility: Visibility,
        opacity: Opacity,
        result: ClosedResult,
    ) -> Result<FinishResult> {
        match result {
            ClosedResult::Proved(payload) => {
                let payload = payload.into_inner();
                let term = payload
                    .terms
                    .into_iter()
                    .next()
                    .expect("proved payload with no term");
                let mut used = ty.universe_vars();
                used.extend(term.universe_vars());
                let universes = payload.universes.restrict(&used);
                let (re, _) = self.env.register(Declaration {
                    name: name.clone(),
                    ty,
                    body: Some(term),
                    universes,
                    opacity,
                    visibility,
                    admitted: false,
                })?;
                Ok(FinishResult::Registered(vec![FinalizeReport {
                    program: name,
                    refs: vec![re],
                    hook_failures: Vec::new(),
                    admitted: false,
                }]))
            }
            ClosedResult::Admitted { universes, .. } => {
                let used = ty.universe_vars();
                let universes = universes.restrict(&used);
                let (re, _) = self.env.register(Declaration {
                    name: name.clone(),
                    ty,
                    body: None,
                    universes,
                    opacity: Opacity::Opaque,
                    visibility,
                    admitted: true,
                })?;
                Ok(FinishResult::Registered(vec![FinalizeReport {
                    program: name,
                    refs: vec![re],
                    hook_failures: Vec::new(),
                    admitted: true,
                }]))
            }
        }
    }

    /// Stores a solved term for one obligation and cascades: the default
    /// strategy pass reruns, and if that closes the program it is assembled
    /// and registered before this returns.
    pub fn update_obls(
        &mut self,
        program: &ConstantName,
        index: usize,
        term: Term,
        universes: UniverseContext,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        let key = self.registry.resolve(Some(program))?;
        self.check_open_obligation(&key, index)?;
        finalizer::declare_obligation(
            &mut self.env,
            self.registry.get_mut(&key).unwrap(),
            index,
            term,
            universes,
        )?;
        let obl_name = self.registry.get(&key).unwrap().obligations()[index]
            .name
            .clone();
        events(SolveEvent {
            program: key.clone(),
            obligation: Some(obl_name),
            kind: SolveEventKind::Solved,
        });
        self.auto_pass(&key, None, events)?;
        self.conclude(&key, events)
    }

    /// Force-closes every remaining obligation of a program with an
    /// admitted placeholder, then proceeds exactly as if they were solved.
    /// The resulting declaration is marked as depending on an admitted
    /// assumption.
    pub fn admit_obligations(
        &mut self,
        program: Option<&ConstantName>,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        let key = self.registry.resolve(program)?;
        let mut admitted_any = false;
        loop {
            // Admit in dependency order so each placeholder's type grounds.
            let next = {
                let prog = self.registry.get(&key).unwrap();
                let obls = prog.obligations();
                (0..obls.len())
                    .find(|&i| !obls[i].is_solved() && obligation::attemptable(obls, i))
            };
            let Some(index) = next else {
                break;
            };
            finalizer::admit_obligation(
                &mut self.env,
                self.registry.get_mut(&key).unwrap(),
                index,
            )?;
            self.emit_admitted(&key, index, events);
            admitted_any = true;
        }
        let prog = self.registry.get_mut(&key).unwrap();
        assert!(
            prog.all_solved(),
            "admitting left obligations open in '{}'",
            key
        );
        if admitted_any {
            prog.admitted = true;
        }
        self.conclude(&key, events)
    }

    /// Fails loudly if any open program still has unsolved obligations.
    /// This is the check a scope boundary runs before it is allowed to
    /// close; open obligations never leak past it silently.
    pub fn check_solved_obligations(&self) -> Result<()> {
        let unsolved: Vec<(ConstantName, usize)> = self
            .registry
            .iter()
            .filter(|p| p.remaining_count() > 0)
            .map(|p| (p.name.clone(), p.remaining_count()))
            .collect();
        if unsolved.is_empty() {
            Ok(())
        } else {
            Err(Error::UnsolvedObligations { programs: unsolved })
        }
    }

    /// Drops an open program without finishing it.
    pub fn abandon_program(&mut self, name: &ConstantName) -> Result<()> {
        let key = self.registry.resolve(Some(name))?;
        self.registry.remove(&key);
        Ok(())
    }

    /// Status for one program, or for every open program.
    pub fn show_obligations(&self, program: Option<&ConstantName>) -> Result<Vec<ProgramSnapshot>> {
        match program {
            Some(name) => {
                let key = self.registry.resolve(Some(name))?;
                Ok(vec![snapshot(self.registry.get(&key).unwrap())])
            }
            None => Ok(self.registry.iter().map(snapshot).collect()),
        }
    }

    /// Renders the program's members with every solved obligation
    /// substituted in and every open one shown by name.
    pub fn show_term(&self, program: Option<&ConstantName>) -> Result<String> {
        let key = self.registry.resolve(program)?;
        let prog = self.registry.get(&key).unwrap();
        let mut map = std::collections::BTreeMap::new();
        for (i, obl) in prog.obligations().iter().enumerate() {
            let term = if obl.is_solved() {
                obl.contribution(false)?
            } else {
                Term::var(format!("?{}", obl.name))
            };
            map.insert(i, term);
        }
        let mut out = String::new();
        for member in &prog.members {
            let head = if member.args.is_empty() {
                member.name.to_string()
            } else {
                format!("{} {}", member.name, member.args.join(" "))
            };
            writeln!(
                out,
                "{} : {} :=\n  {}",
                head,
                member.ty.subst_holes(&map),
                member.skeleton.subst_holes(&map)
            )
            .unwrap();
        }
        Ok(out)
    }

    /// One attempt at one obligation. Returns whether it got solved.
    /// A tactic failure is reported through events, not raised.
    pub(crate) fn attempt_obligation(
        &mut self,
        key: &ConstantName,
        index: usize,
        tactic: &dyn Tactic,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<bool> {
        let (goal_ty, opacity, obl_name) = {
            let prog = self.registry.get(key).unwrap();
            let obls = prog.obligations();
            (
                obligation::grounded_goal_type(obls, index)?,
                obls[index].status.opacity,
                obls[index].name.clone(),
            )
        };
        let mut state = ProofState::new(
            ProofEnding::Obligation {
                program: key.clone(),
                index,
            },
            ProofGoal::conclude(goal_ty),
        );
        match state.by(tactic, &self.env) {
            Ok(_) => {}
            Err(Error::TacticFailure { message, .. }) => {
                events(SolveEvent {
                    program: key.clone(),
                    obligation: Some(obl_name),
                    kind: SolveEventKind::Failed(message),
                });
                return Ok(false);
            }
            Err(other) => return Err(other),
        }
        if state.get_open_goals() > 0 {
            let open = state.get_open_goals();
            events(SolveEvent {
                program: key.clone(),
                obligation: Some(obl_name),
                kind: SolveEventKind::LeftOpen(open),
            });
            return Ok(false);
        }
        let closed = state.close_proof(opacity, None)?;
        let ClosedResult::Proved(payload) = closed.result else {
            unreachable!("a proof closed with zero goals is proved");
        };
        let payload = payload.into_inner();
        let term = payload
            .terms
            .into_iter()
            .next()
            .expect("proved payload with no term");
        finalizer::declare_obligation(
            &mut self.env,
            self.registry.get_mut(key).unwrap(),
            index,
            term,
            payload.universes,
        )?;
        events(SolveEvent {
            program: key.clone(),
            obligation: Some(obl_name),
            kind: SolveEventKind::Solved,
        });
        Ok(true)
    }

    /// The fixed-point pass: attempt obligations in position order, lowest
    /// first, and repeat full sweeps until one makes no progress. Solving an
    /// early obligation can make a later one attemptable within the same
    /// call. With an override tactic every unsolved obligation is attempted;
    /// without one, only those carrying a default strategy.
    pub(crate) fn auto_pass(
        &mut self,
        key: &ConstantName,
        override_tactic: Option<&Arc<dyn Tactic>>,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<()> {
        loop {
            let mut progressed = false;
            let count = self.registry.get(key).unwrap().obligations().len();
            for index in 0..count {
                let tactic: Option<Arc<dyn Tactic>> = {
                    let prog = self.registry.get(key).unwrap();
                    let obls = prog.obligations();
                    if obls[index].is_solved() || !obligation::attemptable(obls, index) {
                        None
                    } else {
                        override_tactic
                            .cloned()
                            .or_else(|| obls[index].default_strategy.clone())
                    }
                };
                if let Some(tactic) = tactic {
                    if self.attempt_obligation(key, index, tactic.as_ref(), events)? {
                        progressed = true;
                    }
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    /// Reports how far the program is, finalizing it when it's ready.
    /// Finalization can cascade into dependent programs; a completion event
    /// fires for each one that finishes.
    pub(crate) fn conclude(
        &mut self,
        key: &ConstantName,
        events: &mut dyn FnMut(SolveEvent),
    ) -> Result<Progress> {
        let (ready, all_solved, remaining) = {
            let prog = self.registry.get(key).unwrap();
            (
                prog.ready_to_finalize(),
                prog.all_solved(),
                prog.remaining_count(),
            )
        };
        if !ready {
            return Ok(if all_solved {
                Progress::Dependent
            } else {
                Progress::Remain(remaining)
            });
        }
        let reports = finalizer::finalize_program(&mut self.env, &mut self.registry, key)?;
        for report in &reports {
            events(SolveEvent {
                program: report.program.clone(),
                obligation: None,
                kind: SolveEventKind::Completed(report.primary().clone()),
            });
            for failure in &report.hook_failures {
                events(SolveEvent {
                    program: report.program.clone(),
                    obligation: None,
                    kind: SolveEventKind::HookFailed(failure.clone()),
                });
            }
        }
        Ok(Progress::Defined(reports[0].primary().clone()))
    }

    fn check_open_obligation(&self, key: &ConstantName, index: usize) -> Result<()> {
        let prog = self.registry.get(key).unwrap();
        let obl = prog
            .obligation(index)
            .ok_or_else(|| Error::UnknownObligation {
                program: key.clone(),
                target: index.to_string(),
            })?;
        if obl.is_solved() {
            return Err(Error::UnknownObligation {
                program: key.clone(),
                target: format!("{} (already solved)", obl.name),
            });
        }
        Ok(())
    }

    fn emit_admitted(
        &self,
        key: &ConstantName,
        index: usize,
        events: &mut dyn FnMut(SolveEvent),
    ) {
        let name = self.registry.get(key).unwrap().obligations()[index]
            .name
            .clone();
        events(SolveEvent {
            program: key.clone(),
            obligation: Some(name),
            kind: SolveEventKind::Admitted,
        });
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

fn snapshot(program: &ProgramDeclaration) -> ProgramSnapshot {
    ProgramSnapshot {
        name: program.name.to_string(),
        members: program
            .member_names()
            .iter()
            .map(|n| n.to_string())
            .collect(),
        remaining: program.remaining_count(),
        admitted: program.admitted,
        dependent: !program.waits_on.is_empty(),
        obligations: program
            .obligations()
            .iter()
            .map(|o| ObligationSnapshot {
                name: o.name.to_string(),
                goal: o.goal_type.to_string(),
                solved: o.is_solved(),
                deps: o.deps.iter().copied().collect(),
                location: format!("{}:{}", o.location.source, o.location.first_line),
            })
            .collect(),
    }
}

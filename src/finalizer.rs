use std::collections::{BTreeMap, BTreeSet};

use crate::env::{Declaration, GlobalEnv, GlobalRef};
use crate::error::{Error, Result};
use crate::hooks::{fire_hooks, HookArgs};
use crate::names::ConstantName;
use crate::obligation::{self, OblBody, Opacity};
use crate::program::ProgramDeclaration;
use crate::registry::ProgramRegistry;
use crate::term::Term;
use crate::universe::UniverseContext;

/// What one finalization pass did: the declarations it registered, and any
/// hook failures. Hook failures are reported here rather than raised,
/// because the registration they follow is never rolled back.
#[derive(Debug)]
pub struct FinalizeReport {
    pub program: ConstantName,
    pub refs: Vec<GlobalRef>,
    pub hook_failures: Vec<String>,
    pub admitted: bool,
}

impl FinalizeReport {
    /// The primary member's reference.
    pub fn primary(&self) -> &GlobalRef {
        &self.refs[0]
    }
}

/// Stores a solved term for one obligation of a program.
///
/// An inlinable obligation keeps its term embedded; anything else becomes
/// its own named constant in the global store first, and the program holds
/// the reference. Nothing is stored if registration fails.
pub fn declare_obligation(
    env: &mut GlobalEnv,
    program: &mut ProgramDeclaration,
    index: usize,
    term: Term,
    universes: UniverseContext,
) -> Result<()> {
    let obl = program
        .obligation(index)
        .unwrap_or_else(|| panic!("obligation {} out of range", index));
    assert!(!obl.is_solved(), "obligation '{}' solved twice", obl.name);

    if obl.status.inlinable() {
        program.set_body(index, OblBody::Inline(term), universes);
        return Ok(());
    }

    // The constant needs a context that binds everything it mentions, even
    // though minimization for the owning declaration happens later.
    let ty = obligation::grounded_goal_type(program.obligations(), index)?;
    let mut decl_universes = universes.clone();
    for var in ty.universe_vars().union(&term.universe_vars()) {
        decl_universes.add_var(var.clone());
    }

    let decl = Declaration {
        name: obl.name.clone(),
        ty,
        body: Some(term.clone()),
        universes: decl_universes,
        opacity: obl.status.opacity,
        visibility: program.visibility,
        admitted: false,
    };
    let (re, _handle) = env.register(decl)?;
    program.set_body(index, OblBody::Named { re, term }, universes);
    Ok(())
}

/// Force-closes one obligation with an axiom-like placeholder: an admitted
/// constant of the obligation's grounded goal type, with no body. Dependents
/// see it as any other named opaque body.
pub fn admit_obligation(
    env: &mut GlobalEnv,
    program: &mut ProgramDeclaration,
    index: usize,
) -> Result<()> {
    let obl = program
        .obligation(index)
        .unwrap_or_else(|| panic!("obligation {} out of range", index));
    assert!(!obl.is_solved(), "admitting solved obligation '{}'", obl.name);

    let ty = obligation::grounded_goal_type(program.obligations(), index)?;
    let mut universes = UniverseContext::new();
    for var in ty.universe_vars() {
        universes.add_var(var);
    }
    let decl = Declaration {
        name: obl.name.clone(),
        ty,
        body: None,
        universes,
        opacity: Opacity::Opaque,
        visibility: program.visibility,
        admitted: true,
    };
    let (re, _handle) = env.register(decl)?;
    let term = Term::Const(re.name.clone());
    program.set_body(index, OblBody::Named { re, term }, UniverseContext::new());
    Ok(())
}

/// Assembles and registers a program whose obligations are all solved.
///
/// From the registry's point of view this is atomic: all names are checked
/// before anything is mutated, and the program is only removed once its
/// declarations are going in. Hooks fire exactly once, after removal.
/// Completing this program can unblock programs that were waiting on it;
/// those are re-checked and finalized in the same pass, so the returned
/// reports may cover more than one program.
pub fn finalize_program(
    env: &mut GlobalEnv,
    registry: &mut ProgramRegistry,
    name: &ConstantName,
) -> Result<Vec<FinalizeReport>> {
    let key = registry
        .resolve_member(name)
        .unwrap_or_else(|| panic!("finalizing '{}' which isn't open", name));
    let program = registry.get(&key).unwrap();
    assert!(
        program.ready_to_finalize(),
        "finalizing '{}' with {} obligations remaining",
        key,
        program.remaining_count()
    );

    // Ground every member by substituting the obligations' stored terms,
    // in position order. Inline bodies fold in; named ones stay references.
    let all_indices: BTreeSet<usize> = (0..program.obligations().len()).collect();
    let contributions = obligation::substitute(false, program.obligations(), &all_indices)?;
    let map: BTreeMap<usize, Term> = contributions
        .iter()
        .map(|(i, term, _)| (*i, term.clone()))
        .collect();
    let grounded: Vec<(ConstantName, Term, Term)> = program
        .members
        .iter()
        .map(|m| {
            (
                m.name.clone(),
                m.ty.subst_holes(&map),
                m.skeleton.subst_holes(&map),
            )
        })
        .collect();

    // Minimize the accumulated universe state against what the final terms
    // actually use. This happens here and nowhere else.
    let mut used = BTreeSet::new();
    for (_, ty, body) in &grounded {
        used.extend(ty.universe_vars());
        used.extend(body.universe_vars());
    }
    let minimized = program.universes.restrict(&used);

    // All or nothing: check every name before registering any.
    for (member_name, _, _) in &grounded {
        if env.contains(member_name) {
            return Err(Error::AlreadyDeclared(member_name.clone()));
        }
    }

    let obligation_terms: Vec<(ConstantName, Term)> = contributions
        .into_iter()
        .map(|(i, term, _)| (program.obligations()[i].name.clone(), term))
        .collect();

    // Committed now. The program leaves the registry before anything else
    // observes the session.
    let mut program = registry.remove(&key).unwrap();
    let visibility = program.visibility;
    let admitted = program.admitted;

    let mut refs = Vec::new();
    let mut handle = env.handle();
    for (member_name, ty, body) in grounded {
        env.assert_fresh(handle);
        let (re, fresh) = env.register(Declaration {
            name: member_name,
            ty,
            body: Some(body),
            universes: minimized.clone(),
            opacity: Opacity::Transparent,
            visibility,
            admitted,
        })?;
        handle = fresh;
        refs.push(re);
    }

    let hooks = std::mem::take(&mut program.hooks);
    env.assert_fresh(handle);
    let hook_failures = fire_hooks(
        hooks,
        env,
        &HookArgs {
            universes: &minimized,
            obligation_terms: &obligation_terms,
            visibility,
            refs: &refs,
        },
    );
    let mut reports = vec![FinalizeReport {
        program: key,
        refs,
        hook_failures,
        admitted,
    }];

    // Anything that was waiting on one of this program's members gets its
    // edge cleared, and may now be finishable itself.
    let finished: BTreeSet<ConstantName> = program.member_names().into_iter().collect();
    let waiting: Vec<ConstantName> = registry
        .iter()
        .filter(|p| p.waits_on.iter().any(|w| finished.contains(w)))
        .map(|p| p.name.clone())
        .collect();
    for waiter in waiting {
        let ready = {
            let p = registry.get_mut(&waiter).unwrap();
            p.waits_on.retain(|w| !finished.contains(w));
            p.ready_to_finalize()
        };
        if ready {
            reports.extend(finalize_program(env, registry, &waiter)?);
        }
    }
    Ok(reports)
}

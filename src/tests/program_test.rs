use std::collections::BTreeSet;

use crate::error::Error;
use crate::names::ConstantName;
use crate::program::{Progress, RecursionKind};
use crate::proof_state::ClosedResult;
use crate::session::OblSelector;
use crate::term::Term;
use crate::universe::{ConstraintKind, UniverseContext};

use super::common::*;

fn name(s: &str) -> ConstantName {
    ConstantName::new(s)
}

#[test]
fn test_zero_obligations_is_defined_immediately() {
    let mut session = base_session();
    let progress = session
        .add_definition(member("f", 0), Vec::new(), options(), &mut |_| {})
        .unwrap();
    match progress {
        Progress::Defined(re) => assert_eq!(re.name.as_str(), "f"),
        other => panic!("expected Defined, got {}", other),
    }
    assert_eq!(session.open_program_count(), 0);
    assert!(session.env().contains(&name("f")));
}

#[test]
fn test_remaining_count_matches_snapshots_at_every_step() {
    let mut session = base_session();
    let progress = session
        .add_definition(
            member("f", 2),
            vec![obl("f_obligation_1", &[]), obl("f_obligation_2", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap();
    assert_eq!(progress, Progress::Remain(2));
    assert_eq!(session.show_obligations(None).unwrap()[0].remaining, 2);

    let progress = session
        .update_obls(
            &name("f"),
            0,
            Term::constant("tt"),
            UniverseContext::new(),
            &mut |_| {},
        )
        .unwrap();
    assert_eq!(progress, Progress::Remain(1));
    let snapshot = &session.show_obligations(None).unwrap()[0];
    assert_eq!(snapshot.remaining, 1);
    assert_eq!(
        snapshot.obligations.iter().filter(|o| !o.solved).count(),
        snapshot.remaining
    );
}

#[test]
fn test_default_strategies_cascade_to_defined() {
    let mut session = base_session();
    let obligations = vec![
        obl("f_obligation_1", &[]).with_strategy(exact_tt()),
        obl("f_obligation_2", &[0]).with_strategy(close_anything()),
        obl("f_obligation_3", &[1]).with_strategy(close_anything()),
    ];
    let progress = session
        .add_definition(member("f", 3), obligations, options(), &mut |_| {})
        .unwrap();
    assert!(matches!(progress, Progress::Defined(_)));
    assert_eq!(session.open_program_count(), 0);

    let decl = session.env().get(&name("f")).unwrap();
    assert_eq!(
        decl.body.as_ref().unwrap(),
        &Term::apply(
            Term::constant("triple"),
            vec![
                Term::constant("tt"),
                Term::constant("tt"),
                Term::constant("tt")
            ]
        )
    );
}

#[test]
fn test_solving_order_does_not_change_the_result() {
    // Solve the chain in plain order in one session.
    let mut first = base_session();
    first
        .add_definition(member("f", 3), chain_obligations("f"), options(), &mut |_| {})
        .unwrap();
    let mut ctx = UniverseContext::new();
    ctx.add_constraint("u", ConstraintKind::Le, "v");
    for index in 0..3 {
        first
            .update_obls(&name("f"), index, Term::constant("tt"), ctx.clone(), &mut |_| {})
            .unwrap();
    }

    // In the other session, attempting the last obligation early fails
    // because its dependencies have no bodies yet.
    let mut second = base_session();
    second
        .add_definition(member("f", 3), chain_obligations("f"), options(), &mut |_| {})
        .unwrap();
    second
        .update_obls(&name("f"), 0, Term::constant("tt"), ctx.clone(), &mut |_| {})
        .unwrap();
    let err = second
        .obligation(OblSelector::Index(2), None, None)
        .unwrap_err();
    assert!(matches!(err, Error::UnsolvedDependency(_)));

    second
        .update_obls(&name("f"), 1, Term::constant("tt"), ctx.clone(), &mut |_| {})
        .unwrap();
    let mut state = second.obligation(OblSelector::Index(2), None, None).unwrap();
    state.by(exact_tt().as_ref(), second.env()).unwrap();
    let closed = state
        .close_proof(crate::obligation::Opacity::Transparent, None)
        .unwrap();
    second.finish(closed, &mut |_| {}).unwrap();

    // Same final term, same final universe context.
    let a = first.env().get(&name("f")).unwrap();
    let b = second.env().get(&name("f")).unwrap();
    assert_eq!(a.body, b.body);
    assert_eq!(a.universes, b.universes);
    assert_eq!(first.open_program_count(), 0);
    assert_eq!(second.open_program_count(), 0);
}

#[test]
fn test_admit_obligations_leaves_an_admitted_marker() {
    let mut session = base_session();
    session
        .add_definition(
            member("f", 2),
            vec![obl("f_obligation_1", &[]), obl("f_obligation_2", &[0])],
            options(),
            &mut |_| {},
        )
        .unwrap();

    let progress = session.admit_obligations(None, &mut |_| {}).unwrap();
    assert!(matches!(progress, Progress::Defined(_)));

    // Nothing is open anymore, so a status report shows zero remaining.
    assert!(session.show_obligations(None).unwrap().is_empty());

    // The declaration and its placeholders carry the admitted marker.
    assert!(session.env().get(&name("f")).unwrap().admitted);
    let placeholder = session.env().get(&name("f_obligation_1")).unwrap();
    assert!(placeholder.admitted);
    assert!(placeholder.body.is_none());
}

#[test]
fn test_dependent_program_completes_when_its_blocker_does() {
    let mut session = base_session();
    session
        .add_definition(
            member("a", 1),
            vec![obl("a_obligation_1", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap();

    let mut opts = options();
    opts.waits_on = BTreeSet::from([name("a")]);
    let progress = session
        .add_definition(member("b", 0), Vec::new(), opts, &mut |_| {})
        .unwrap();
    assert_eq!(progress, Progress::Dependent);
    assert_eq!(session.open_program_count(), 2);

    // Finishing a's one obligation finalizes a, which unblocks b.
    let progress = session
        .update_obls(
            &name("a"),
            0,
            Term::constant("tt"),
            UniverseContext::new(),
            &mut |_| {},
        )
        .unwrap();
    assert!(matches!(progress, Progress::Defined(_)));
    assert_eq!(session.open_program_count(), 0);
    assert!(session.env().contains(&name("a")));
    assert!(session.env().contains(&name("b")));
}

#[test]
fn test_name_collisions_are_rejected_without_corrupting_state() {
    let mut session = base_session();
    let err = session
        .add_definition(member("tt", 0), Vec::new(), options(), &mut |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyDeclared(_)));

    session
        .add_definition(
            member("f", 1),
            vec![obl("f_obligation_1", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap();
    let err = session
        .add_definition(
            member("f", 1),
            vec![obl("f_obligation_1", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyDeclared(_)));

    // The first program is still open and still solvable.
    assert_eq!(session.open_program_count(), 1);
    let progress = session
        .update_obls(
            &name("f"),
            0,
            Term::constant("tt"),
            UniverseContext::new(),
            &mut |_| {},
        )
        .unwrap();
    assert!(matches!(progress, Progress::Defined(_)));
}

#[test]
fn test_universe_context_is_minimized_once_at_the_end() {
    let mut session = base_session();
    let mut m = member("f", 1);
    // The declared type mentions u; nothing mentions v.
    m.ty = Term::Sort("u".to_string());
    session
        .add_definition(m, vec![obl("f_obligation_1", &[])], options(), &mut |_| {})
        .unwrap();

    let mut ctx = UniverseContext::new();
    ctx.add_constraint("u", ConstraintKind::Lt, "v");
    session
        .update_obls(&name("f"), 0, Term::constant("tt"), ctx, &mut |_| {})
        .unwrap();

    let decl = session.env().get(&name("f")).unwrap();
    assert!(decl.universes.contains_var("u"));
    assert!(!decl.universes.contains_var("v"));
    // The u < v constraint lost its endpoint, so it went too.
    assert_eq!(decl.universes.constraints().count(), 0);
}

#[test]
fn test_mutual_group_registers_all_members() {
    let mut session = base_session();
    let progress = session
        .add_mutual_definitions(
            RecursionKind::Fixpoint,
            vec![member("even", 1), member("odd", 0)],
            vec![obl("even_obligation_1", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap();
    assert_eq!(progress, Progress::Remain(1));

    // The group resolves under either member's name.
    let mut state = session
        .next_obligation(Some(&name("odd")), None)
        .unwrap();
    state.by(exact_tt().as_ref(), session.env()).unwrap();
    let closed = state
        .close_proof(crate::obligation::Opacity::Transparent, None)
        .unwrap();
    let result = session.finish(closed, &mut |_| {}).unwrap();
    match result {
        crate::session::FinishResult::Obligation(Progress::Defined(re)) => {
            assert_eq!(re.name.as_str(), "even");
        }
        _ => panic!("expected the group to finish"),
    }
    assert!(session.env().contains(&name("even")));
    assert!(session.env().contains(&name("odd")));
}

#[test]
fn test_admitted_single_obligation_marks_the_program() {
    let mut session = base_session();
    session
        .add_definition(
            member("f", 1),
            vec![obl("f_obligation_1", &[])],
            options(),
            &mut |_| {},
        )
        .unwrap();

    let state = session.next_obligation(None, None).unwrap();
    let closed = state.admit();
    assert!(matches!(closed.result, ClosedResult::Admitted { .. }));
    let result = session.finish(closed, &mut |_| {}).unwrap();
    assert!(matches!(
        result,
        crate::session::FinishResult::Obligation(Progress::Defined(_))
    ));
    assert!(session.env().get(&name("f")).unwrap().admitted);
}

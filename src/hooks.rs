use crate::env::{GlobalEnv, GlobalRef};
use crate::names::{ConstantName, Visibility};
use crate::term::Term;
use crate::universe::UniverseContext;

/// Everything a hook gets to see about the declaration that was just
/// registered.
pub struct HookArgs<'a> {
    /// The final, minimized universe state.
    pub universes: &'a UniverseContext,

    /// The concrete term each obligation ended up with, in position order.
    pub obligation_terms: &'a [(ConstantName, Term)],

    pub visibility: Visibility,

    /// The registered declarations, primary member first.
    pub refs: &'a [GlobalRef],
}

/// A post-registration callback, registered when the program is started and
/// invoked exactly once after its declaration is registered. Hooks may
/// register further declarations through the environment they are handed.
pub type Hook = Box<dyn FnOnce(&mut GlobalEnv, &HookArgs) -> Result<(), String>>;

/// Runs every hook once, in registration order. A failing hook is recorded
/// and the rest still run; nothing is rolled back, since the declaration is
/// already registered.
pub fn fire_hooks(hooks: Vec<Hook>, env: &mut GlobalEnv, args: &HookArgs) -> Vec<String> {
    let mut failures = Vec::new();
    for hook in hooks {
        if let Err(message) = hook(env, args) {
            failures.push(message);
        }
    }
    failures
}

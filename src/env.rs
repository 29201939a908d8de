use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::names::{ConstantName, Visibility};
use crate::obligation::Opacity;
use crate::term::Term;
use crate::universe::UniverseContext;

/// A reference to a declaration that has made it into the global store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRef {
    pub name: ConstantName,
}

impl GlobalRef {
    pub fn new(name: ConstantName) -> GlobalRef {
        GlobalRef { name }
    }
}

/// One permanently registered declaration.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: ConstantName,
    pub ty: Term,

    /// None for axioms, including the placeholders created by admitting.
    pub body: Option<Term>,

    pub universes: UniverseContext,
    pub opacity: Opacity,
    pub visibility: Visibility,

    /// Whether this declaration depends on an admitted assumption.
    pub admitted: bool,
}

/// A generation-stamped view of the global environment.
///
/// Registration invalidates every previously issued handle. Code that runs
/// between side effects of the same pass must re-acquire a handle after each
/// one; reading through a stale handle is an internal defect and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvHandle(u64);

/// The global store of finished declarations. This is the engine's entire
/// view of the kernel: register a fully elaborated term, look up what has
/// been registered.
pub struct GlobalEnv {
    decls: BTreeMap<ConstantName, Declaration>,
    generation: u64,
}

impl GlobalEnv {
    pub fn new() -> GlobalEnv {
        GlobalEnv {
            decls: BTreeMap::new(),
            generation: 0,
        }
    }

    pub fn handle(&self) -> EnvHandle {
        EnvHandle(self.generation)
    }

    /// Panics when the handle predates a side effect. Finalize passes call
    /// this before every read that follows a registration.
    pub fn assert_fresh(&self, handle: EnvHandle) {
        if handle.0 != self.generation {
            panic!(
                "stale environment view: handle generation {} but environment is at {}",
                handle.0, self.generation
            );
        }
    }

    pub fn contains(&self, name: &ConstantName) -> bool {
        self.decls.contains_key(name)
    }

    pub fn get(&self, name: &ConstantName) -> Option<&Declaration> {
        self.decls.get(name)
    }

    pub fn declared_type(&self, name: &ConstantName) -> Option<&Term> {
        self.decls.get(name).map(|d| &d.ty)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Registers a declaration, after checking that it really is fully
    /// elaborated: no leftover placeholders, no unknown constants, and every
    /// universe variable bound by its context. Success invalidates all
    /// previously issued handles.
    pub fn register(&mut self, decl: Declaration) -> Result<(GlobalRef, EnvHandle)> {
        if self.decls.contains_key(&decl.name) {
            return Err(Error::AlreadyDeclared(decl.name));
        }
        self.check_elaborated(&decl.ty, &decl);
        if let Some(body) = &decl.body {
            self.check_elaborated(body, &decl);
        }

        let name = decl.name.clone();
        self.decls.insert(name.clone(), decl);
        self.generation += 1;
        Ok((GlobalRef::new(name), self.handle()))
    }

    fn check_elaborated(&self, term: &Term, decl: &Declaration) {
        // Placeholders of either kind mean the caller skipped assembly.
        // That is a bug in the calling pass, not a recoverable condition.
        assert!(
            term.is_ground(),
            "registering '{}' with unresolved placeholders: {}",
            decl.name,
            term
        );
        for constant in term.constants() {
            // Self-reference is allowed for recursive definitions.
            if constant != decl.name {
                assert!(
                    self.decls.contains_key(&constant),
                    "registering '{}' which mentions unknown constant '{}'",
                    decl.name,
                    constant
                );
            }
        }
        for var in term.universe_vars() {
            assert!(
                decl.universes.contains_var(&var),
                "registering '{}' with unbound universe variable '{}'",
                decl.name,
                var
            );
        }
    }
}

impl Default for GlobalEnv {
    fn default() -> GlobalEnv {
        GlobalEnv::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axiom(name: &str, ty: Term) -> Declaration {
        Declaration {
            name: ConstantName::new(name),
            ty,
            body: None,
            universes: UniverseContext::new(),
            opacity: Opacity::Opaque,
            visibility: Visibility::Public,
            admitted: false,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut env = GlobalEnv::new();
        let mut decl = axiom("nat", Term::Sort("u0".to_string()));
        decl.universes = UniverseContext::with_vars(["u0"]);
        let (re, _) = env.register(decl).unwrap();
        assert_eq!(re.name.as_str(), "nat");
        assert!(env.contains(&ConstantName::new("nat")));
        assert_eq!(
            env.declared_type(&ConstantName::new("nat")),
            Some(&Term::Sort("u0".to_string()))
        );
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut env = GlobalEnv::new();
        let mut decl = axiom("nat", Term::constant("nat"));
        decl.ty = Term::var("unused");
        env.register(decl.clone()).unwrap();
        let err = env.register(decl).unwrap_err();
        assert!(matches!(err, Error::AlreadyDeclared(_)));
    }

    #[test]
    fn test_handles_go_stale_after_registration() {
        let mut env = GlobalEnv::new();
        let before = env.handle();
        env.assert_fresh(before);
        env.register(axiom("t", Term::var("x"))).unwrap();
        assert_ne!(before, env.handle());
        env.assert_fresh(env.handle());
    }
}

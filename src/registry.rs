use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::names::ConstantName;
use crate::program::ProgramDeclaration;

/// All the programs currently open in a session, keyed by primary name.
///
/// This is deliberately an explicit value rather than ambient state: every
/// session owns its own registry, and tests can spin up as many independent
/// ones as they want.
pub struct ProgramRegistry {
    programs: BTreeMap<ConstantName, ProgramDeclaration>,
}

impl ProgramRegistry {
    pub fn new() -> ProgramRegistry {
        ProgramRegistry {
            programs: BTreeMap::new(),
        }
    }

    pub fn open_count(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Open program names in sorted order.
    pub fn names(&self) -> Vec<ConstantName> {
        self.programs.keys().cloned().collect()
    }

    /// Maps any member name to the primary name of its group.
    pub fn resolve_member(&self, name: &ConstantName) -> Option<ConstantName> {
        if self.programs.contains_key(name) {
            return Some(name.clone());
        }
        self.programs
            .values()
            .find(|p| p.has_member(name))
            .map(|p| p.name.clone())
    }

    pub fn contains(&self, name: &ConstantName) -> bool {
        self.resolve_member(name).is_some()
    }

    pub fn get(&self, name: &ConstantName) -> Option<&ProgramDeclaration> {
        let key = self.resolve_member(name)?;
        self.programs.get(&key)
    }

    pub fn get_mut(&mut self, name: &ConstantName) -> Option<&mut ProgramDeclaration> {
        let key = self.resolve_member(name)?;
        self.programs.get_mut(&key)
    }

    /// Adds a freshly created program. The name must not collide with any
    /// open program or member.
    pub fn insert(&mut self, program: ProgramDeclaration) -> Result<()> {
        for member in program.member_names() {
            if self.contains(&member) {
                return Err(Error::AlreadyDeclared(member));
            }
        }
        self.programs.insert(program.name.clone(), program);
        Ok(())
    }

    /// Removes a completed or abandoned program by primary name.
    pub fn remove(&mut self, name: &ConstantName) -> Option<ProgramDeclaration> {
        self.programs.remove(name)
    }

    /// The single open program, when exactly one exists. Anything else is
    /// ambiguous and reports the full list of open names.
    pub fn unique_open(&self) -> Result<&ProgramDeclaration> {
        if self.programs.len() == 1 {
            Ok(self.programs.values().next().unwrap())
        } else {
            Err(Error::AmbiguousProgram { open: self.names() })
        }
    }

    /// Resolves an optional program name the way every command does: a
    /// given name must exist, no name means "the unique open program".
    pub fn resolve(&self, name: Option<&ConstantName>) -> Result<ConstantName> {
        match name {
            Some(name) => self
                .resolve_member(name)
                .ok_or_else(|| Error::UnknownProgram {
                    name: name.clone(),
                    open: self.names(),
                }),
            None => Ok(self.unique_open()?.name.clone()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProgramDeclaration> {
        self.programs.values()
    }
}

impl Default for ProgramRegistry {
    fn default() -> ProgramRegistry {
        ProgramRegistry::new()
    }
}

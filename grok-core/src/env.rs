#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::subst::Substitution;
use crate::types::{Scheme, TyVarId};

/// Lexically scoped name -> scheme map.
///
/// A scope is never mutated once a child has been created from it; shadowing
/// happens by binding the name again in the child.
#[derive(Clone, Debug, Default)]
pub struct TypeEnv {
    parent: Option<Arc<TypeEnv>>,
    bindings: BTreeMap<String, Scheme>,
}

impl TypeEnv {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(parent: &Arc<TypeEnv>) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            bindings: BTreeMap::new(),
        }
    }

    /// Convenience for the common "one new name" scope.
    pub fn extend(parent: &Arc<TypeEnv>, name: impl Into<String>, scheme: Scheme) -> Arc<TypeEnv> {
        let mut env = Self::child(parent);
        env.bind(name, scheme);
        Arc::new(env)
    }

    pub fn bind(&mut self, name: impl Into<String>, scheme: Scheme) {
        self.bindings.insert(name.into(), scheme);
    }

    pub fn lookup(&self, name: &str) -> Option<&Scheme> {
        match self.bindings.get(name) {
            Some(scheme) => Some(scheme),
            None => self.parent.as_ref().and_then(|p| p.lookup(name)),
        }
    }

    /// Variables free anywhere in the scope chain, after applying `subst`.
    pub fn free_type_vars(&self, subst: &Substitution) -> BTreeSet<TyVarId> {
        let mut out = BTreeSet::new();
        let mut frame = Some(self);
        while let Some(env) = frame {
            for scheme in env.bindings.values() {
                let quantified: BTreeSet<TyVarId> = scheme.vars.iter().map(|v| v.id).collect();
                for id in subst.apply(&scheme.ty).free_vars() {
                    if !quantified.contains(&id) {
                        out.insert(id);
                    }
                }
            }
            frame = env.parent.as_deref();
        }
        out
    }
}

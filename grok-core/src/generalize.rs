#![forbid(unsafe_code)]

//! Let-polymorphism: closing types over variables the environment does not
//! mention, and opening schemes again with fresh variables at each use.

use std::collections::{BTreeMap, BTreeSet};

use crate::subst::Substitution;
use crate::types::{Scheme, TyVar, TyVarId, Type};

/// Quantifies every variable of `ty` (after `subst`) not in `env_vars`.
///
/// Each quantified variable keeps the bound set the substitution recorded
/// for it.
pub fn generalize(ty: &Type, env_vars: &BTreeSet<TyVarId>, subst: &Substitution) -> Scheme {
    let ty = subst.apply(ty);
    let vars = ty
        .free_vars()
        .into_iter()
        .filter(|id| !env_vars.contains(id))
        .map(|id| TyVar::bounded(id, subst.bounds_of(id)))
        .collect();
    Scheme { vars, ty }
}

/// Replaces the scheme's variables with fresh ones.
///
/// Returns the instantiated type and one `(type, trait)` obligation for every
/// bound carried by a quantified variable.
pub fn instantiate(
    scheme: &Scheme,
    fresh: &mut dyn FnMut() -> TyVarId,
) -> (Type, Vec<(Type, String)>) {
    if scheme.is_mono() {
        return (scheme.ty.clone(), Vec::new());
    }
    let mut map = BTreeMap::new();
    let mut obligations = Vec::new();
    for var in &scheme.vars {
        let fresh_var = Type::Variable(TyVar::bounded(fresh(), var.bounds.iter().cloned()));
        for bound in &var.bounds {
            obligations.push((fresh_var.clone(), bound.clone()));
        }
        map.insert(var.id, fresh_var);
    }
    (scheme.ty.substitute_vars(&map), obligations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter(start: u32) -> impl FnMut() -> TyVarId {
        let mut next = start;
        move || {
            next += 1;
            TyVarId(next - 1)
        }
    }

    #[test]
    fn environment_variables_stay_monomorphic() {
        let subst = Substitution::new();
        let ty = Type::func(vec![Type::var(0)], Type::var(1));
        let env: BTreeSet<TyVarId> = [TyVarId(1)].into_iter().collect();
        let scheme = generalize(&ty, &env, &subst);
        let quantified: Vec<TyVarId> = scheme.vars.iter().map(|v| v.id).collect();
        assert_eq!(quantified, vec![TyVarId(0)]);
    }

    #[test]
    fn each_instantiation_gets_independent_variables() {
        let scheme = Scheme {
            vars: vec![TyVar::new(TyVarId(0))],
            ty: Type::func(vec![Type::var(0)], Type::var(0)),
        };
        let mut fresh = counter(10);
        let (a, _) = instantiate(&scheme, &mut fresh);
        let (b, _) = instantiate(&scheme, &mut fresh);
        assert_eq!(a, Type::func(vec![Type::var(10)], Type::var(10)));
        assert_eq!(b, Type::func(vec![Type::var(11)], Type::var(11)));
    }

    #[test]
    fn bounds_become_obligations() {
        let mut subst = Substitution::new();
        subst.add_bound(TyVarId(0), "Show");
        let scheme = generalize(&Type::var(0), &BTreeSet::new(), &subst);
        assert!(scheme.vars[0].bounds.contains("Show"));
        let mut fresh = counter(5);
        let (ty, obligations) = instantiate(&scheme, &mut fresh);
        assert_eq!(obligations, vec![(ty, "Show".to_string())]);
    }
}

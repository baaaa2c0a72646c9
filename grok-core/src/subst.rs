#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{MethodSig, StructType, TraitType, TyVar, TyVarId, Type};

/// Solved bindings for type variables, plus the bound sets of unsolved ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Substitution {
    map: BTreeMap<TyVarId, Type>,
    bounds: BTreeMap<TyVarId, BTreeSet<String>>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, id: TyVarId) -> Option<&Type> {
        self.map.get(&id)
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&TyVarId, &Type)> {
        self.map.iter()
    }

    /// Binds an unsolved variable. The caller has already run the occurs check.
    ///
    /// When the target is another variable its bound set absorbs the bound set
    /// of the variable being eliminated.
    pub fn bind(&mut self, id: TyVarId, ty: Type) {
        tracing::trace!(var = %id, ty = %ty, "bind");
        if let Type::Variable(target) = &ty {
            if let Some(moved) = self.bounds.remove(&id) {
                self.bounds.entry(target.id).or_default().extend(moved);
            }
        }
        self.map.insert(id, ty);
    }

    pub fn add_bound(&mut self, id: TyVarId, trait_name: &str) {
        self.bounds
            .entry(id)
            .or_default()
            .insert(trait_name.to_string());
    }

    pub fn bounds_of(&self, id: TyVarId) -> BTreeSet<String> {
        self.bounds.get(&id).cloned().unwrap_or_default()
    }

    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Variable(v) => match self.map.get(&v.id) {
                Some(target) => self.apply(target),
                None => {
                    let mut bounds = v.bounds.clone();
                    if let Some(extra) = self.bounds.get(&v.id) {
                        bounds.extend(extra.iter().cloned());
                    }
                    Type::Variable(TyVar { id: v.id, bounds })
                }
            },
            Type::Primitive(_) => ty.clone(),
            Type::Generic(name, args) => {
                Type::Generic(name.clone(), args.iter().map(|a| self.apply(a)).collect())
            }
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| self.apply(p)).collect(),
                Box::new(self.apply(ret)),
            ),
            Type::Struct(s) => Type::Struct(StructType {
                name: s.name.clone(),
                args: s.args.iter().map(|a| self.apply(a)).collect(),
                fields: s
                    .fields
                    .iter()
                    .map(|(n, t)| (n.clone(), self.apply(t)))
                    .collect(),
            }),
            Type::Trait(t) => Type::Trait(TraitType {
                name: t.name.clone(),
                methods: t
                    .methods
                    .iter()
                    .map(|m| MethodSig {
                        name: m.name.clone(),
                        params: m.params.iter().map(|p| self.apply(p)).collect(),
                        ret: self.apply(&m.ret),
                    })
                    .collect(),
            }),
            Type::Reference(m, lt, inner) => {
                Type::Reference(*m, lt.clone(), Box::new(self.apply(inner)))
            }
        }
    }

    /// Checks that the substitution is acyclic and that applying it twice
    /// gives the same result as applying it once.
    ///
    /// Returns a description of the first violation found.
    pub fn verify_idempotent(&self) -> Result<(), String> {
        if let Some(cycle) = self.find_cycle() {
            let rendered: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(format!("cyclic substitution: {}", rendered.join(" -> ")));
        }
        for (id, target) in &self.map {
            let once = self.apply(target);
            if once.occurs(*id) {
                return Err(format!("{id} occurs in its own solution {once}"));
            }
            let twice = self.apply(&once);
            if once != twice {
                return Err(format!(
                    "applying the substitution twice changed {id}: {once} became {twice}"
                ));
            }
        }
        Ok(())
    }

    fn find_cycle(&self) -> Option<Vec<TyVarId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            subst: &Substitution,
            id: TyVarId,
            marks: &mut BTreeMap<TyVarId, Mark>,
            path: &mut Vec<TyVarId>,
        ) -> Option<Vec<TyVarId>> {
            match marks.get(&id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|v| *v == id).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(id);
                    return Some(cycle);
                }
                None => {}
            }
            let target = subst.map.get(&id)?;
            marks.insert(id, Mark::Visiting);
            path.push(id);
            for next in target.free_vars() {
                if let Some(cycle) = visit(subst, next, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for id in self.map.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(self, *id, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Human-readable dump attached to internal errors.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (id, ty) in &self.map {
            out.push_str(&format!("{id} := {ty}\n"));
        }
        for (id, bounds) in &self.bounds {
            let names: Vec<&str> = bounds.iter().map(String::as_str).collect();
            out.push_str(&format!("{id}: {}\n", names.join(" + ")));
        }
        out
    }
}

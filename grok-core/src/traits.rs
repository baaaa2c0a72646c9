#![forbid(unsafe_code)]

//! Bound checking, impl selection and method dispatch.

use std::cell::Cell;
use std::collections::BTreeMap;

use grok_ast::Span;

use crate::error::{ErrorKind, SemanticError};
use crate::subst::Substitution;
use crate::symbols::{Assumption, ImplInfo, SymbolTable};
use crate::typed::{Dispatch, ReceiverMode};
use crate::types::{Mutability, Scheme, TUPLE, TyVar, TyVarId, Type};
use crate::unify::unify;

/// Variables at or above this id only live inside a single resolution.
pub const SCRATCH_BASE: u32 = 1 << 30;

const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Satisfied,
    /// Holds once the listed obligations hold; they mention unsolved variables.
    Deferred(Vec<(Type, String)>),
}

impl Resolution {
    fn and(self, other: Resolution) -> Resolution {
        match (self, other) {
            (Resolution::Satisfied, r) | (r, Resolution::Satisfied) => r,
            (Resolution::Deferred(mut a), Resolution::Deferred(b)) => {
                a.extend(b);
                Resolution::Deferred(a)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodTarget {
    pub dispatch: Dispatch,
    pub mode: ReceiverMode,
    /// Method type; the first parameter is the receiver.
    pub sig: Scheme,
    /// The receiver type after auto-dereferencing.
    pub self_ty: Type,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MethodLookup {
    Found(MethodTarget),
    /// The receiver type is not known well enough yet.
    Unknown,
}

pub struct TraitResolver<'a> {
    symbols: &'a SymbolTable,
    assumptions: Vec<Assumption>,
    next_scratch: Cell<u32>,
}

impl<'a> TraitResolver<'a> {
    pub fn new(symbols: &'a SymbolTable, assumptions: Vec<Assumption>) -> Self {
        Self {
            symbols,
            assumptions,
            next_scratch: Cell::new(SCRATCH_BASE),
        }
    }

    fn scratch_var(&self) -> TyVarId {
        let id = self.next_scratch.get();
        self.next_scratch.set(id + 1);
        TyVarId(id)
    }

    /// A `Generic(name, [])` that is neither an enum nor a struct is a rigid
    /// type parameter of the body being checked.
    pub fn is_rigid(&self, ty: &Type) -> Option<String> {
        match ty {
            Type::Generic(name, args)
                if args.is_empty()
                    && name != TUPLE
                    && !self.symbols.enums.contains_key(name)
                    && !self.symbols.structs.contains_key(name) =>
            {
                Some(name.clone())
            }
            _ => None,
        }
    }

    fn assumed(&self, param: &str, trait_name: &str) -> bool {
        self.assumptions
            .iter()
            .any(|a| a.param == param && a.trait_name == trait_name)
    }

    pub fn is_copy(&self, ty: &Type) -> bool {
        matches!(
            self.resolve_bound(ty, "Copy", Span::default()),
            Ok(Resolution::Satisfied)
        )
    }

    pub fn resolve_bound(
        &self,
        ty: &Type,
        trait_name: &str,
        span: Span,
    ) -> Result<Resolution, SemanticError> {
        let resolution = self.resolve_at(ty, trait_name, span, 0);
        tracing::trace!(ty = %ty, trait_name, ok = resolution.is_ok(), "resolve bound");
        resolution
    }

    fn resolve_at(
        &self,
        ty: &Type,
        trait_name: &str,
        span: Span,
        depth: usize,
    ) -> Result<Resolution, SemanticError> {
        if depth > MAX_DEPTH {
            return Err(SemanticError::new(
                ErrorKind::UnsatisfiedBound,
                span,
                format!("overflow evaluating the requirement `{ty}: {trait_name}`"),
            )
            .involving(ty.to_string())
            .involving(trait_name));
        }
        if let Type::Variable(v) = ty {
            if v.id.0 >= SCRATCH_BASE {
                return Ok(Resolution::Satisfied);
            }
            return Ok(Resolution::Deferred(vec![(ty.clone(), trait_name.to_string())]));
        }
        if let Some(param) = self.is_rigid(ty) {
            if self.assumed(&param, trait_name) {
                return Ok(Resolution::Satisfied);
            }
            return Err(self.unsatisfied(ty, trait_name, span)
                .with_related(span, format!("consider adding a `{param}: {trait_name}` bound")));
        }
        match trait_name {
            "Copy" => return self.resolve_copy(ty, span, depth),
            "Integer" => {
                return if ty.is_integer() {
                    Ok(Resolution::Satisfied)
                } else {
                    Err(self.unsatisfied(ty, trait_name, span))
                };
            }
            _ => {}
        }
        if let Type::Trait(t) = ty {
            if t.name == trait_name {
                return Ok(Resolution::Satisfied);
            }
        }
        self.select_impl(ty, trait_name, span, depth)
            .map(|(_, resolution)| resolution)
    }

    fn resolve_copy(&self, ty: &Type, span: Span, depth: usize) -> Result<Resolution, SemanticError> {
        match ty {
            Type::Primitive(_) | Type::Function(..) => Ok(Resolution::Satisfied),
            Type::Reference(Mutability::Shared, _, _) => Ok(Resolution::Satisfied),
            Type::Reference(Mutability::Exclusive, _, _) | Type::Trait(_) => {
                Err(self.unsatisfied(ty, "Copy", span))
            }
            Type::Generic(name, elems) if name == TUPLE => {
                let mut acc = Resolution::Satisfied;
                for e in elems {
                    acc = acc.and(self.resolve_at(e, "Copy", span, depth + 1)?);
                }
                Ok(acc)
            }
            _ => self
                .select_impl(ty, "Copy", span, depth)
                .map(|(_, resolution)| resolution),
        }
    }

    fn unsatisfied(&self, ty: &Type, trait_name: &str, span: Span) -> SemanticError {
        SemanticError::new(
            ErrorKind::UnsatisfiedBound,
            span,
            format!("the trait bound `{ty}: {trait_name}` is not satisfied"),
        )
        .involving(ty.to_string())
        .involving(trait_name)
    }

    /// Self type of `imp` with its parameters replaced by scratch variables.
    fn instantiate_impl(&self, imp: &ImplInfo) -> (Type, Vec<Type>) {
        let mut map = BTreeMap::new();
        let mut vars = Vec::new();
        for p in &imp.params {
            let v = Type::Variable(TyVar::new(self.scratch_var()));
            map.insert(p.name.clone(), v.clone());
            vars.push(v);
        }
        (imp.self_ty.substitute_params(&map), vars)
    }

    /// `Some(scratch)` when `target` is an instance of the impl's self type.
    /// The flag reports whether matching had to bind variables of `target`.
    fn match_impl(&self, imp: &ImplInfo, target: &Type) -> Option<(Substitution, Vec<Type>, bool)> {
        let (self_ty, vars) = self.instantiate_impl(imp);
        let mut scratch = Substitution::new();
        unify(&mut scratch, &self_ty, target, imp.span).ok()?;
        let conditional = scratch.bindings().any(|(id, _)| id.0 < SCRATCH_BASE);
        Some((scratch, vars, conditional))
    }

    /// True when `a`'s self type is an instance of `b`'s.
    fn instance_of(&self, a: &ImplInfo, b: &ImplInfo) -> bool {
        let (b_ty, _) = self.instantiate_impl(b);
        let mut scratch = Substitution::new();
        unify(&mut scratch, &b_ty, &a.self_ty, a.span).is_ok()
    }

    fn more_specific(&self, a: &ImplInfo, b: &ImplInfo) -> bool {
        self.instance_of(a, b) && !self.instance_of(b, a)
    }

    /// Picks the most specific impl whose self type matches `ty`, among `candidates`.
    fn most_specific<'c>(
        &self,
        candidates: &[&'c ImplInfo],
        ty: &Type,
        what: &str,
        span: Span,
    ) -> Result<&'c ImplInfo, SemanticError> {
        let maximal: Vec<&ImplInfo> = candidates
            .iter()
            .filter(|c| !candidates.iter().any(|o| o.index != c.index && self.more_specific(o, c)))
            .copied()
            .collect();
        match maximal.as_slice() {
            [only] => Ok(*only),
            _ => {
                let mut err = SemanticError::new(
                    ErrorKind::AmbiguousTraitResolution,
                    span,
                    format!("multiple applicable implementations of {what} for `{ty}`"),
                )
                .involving(ty.to_string())
                .involving(what);
                for c in &maximal {
                    err = err.with_related(c.span, format!("candidate `{}`", c.describe()));
                }
                Err(err)
            }
        }
    }

    fn select_impl(
        &self,
        ty: &Type,
        trait_name: &str,
        span: Span,
        depth: usize,
    ) -> Result<(usize, Resolution), SemanticError> {
        let mut matches = Vec::new();
        let mut conditional = false;
        for imp in self.symbols.impls_of(trait_name) {
            if let Some((scratch, vars, cond)) = self.match_impl(imp, ty) {
                conditional |= cond;
                matches.push((imp, scratch, vars));
            }
        }
        if matches.is_empty() {
            return Err(self.unsatisfied(ty, trait_name, span));
        }
        if conditional {
            return Ok((
                usize::MAX,
                Resolution::Deferred(vec![(ty.clone(), trait_name.to_string())]),
            ));
        }
        let candidates: Vec<&ImplInfo> = matches.iter().map(|(imp, _, _)| *imp).collect();
        let chosen = self.most_specific(&candidates, ty, &format!("`{trait_name}`"), span)?;
        let Some((imp, scratch, vars)) = matches.iter().find(|(imp, _, _)| imp.index == chosen.index)
        else {
            return Err(self.unsatisfied(ty, trait_name, span));
        };
        let mut acc = Resolution::Satisfied;
        for (param, var) in imp.params.iter().zip(vars) {
            let actual = scratch.apply(var);
            for bound in &param.bounds {
                acc = acc.and(self.resolve_at(&actual, bound, span, depth + 1)?);
            }
        }
        Ok((imp.index, acc))
    }

    /// Finds the method `name` for a receiver of type `receiver`, looking
    /// through references.
    pub fn lookup_method(
        &self,
        receiver: &Type,
        name: &str,
        span: Span,
    ) -> Result<MethodLookup, SemanticError> {
        let mut ty = receiver.clone();
        loop {
            if let Type::Variable(v) = &ty {
                for bound in &v.bounds {
                    if let Some(found) = self.through_trait(bound, name, &ty, span, false)? {
                        return Ok(MethodLookup::Found(found));
                    }
                }
                return Ok(MethodLookup::Unknown);
            }

            // Candidates told apart only by unsolved variables wait for them.
            let (inherent, conditional) = self.method_impls(&ty, name, false);
            if inherent.len() > 1 && conditional {
                return Ok(MethodLookup::Unknown);
            }
            if !inherent.is_empty() {
                let imp = self.most_specific(&inherent, &ty, &format!("method `{name}`"), span)?;
                return Ok(MethodLookup::Found(self.impl_target(imp, name, &ty, None)));
            }

            let (from_traits, conditional) = self.method_impls(&ty, name, true);
            if from_traits.len() > 1 && conditional {
                return Ok(MethodLookup::Unknown);
            }
            if !from_traits.is_empty() {
                let imp = self.most_specific(&from_traits, &ty, &format!("method `{name}`"), span)?;
                return Ok(MethodLookup::Found(self.impl_target(
                    imp,
                    name,
                    &ty,
                    imp.trait_name.clone(),
                )));
            }

            if let Some(param) = self.is_rigid(&ty) {
                let traits: Vec<String> = self
                    .assumptions
                    .iter()
                    .filter(|a| a.param == param)
                    .map(|a| a.trait_name.clone())
                    .collect();
                for t in traits {
                    if let Some(found) = self.through_trait(&t, name, &ty, span, false)? {
                        return Ok(MethodLookup::Found(found));
                    }
                }
            }

            if let Type::Trait(t) = &ty {
                if let Some(found) = self.through_trait(&t.name, name, &ty, span, true)? {
                    return Ok(MethodLookup::Found(found));
                }
            }

            match ty {
                Type::Reference(_, _, inner) => ty = *inner,
                _ => {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        span,
                        format!("no method named `{name}` found for `{receiver}`"),
                    )
                    .involving(receiver.to_string())
                    .involving(name));
                }
            }
        }
    }

    /// Impls of the given kind that provide method `name` for `ty`. The flag
    /// reports whether some match had to bind variables of `ty`.
    fn method_impls(&self, ty: &Type, name: &str, from_trait: bool) -> (Vec<&ImplInfo>, bool) {
        let mut found = Vec::new();
        let mut conditional = false;
        for imp in &self.symbols.impls {
            if imp.trait_name.is_some() != from_trait
                || !imp.method(name).is_some_and(|m| m.receiver.is_some())
            {
                continue;
            }
            if let Some((_, _, cond)) = self.match_impl(imp, ty) {
                conditional |= cond;
                found.push(imp);
            }
        }
        (found, conditional)
    }

    fn impl_target(
        &self,
        imp: &ImplInfo,
        name: &str,
        self_ty: &Type,
        trait_name: Option<String>,
    ) -> MethodTarget {
        let (sig, mode) = match imp.method(name) {
            Some(m) => (m.scheme.clone(), m.receiver.unwrap_or(ReceiverMode::ByValue)),
            None => (Scheme::mono(Type::func(vec![self_ty.clone()], Type::unit())), ReceiverMode::ByValue),
        };
        let dispatch = match trait_name {
            Some(trait_name) => Dispatch::TraitImpl {
                trait_name,
                impl_index: imp.index,
            },
            None => Dispatch::Inherent {
                impl_index: imp.index,
            },
        };
        tracing::trace!(method = name, target = %imp.describe(), "method resolved");
        MethodTarget {
            dispatch,
            mode,
            sig,
            self_ty: self_ty.clone(),
        }
    }

    fn through_trait(
        &self,
        trait_name: &str,
        name: &str,
        self_ty: &Type,
        span: Span,
        dynamic: bool,
    ) -> Result<Option<MethodTarget>, SemanticError> {
        let Some(info) = self.symbols.traits.get(trait_name) else {
            return Ok(None);
        };
        let Some(m) = info.method(name) else {
            return Ok(None);
        };
        let fn_ty = self
            .symbols
            .trait_method_type(m, self_ty)
            .map_err(|e| SemanticError { span, ..e })?;
        let Some(mode) = self.symbols.trait_method_receiver(m, &fn_ty) else {
            return Ok(None);
        };
        let dispatch = if dynamic {
            Dispatch::Dynamic {
                trait_name: trait_name.to_string(),
            }
        } else {
            Dispatch::Bound {
                trait_name: trait_name.to_string(),
            }
        };
        Ok(Some(MethodTarget {
            dispatch,
            mode,
            sig: Scheme::mono(fn_ty),
            self_ty: self_ty.clone(),
        }))
    }
}

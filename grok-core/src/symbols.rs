#![forbid(unsafe_code)]

//! Program-wide declarations: nominal types, traits, impls and the
//! append-only table of published function schemes.

use std::collections::{BTreeMap, BTreeSet};

use grok_ast::{FnDef, Ident, Item, Param, Program, Span, TypeParam, TypeRef};

use crate::error::{ErrorKind, SemanticError};
use crate::subst::Substitution;
use crate::typed::ReceiverMode;
use crate::types::{
    Lifetime, MethodSig, Mutability, PRIMITIVES, Scheme, StructType, TraitType, TyVar, TyVarId,
    Type,
};
use crate::unify::unify;

/// Traits known without a declaration.
pub const BUILTIN_TRAITS: &[&str] = &["Copy", "Integer"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeParamInfo {
    pub name: String,
    pub span: Span,
    pub bounds: Vec<String>,
}

impl TypeParamInfo {
    fn from_ast(p: &TypeParam) -> Self {
        Self {
            name: p.name.node.clone(),
            span: p.span,
            bounds: p.bounds.iter().map(|b| b.node.clone()).collect(),
        }
    }
}

/// A declared bound on a rigid type parameter, in force inside a body.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
pub struct Assumption {
    pub param: String,
    pub trait_name: String,
}

#[derive(Clone, Debug)]
pub struct StructInfo {
    pub name: String,
    pub span: Span,
    pub params: Vec<String>,
    pub fields: Vec<(String, TypeRef)>,
}

#[derive(Clone, Debug)]
pub struct VariantInfo {
    pub name: String,
    pub span: Span,
    pub fields: Vec<TypeRef>,
}

#[derive(Clone, Debug)]
pub struct EnumInfo {
    pub name: String,
    pub span: Span,
    pub params: Vec<String>,
    pub variants: Vec<VariantInfo>,
}

impl EnumInfo {
    pub fn variant(&self, name: &str) -> Option<&VariantInfo> {
        self.variants.iter().find(|v| v.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct TraitMethodInfo {
    pub name: String,
    pub span: Span,
    pub params: Vec<Param>,
    pub ret: Option<TypeRef>,
}

#[derive(Clone, Debug)]
pub struct TraitInfo {
    pub name: String,
    pub span: Span,
    pub methods: Vec<TraitMethodInfo>,
}

impl TraitInfo {
    pub fn method(&self, name: &str) -> Option<&TraitMethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Clone, Debug)]
pub struct MethodInfo {
    pub name: String,
    pub span: Span,
    /// Quantifies the impl's and the method's type parameters.
    pub scheme: Scheme,
    /// `None` for associated functions without a `self` parameter.
    pub receiver: Option<ReceiverMode>,
}

#[derive(Clone, Debug)]
pub struct ImplInfo {
    pub index: usize,
    pub span: Span,
    pub params: Vec<TypeParamInfo>,
    pub trait_name: Option<String>,
    /// Self type with the impl's parameters left rigid.
    pub self_ty: Type,
    pub methods: Vec<MethodInfo>,
}

impl ImplInfo {
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn describe(&self) -> String {
        match &self.trait_name {
            Some(t) => format!("impl {t} for {}", self.self_ty),
            None => format!("impl {}", self.self_ty),
        }
    }
}

/// Maps type-parameter names and `Self` while resolving written types.
#[derive(Clone, Debug, Default)]
pub struct TypeScope {
    pub params: BTreeMap<String, Type>,
    pub self_ty: Option<Type>,
}

impl TypeScope {
    /// Declared parameters become rigid `Generic(name, [])` types.
    pub fn rigid(params: &[TypeParamInfo], self_ty: Option<Type>) -> Self {
        Self {
            params: params
                .iter()
                .map(|p| (p.name.clone(), Type::Generic(p.name.clone(), Vec::new())))
                .collect(),
            self_ty,
        }
    }
}

/// Written parts of a function signature, resolved with rigid parameters.
#[derive(Clone, Debug)]
pub struct Signature {
    pub type_params: Vec<TypeParamInfo>,
    pub scope: TypeScope,
    pub params: Vec<Option<Type>>,
    pub ret: Option<Type>,
}

impl Signature {
    pub fn assumptions(&self) -> Vec<Assumption> {
        self.type_params
            .iter()
            .flat_map(|p| {
                p.bounds.iter().map(|b| Assumption {
                    param: p.name.clone(),
                    trait_name: b.clone(),
                })
            })
            .collect()
    }

    pub fn rigid_names(&self) -> BTreeSet<String> {
        self.type_params.iter().map(|p| p.name.clone()).collect()
    }

    /// The full function type, when every part is written out.
    pub fn fn_type(&self) -> Option<Type> {
        let params = self.params.iter().cloned().collect::<Option<Vec<_>>>()?;
        Some(Type::func(params, self.ret.clone()?))
    }
}

/// Replaces rigid type parameters with bounded variables and quantifies them.
pub fn export_scheme(
    ty: &Type,
    type_params: &[TypeParamInfo],
    fresh: &mut dyn FnMut() -> TyVarId,
) -> Scheme {
    let mut map = BTreeMap::new();
    let mut vars = Vec::new();
    for p in type_params {
        let var = TyVar::bounded(fresh(), p.bounds.iter().cloned());
        map.insert(p.name.clone(), Type::Variable(var.clone()));
        vars.push(var);
    }
    Scheme {
        vars,
        ty: ty.substitute_params(&map),
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub structs: BTreeMap<String, StructInfo>,
    pub enums: BTreeMap<String, EnumInfo>,
    pub traits: BTreeMap<String, TraitInfo>,
    pub impls: Vec<ImplInfo>,
    functions: BTreeMap<String, Scheme>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every nominal type, trait and impl of `program` and
    /// validates them. Functions are left to the driver.
    pub fn declare(program: &Program) -> (Self, Vec<SemanticError>) {
        let mut table = Self::new();
        let mut errors = Vec::new();

        for item in &program.items {
            match item {
                Item::Struct(s) => {
                    if let Err(e) = table.check_type_name(&s.name) {
                        errors.push(e);
                        continue;
                    }
                    table.structs.insert(
                        s.name.node.clone(),
                        StructInfo {
                            name: s.name.node.clone(),
                            span: s.span,
                            params: s.type_params.iter().map(|p| p.name.node.clone()).collect(),
                            fields: s
                                .fields
                                .iter()
                                .map(|f| (f.name.node.clone(), f.ty.clone()))
                                .collect(),
                        },
                    );
                }
                Item::Enum(e) => {
                    if let Err(err) = table.check_type_name(&e.name) {
                        errors.push(err);
                        continue;
                    }
                    table.enums.insert(
                        e.name.node.clone(),
                        EnumInfo {
                            name: e.name.node.clone(),
                            span: e.span,
                            params: e.type_params.iter().map(|p| p.name.node.clone()).collect(),
                            variants: e
                                .variants
                                .iter()
                                .map(|v| VariantInfo {
                                    name: v.name.node.clone(),
                                    span: v.span,
                                    fields: v.fields.clone(),
                                })
                                .collect(),
                        },
                    );
                }
                Item::Trait(t) => {
                    if let Err(e) = table.check_type_name(&t.name) {
                        errors.push(e);
                        continue;
                    }
                    table.traits.insert(
                        t.name.node.clone(),
                        TraitInfo {
                            name: t.name.node.clone(),
                            span: t.span,
                            methods: t
                                .methods
                                .iter()
                                .map(|m| TraitMethodInfo {
                                    name: m.name.node.clone(),
                                    span: m.span,
                                    params: m.params.clone(),
                                    ret: m.ret.clone(),
                                })
                                .collect(),
                        },
                    );
                }
                Item::Function(_) | Item::Impl(_) => {}
            }
        }

        errors.extend(table.validate_types());

        for item in &program.items {
            if let Item::Impl(imp) = item {
                match table.declare_impl(imp) {
                    Ok(info) => table.impls.push(info),
                    Err(e) => errors.push(e),
                }
            }
        }

        let mut published = BTreeSet::new();
        for imp in &table.impls {
            if imp.trait_name.is_some() {
                continue;
            }
            let Some(head) = imp.self_ty.head_name() else {
                continue;
            };
            for m in &imp.methods {
                let key = format!("{head}::{}", m.name);
                if !published.insert(key.clone()) {
                    errors.push(
                        SemanticError::new(
                            ErrorKind::DuplicateDefinition,
                            m.span,
                            format!("duplicate definitions with name `{key}`"),
                        )
                        .involving(key),
                    );
                }
            }
        }
        let assoc: Vec<(String, Scheme)> = table
            .impls
            .iter()
            .filter(|imp| imp.trait_name.is_none())
            .filter_map(|imp| imp.self_ty.head_name().map(|h| (h.to_string(), imp)))
            .flat_map(|(head, imp)| {
                imp.methods
                    .iter()
                    .map(move |m| (format!("{head}::{}", m.name), m.scheme.clone()))
            })
            .collect();
        for (key, scheme) in assoc {
            table.publish(&key, scheme);
        }

        (table, errors)
    }

    fn check_type_name(&self, name: &Ident) -> Result<(), SemanticError> {
        let n = name.node.as_str();
        if PRIMITIVES.contains(&n)
            || BUILTIN_TRAITS.contains(&n)
            || self.structs.contains_key(n)
            || self.enums.contains_key(n)
            || self.traits.contains_key(n)
        {
            return Err(SemanticError::new(
                ErrorKind::DuplicateDefinition,
                name.span,
                format!("the name `{n}` is defined multiple times"),
            )
            .involving(n));
        }
        Ok(())
    }

    fn validate_types(&self) -> Vec<SemanticError> {
        let mut errors = Vec::new();
        for s in self.structs.values() {
            let scope = self.param_scope(&s.params);
            let mut seen = BTreeSet::new();
            for (name, ty) in &s.fields {
                if !seen.insert(name.as_str()) {
                    errors.push(SemanticError::new(
                        ErrorKind::DuplicateDefinition,
                        ty.span(),
                        format!("field `{name}` is already declared in `{}`", s.name),
                    ));
                }
                if let Err(e) = self.resolve(ty, &scope) {
                    errors.push(e);
                }
            }
        }
        for e in self.enums.values() {
            let scope = self.param_scope(&e.params);
            let mut seen = BTreeSet::new();
            for v in &e.variants {
                if !seen.insert(v.name.as_str()) {
                    errors.push(SemanticError::new(
                        ErrorKind::DuplicateDefinition,
                        v.span,
                        format!("variant `{}` is already declared in `{}`", v.name, e.name),
                    ));
                }
                for f in &v.fields {
                    if let Err(err) = self.resolve(f, &scope) {
                        errors.push(err);
                    }
                }
            }
        }
        for t in self.traits.values() {
            let self_ty = Type::Generic("Self".into(), Vec::new());
            let mut seen = BTreeSet::new();
            for m in &t.methods {
                if !seen.insert(m.name.as_str()) {
                    errors.push(SemanticError::new(
                        ErrorKind::DuplicateDefinition,
                        m.span,
                        format!("method `{}` is already declared in trait `{}`", m.name, t.name),
                    ));
                }
                if let Err(e) = self.trait_method_type(m, &self_ty) {
                    errors.push(e);
                }
            }
        }
        errors
    }

    fn param_scope(&self, params: &[String]) -> TypeScope {
        TypeScope {
            params: params
                .iter()
                .map(|p| (p.clone(), Type::Generic(p.clone(), Vec::new())))
                .collect(),
            self_ty: None,
        }
    }

    fn declare_impl(&self, imp: &grok_ast::ImplDef) -> Result<ImplInfo, SemanticError> {
        let params: Vec<TypeParamInfo> = imp.type_params.iter().map(TypeParamInfo::from_ast).collect();
        self.check_bounds(&params)?;
        let scope = TypeScope::rigid(&params, None);
        let self_ty = self.resolve(&imp.self_ty, &scope)?;
        let trait_info = match &imp.trait_name {
            Some(name) if BUILTIN_TRAITS.contains(&name.node.as_str()) => None,
            Some(name) => Some(self.traits.get(&name.node).ok_or_else(|| {
                SemanticError::new(
                    ErrorKind::UnboundName,
                    name.span,
                    format!("cannot find trait `{}`", name.node),
                )
                .involving(name.node.clone())
            })?),
            None => None,
        };

        let mut methods = Vec::new();
        let mut seen = BTreeSet::new();
        for m in &imp.methods {
            if !seen.insert(m.name.node.as_str()) {
                return Err(SemanticError::new(
                    ErrorKind::DuplicateDefinition,
                    m.name.span,
                    format!("duplicate definitions with name `{}`", m.name.node),
                ));
            }
            let sig = self.signature(m, &params, Some(self_ty.clone()))?;
            let fn_ty = sig.fn_type().ok_or_else(|| {
                SemanticError::new(
                    ErrorKind::AnnotationRequired,
                    m.span,
                    format!("method `{}` must annotate every parameter and its return type", m.name.node),
                )
            })?;
            let receiver = receiver_mode(&m.params, &fn_ty);
            let mut next = 0;
            let scheme = export_scheme(&fn_ty, &sig.type_params, &mut || {
                next += 1;
                TyVarId(next - 1)
            });
            methods.push(MethodInfo {
                name: m.name.node.clone(),
                span: m.span,
                scheme,
                receiver,
            });
        }

        if let (Some(trait_info), Some(trait_name)) = (trait_info, &imp.trait_name) {
            for tm in &trait_info.methods {
                let Some(found) = imp.methods.iter().find(|m| m.name.node == tm.name) else {
                    return Err(SemanticError::new(
                        ErrorKind::UnsatisfiedBound,
                        imp.span,
                        format!(
                            "not all trait items implemented, missing: `{}` from trait `{}`",
                            tm.name, trait_info.name
                        ),
                    )
                    .involving(self_ty.to_string())
                    .involving(trait_info.name.clone())
                    .with_related(tm.span, "`".to_string() + &tm.name + "` declared here"));
                };
                let expected = self.trait_method_type(tm, &self_ty)?;
                let sig = self.signature(found, &params, Some(self_ty.clone()))?;
                if let Some(actual) = sig.fn_type() {
                    let mut scratch = Substitution::new();
                    unify(&mut scratch, &expected, &actual, found.span).map_err(|_| {
                        SemanticError::new(
                            ErrorKind::TypeMismatch,
                            found.span,
                            format!(
                                "method `{}` has an incompatible type for trait `{}`: expected `{expected}`, found `{actual}`",
                                tm.name, trait_info.name
                            ),
                        )
                        .involving(expected.to_string())
                        .involving(actual.to_string())
                    })?;
                }
            }
            for m in &imp.methods {
                if trait_info.method(&m.name.node).is_none() {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        m.name.span,
                        format!(
                            "method `{}` is not a member of trait `{}`",
                            m.name.node, trait_name.node
                        ),
                    ));
                }
            }
        }

        Ok(ImplInfo {
            index: self.impls.len(),
            span: imp.span,
            params,
            trait_name: imp.trait_name.as_ref().map(|t| t.node.clone()),
            self_ty,
            methods,
        })
    }

    pub fn check_bounds(&self, params: &[TypeParamInfo]) -> Result<(), SemanticError> {
        for p in params {
            for b in &p.bounds {
                if !self.is_trait(b) {
                    return Err(SemanticError::new(
                        ErrorKind::UnboundName,
                        p.span,
                        format!("cannot find trait `{b}`"),
                    )
                    .involving(b.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn is_trait(&self, name: &str) -> bool {
        BUILTIN_TRAITS.contains(&name) || self.traits.contains_key(name)
    }

    /// Resolves the written parts of `f`. `outer` are the enclosing impl's
    /// parameters, which come first in the resulting type-parameter list.
    pub fn signature(
        &self,
        f: &FnDef,
        outer: &[TypeParamInfo],
        self_ty: Option<Type>,
    ) -> Result<Signature, SemanticError> {
        let mut type_params = outer.to_vec();
        let own: Vec<TypeParamInfo> = f.type_params.iter().map(TypeParamInfo::from_ast).collect();
        self.check_bounds(&own)?;
        type_params.extend(own);
        let scope = TypeScope::rigid(&type_params, self_ty.clone());
        let mut params = Vec::new();
        for p in &f.params {
            let ty = match (&p.ty, p.name.node.as_str(), &self_ty) {
                (Some(t), _, _) => Some(self.resolve(t, &scope)?),
                (None, "self", Some(s)) => Some(s.clone()),
                (None, _, _) => None,
            };
            params.push(ty);
        }
        let ret = f.ret.as_ref().map(|r| self.resolve(r, &scope)).transpose()?;
        Ok(Signature {
            type_params,
            scope,
            params,
            ret,
        })
    }

    /// Function type of a trait method with `Self` bound to `self_ty`.
    pub fn trait_method_type(&self, m: &TraitMethodInfo, self_ty: &Type) -> Result<Type, SemanticError> {
        let scope = TypeScope {
            params: BTreeMap::new(),
            self_ty: Some(self_ty.clone()),
        };
        let mut params = Vec::new();
        for p in &m.params {
            match (&p.ty, p.name.node.as_str()) {
                (Some(t), _) => params.push(self.resolve(t, &scope)?),
                (None, "self") => params.push(self_ty.clone()),
                (None, _) => {
                    return Err(SemanticError::new(
                        ErrorKind::AnnotationRequired,
                        p.span,
                        format!("trait method `{}` must annotate parameter `{}`", m.name, p.name.node),
                    ));
                }
            }
        }
        let ret = match &m.ret {
            Some(r) => self.resolve(r, &scope)?,
            None => Type::unit(),
        };
        Ok(Type::func(params, ret))
    }

    pub fn trait_method_receiver(&self, m: &TraitMethodInfo, fn_ty: &Type) -> Option<ReceiverMode> {
        receiver_mode(&m.params, fn_ty)
    }

    pub fn resolve(&self, r: &TypeRef, scope: &TypeScope) -> Result<Type, SemanticError> {
        self.resolve_in(r, scope, &mut Vec::new())
    }

    fn resolve_in(
        &self,
        r: &TypeRef,
        scope: &TypeScope,
        visiting: &mut Vec<String>,
    ) -> Result<Type, SemanticError> {
        match r {
            TypeRef::Named { span, name, args } => {
                let n = name.node.as_str();
                if args.is_empty() {
                    if let Some(t) = scope.params.get(n) {
                        return Ok(t.clone());
                    }
                    if n == "Self" {
                        return scope.self_ty.clone().ok_or_else(|| {
                            SemanticError::new(
                                ErrorKind::UnboundName,
                                *span,
                                "`Self` is only available inside impls and traits",
                            )
                        });
                    }
                }
                let mut resolved = Vec::new();
                for a in args {
                    resolved.push(self.resolve_in(a, scope, visiting)?);
                }
                let arity = |expected: usize| -> Result<(), SemanticError> {
                    if expected == resolved.len() {
                        Ok(())
                    } else {
                        Err(SemanticError::new(
                            ErrorKind::TypeMismatch,
                            *span,
                            format!(
                                "type `{n}` takes {expected} type argument(s) but {} were supplied",
                                resolved.len()
                            ),
                        )
                        .involving(n))
                    }
                };
                if PRIMITIVES.contains(&n) {
                    arity(0)?;
                    return Ok(Type::prim(n));
                }
                if let Some(s) = self.structs.get(n) {
                    arity(s.params.len())?;
                    return self.struct_type_in(n, resolved, visiting);
                }
                if let Some(e) = self.enums.get(n) {
                    arity(e.params.len())?;
                    return Ok(Type::Generic(n.to_string(), resolved));
                }
                if self.traits.contains_key(n) {
                    arity(0)?;
                    return self.trait_object(n);
                }
                Err(SemanticError::new(
                    ErrorKind::UnboundName,
                    *span,
                    format!("cannot find type `{n}`"),
                )
                .involving(n))
            }
            TypeRef::Function { params, ret, .. } => {
                let mut ps = Vec::new();
                for p in params {
                    ps.push(self.resolve_in(p, scope, visiting)?);
                }
                Ok(Type::func(ps, self.resolve_in(ret, scope, visiting)?))
            }
            TypeRef::Reference {
                mutable,
                lifetime,
                pointee,
                ..
            } => {
                let m = if *mutable {
                    Mutability::Exclusive
                } else {
                    Mutability::Shared
                };
                let lt = match lifetime {
                    Some(l) if l.node == "static" => Lifetime::Static,
                    Some(l) => Lifetime::Named(l.node.clone()),
                    None => Lifetime::Erased,
                };
                Ok(Type::Reference(
                    m,
                    lt,
                    Box::new(self.resolve_in(pointee, scope, visiting)?),
                ))
            }
            TypeRef::Tuple { elems, .. } => {
                let mut ts = Vec::new();
                for e in elems {
                    ts.push(self.resolve_in(e, scope, visiting)?);
                }
                Ok(Type::tuple(ts))
            }
        }
    }

    /// Expands a struct with its fields instantiated at `args`.
    pub fn struct_type(&self, name: &str, args: Vec<Type>) -> Result<Type, SemanticError> {
        self.struct_type_in(name, args, &mut Vec::new())
    }

    fn struct_type_in(
        &self,
        name: &str,
        args: Vec<Type>,
        visiting: &mut Vec<String>,
    ) -> Result<Type, SemanticError> {
        if visiting.iter().any(|v| v == name) {
            return Ok(Type::Generic(name.to_string(), args));
        }
        let Some(info) = self.structs.get(name) else {
            return Ok(Type::Generic(name.to_string(), args));
        };
        let scope = TypeScope {
            params: info.params.iter().cloned().zip(args.iter().cloned()).collect(),
            self_ty: None,
        };
        visiting.push(name.to_string());
        let mut fields = Vec::new();
        for (fname, fref) in &info.fields {
            fields.push((fname.clone(), self.resolve_in(fref, &scope, visiting)?));
        }
        visiting.pop();
        Ok(Type::Struct(StructType {
            name: name.to_string(),
            args,
            fields,
        }))
    }

    /// A `Generic(name, args)` naming a struct, expanded; other types unchanged.
    pub fn expand(&self, ty: &Type) -> Result<Type, SemanticError> {
        match ty {
            Type::Generic(name, args) if self.structs.contains_key(name) => {
                self.struct_type(name, args.clone())
            }
            _ => Ok(ty.clone()),
        }
    }

    pub fn trait_object(&self, name: &str) -> Result<Type, SemanticError> {
        let shallow = Type::Trait(TraitType {
            name: name.to_string(),
            methods: Vec::new(),
        });
        let Some(info) = self.traits.get(name) else {
            return Ok(shallow);
        };
        let mut methods = Vec::new();
        for m in &info.methods {
            if let Type::Function(params, ret) = self.trait_method_type(m, &shallow)? {
                methods.push(MethodSig {
                    name: m.name.clone(),
                    params,
                    ret: *ret,
                });
            }
        }
        Ok(Type::Trait(TraitType {
            name: name.to_string(),
            methods,
        }))
    }

    /// Field types of `enum_name::variant` at the given enum arguments.
    pub fn variant_fields(
        &self,
        enum_name: &str,
        variant: &str,
        args: &[Type],
    ) -> Option<Result<Vec<Type>, SemanticError>> {
        let info = self.enums.get(enum_name)?;
        let v = info.variant(variant)?;
        let scope = TypeScope {
            params: info.params.iter().cloned().zip(args.iter().cloned()).collect(),
            self_ty: None,
        };
        Some(v.fields.iter().map(|f| self.resolve(f, &scope)).collect())
    }

    pub fn publish(&mut self, name: &str, scheme: Scheme) {
        if self.functions.contains_key(name) {
            tracing::debug!(name, "scheme already published; keeping the first");
            return;
        }
        tracing::trace!(name, scheme = %scheme, "publish");
        self.functions.insert(name.to_string(), scheme);
    }

    pub fn function(&self, name: &str) -> Option<&Scheme> {
        self.functions.get(name)
    }

    pub fn impls_of<'a>(&'a self, trait_name: &'a str) -> impl Iterator<Item = &'a ImplInfo> + 'a {
        self.impls
            .iter()
            .filter(move |i| i.trait_name.as_deref() == Some(trait_name))
    }
}

/// Receiver mode of a method whose first parameter is `self`.
pub fn receiver_mode(params: &[Param], fn_ty: &Type) -> Option<ReceiverMode> {
    let first = params.first()?;
    if first.name.node != "self" {
        return None;
    }
    let Type::Function(tys, _) = fn_ty else {
        return None;
    };
    Some(match tys.first() {
        Some(Type::Reference(Mutability::Shared, _, _)) => ReceiverMode::Shared,
        Some(Type::Reference(Mutability::Exclusive, _, _)) => ReceiverMode::Exclusive,
        _ => ReceiverMode::ByValue,
    })
}

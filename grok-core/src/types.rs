#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

pub const PRIMITIVES: &[&str] = &[
    "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64", "bool", "str", "char",
    "unit",
];

pub const INTEGERS: &[&str] = &["i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64"];

/// Name used for tuple types (`Generic("Tuple", elems)`).
pub const TUPLE: &str = "Tuple";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TyVarId(pub u32);

impl fmt::Display for TyVarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?T{}", self.0)
    }
}

/// A unification variable together with the traits it must implement.
///
/// Identity is the id alone: two occurrences of the same variable compare
/// equal even when one of them carries a stale bound set.
#[derive(Clone, Debug, Serialize)]
pub struct TyVar {
    pub id: TyVarId,
    pub bounds: BTreeSet<String>,
}

impl TyVar {
    pub fn new(id: TyVarId) -> Self {
        Self {
            id,
            bounds: BTreeSet::new(),
        }
    }

    pub fn bounded(id: TyVarId, bounds: impl IntoIterator<Item = String>) -> Self {
        Self {
            id,
            bounds: bounds.into_iter().collect(),
        }
    }
}

impl PartialEq for TyVar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TyVar {}

impl Hash for TyVar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for TyVar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TyVar {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Mutability {
    Shared,
    Exclusive,
}

/// Lifetimes are carried for the ownership verifier; the unifier ignores them.
#[derive(Clone, Debug, Serialize)]
pub enum Lifetime {
    Named(String),
    Static,
    Erased,
}

impl PartialEq for Lifetime {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for Lifetime {}

impl Hash for Lifetime {
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl Lifetime {
    pub fn name(&self) -> Option<&str> {
        match self {
            Lifetime::Named(n) => Some(n),
            Lifetime::Static => Some("static"),
            Lifetime::Erased => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct StructType {
    pub name: String,
    pub args: Vec<Type>,
    pub fields: Vec<(String, Type)>,
}

impl StructType {
    pub fn field(&self, name: &str) -> Option<&Type> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MethodSig {
    pub name: String,
    /// Includes the receiver as the first parameter when the method has one.
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TraitType {
    pub name: String,
    pub methods: Vec<MethodSig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    Primitive(String),
    Variable(TyVar),
    /// Enums, tuples, rigid type parameters and recursive struct occurrences.
    Generic(String, Vec<Type>),
    Function(Vec<Type>, Box<Type>),
    Struct(StructType),
    /// A trait object.
    Trait(TraitType),
    Reference(Mutability, Lifetime, Box<Type>),
}

impl Type {
    pub fn prim(name: &str) -> Self {
        Type::Primitive(name.to_string())
    }

    pub fn unit() -> Self {
        Type::prim("unit")
    }

    pub fn bool() -> Self {
        Type::prim("bool")
    }

    pub fn i32() -> Self {
        Type::prim("i32")
    }

    pub fn var(id: u32) -> Self {
        Type::Variable(TyVar::new(TyVarId(id)))
    }

    pub fn tuple(elems: Vec<Type>) -> Self {
        if elems.is_empty() {
            Type::unit()
        } else {
            Type::Generic(TUPLE.to_string(), elems)
        }
    }

    pub fn func(params: Vec<Type>, ret: Type) -> Self {
        Type::Function(params, Box::new(ret))
    }

    pub fn reference(mutability: Mutability, pointee: Type) -> Self {
        Type::Reference(mutability, Lifetime::Erased, Box::new(pointee))
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Type::Primitive(n) if n == "unit")
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Primitive(n) if INTEGERS.contains(&n.as_str()))
    }

    pub fn as_var(&self) -> Option<TyVarId> {
        match self {
            Type::Variable(v) => Some(v.id),
            _ => None,
        }
    }

    pub fn tuple_elems(&self) -> Option<&[Type]> {
        match self {
            Type::Generic(name, elems) if name == TUPLE => Some(elems),
            _ => None,
        }
    }

    /// Strips every layer of reference.
    pub fn deref_all(&self) -> &Type {
        let mut ty = self;
        while let Type::Reference(_, _, inner) = ty {
            ty = inner;
        }
        ty
    }

    /// Shallow name of a nominal type, used for impl and method lookup.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Type::Primitive(n) | Type::Generic(n, _) => Some(n),
            Type::Struct(s) => Some(&s.name),
            Type::Trait(t) => Some(&t.name),
            _ => None,
        }
    }

    pub fn free_vars(&self) -> BTreeSet<TyVarId> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    pub fn collect_vars(&self, out: &mut BTreeSet<TyVarId>) {
        match self {
            Type::Primitive(_) => {}
            Type::Variable(v) => {
                out.insert(v.id);
            }
            Type::Generic(_, args) => args.iter().for_each(|a| a.collect_vars(out)),
            Type::Function(params, ret) => {
                params.iter().for_each(|p| p.collect_vars(out));
                ret.collect_vars(out);
            }
            Type::Struct(s) => {
                s.args.iter().for_each(|a| a.collect_vars(out));
                s.fields.iter().for_each(|(_, t)| t.collect_vars(out));
            }
            Type::Trait(t) => {
                for m in &t.methods {
                    m.params.iter().for_each(|p| p.collect_vars(out));
                    m.ret.collect_vars(out);
                }
            }
            Type::Reference(_, _, inner) => inner.collect_vars(out),
        }
    }

    pub fn occurs(&self, id: TyVarId) -> bool {
        match self {
            Type::Primitive(_) => false,
            Type::Variable(v) => v.id == id,
            Type::Generic(_, args) => args.iter().any(|a| a.occurs(id)),
            Type::Function(params, ret) => params.iter().any(|p| p.occurs(id)) || ret.occurs(id),
            Type::Struct(s) => {
                s.args.iter().any(|a| a.occurs(id)) || s.fields.iter().any(|(_, t)| t.occurs(id))
            }
            Type::Trait(t) => t
                .methods
                .iter()
                .any(|m| m.params.iter().any(|p| p.occurs(id)) || m.ret.occurs(id)),
            Type::Reference(_, _, inner) => inner.occurs(id),
        }
    }

    /// True when a value of this type may hold a borrow.
    pub fn contains_reference(&self) -> bool {
        match self {
            Type::Reference(..) => true,
            // Closures may capture borrows; unknown types may turn out to be references.
            Type::Function(..) | Type::Variable(_) | Type::Trait(_) => true,
            Type::Primitive(_) => false,
            Type::Generic(_, args) => args.iter().any(Type::contains_reference),
            Type::Struct(s) => s.fields.iter().any(|(_, t)| t.contains_reference()),
        }
    }

    /// Replaces rigid parameters `Generic(name, [])` for every `name` in `map`.
    pub fn substitute_params(&self, map: &BTreeMap<String, Type>) -> Type {
        if map.is_empty() {
            return self.clone();
        }
        match self {
            Type::Generic(name, args) if args.is_empty() => {
                map.get(name).cloned().unwrap_or_else(|| self.clone())
            }
            Type::Primitive(_) | Type::Variable(_) => self.clone(),
            Type::Generic(name, args) => Type::Generic(
                name.clone(),
                args.iter().map(|a| a.substitute_params(map)).collect(),
            ),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.substitute_params(map)).collect(),
                Box::new(ret.substitute_params(map)),
            ),
            Type::Struct(s) => Type::Struct(StructType {
                name: s.name.clone(),
                args: s.args.iter().map(|a| a.substitute_params(map)).collect(),
                fields: s
                    .fields
                    .iter()
                    .map(|(n, t)| (n.clone(), t.substitute_params(map)))
                    .collect(),
            }),
            Type::Trait(t) => Type::Trait(TraitType {
                name: t.name.clone(),
                methods: t
                    .methods
                    .iter()
                    .map(|m| MethodSig {
                        name: m.name.clone(),
                        params: m.params.iter().map(|p| p.substitute_params(map)).collect(),
                        ret: m.ret.substitute_params(map),
                    })
                    .collect(),
            }),
            Type::Reference(m, lt, inner) => {
                Type::Reference(*m, lt.clone(), Box::new(inner.substitute_params(map)))
            }
        }
    }

    /// Replaces variables by id; used for scheme instantiation.
    pub fn substitute_vars(&self, map: &BTreeMap<TyVarId, Type>) -> Type {
        match self {
            Type::Variable(v) => map.get(&v.id).cloned().unwrap_or_else(|| self.clone()),
            Type::Primitive(_) => self.clone(),
            Type::Generic(name, args) => Type::Generic(
                name.clone(),
                args.iter().map(|a| a.substitute_vars(map)).collect(),
            ),
            Type::Function(params, ret) => Type::Function(
                params.iter().map(|p| p.substitute_vars(map)).collect(),
                Box::new(ret.substitute_vars(map)),
            ),
            Type::Struct(s) => Type::Struct(StructType {
                name: s.name.clone(),
                args: s.args.iter().map(|a| a.substitute_vars(map)).collect(),
                fields: s
                    .fields
                    .iter()
                    .map(|(n, t)| (n.clone(), t.substitute_vars(map)))
                    .collect(),
            }),
            Type::Trait(t) => Type::Trait(TraitType {
                name: t.name.clone(),
                methods: t
                    .methods
                    .iter()
                    .map(|m| MethodSig {
                        name: m.name.clone(),
                        params: m.params.iter().map(|p| p.substitute_vars(map)).collect(),
                        ret: m.ret.substitute_vars(map),
                    })
                    .collect(),
            }),
            Type::Reference(m, lt, inner) => {
                Type::Reference(*m, lt.clone(), Box::new(inner.substitute_vars(map)))
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Type]) -> fmt::Result {
    for (i, t) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{t}")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(n) if n == "unit" => f.write_str("()"),
            Type::Primitive(n) => f.write_str(n),
            Type::Variable(v) => write!(f, "{}", v.id),
            Type::Generic(name, elems) if name == TUPLE => {
                f.write_str("(")?;
                write_list(f, elems)?;
                f.write_str(")")
            }
            Type::Generic(name, args) | Type::Struct(StructType { name, args, .. }) => {
                f.write_str(name)?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    write_list(f, args)?;
                    f.write_str(">")?;
                }
                Ok(())
            }
            Type::Function(params, ret) => {
                match params.as_slice() {
                    [single] if !matches!(single, Type::Function(..)) => write!(f, "{single}")?,
                    _ => {
                        f.write_str("(")?;
                        write_list(f, params)?;
                        f.write_str(")")?;
                    }
                }
                write!(f, " -> {ret}")
            }
            Type::Trait(t) => write!(f, "dyn {}", t.name),
            Type::Reference(m, lt, inner) => {
                f.write_str("&")?;
                if let Some(name) = lt.name() {
                    write!(f, "'{name} ")?;
                }
                if *m == Mutability::Exclusive {
                    f.write_str("mut ")?;
                }
                write!(f, "{inner}")
            }
        }
    }
}

/// `forall vars. ty`. Monomorphic bindings are schemes with no variables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scheme {
    pub vars: Vec<TyVar>,
    pub ty: Type,
}

impl Scheme {
    pub fn mono(ty: Type) -> Self {
        Self {
            vars: Vec::new(),
            ty,
        }
    }

    pub fn is_mono(&self) -> bool {
        self.vars.is_empty()
    }

    /// Free variables not bound by the scheme.
    pub fn free_vars(&self) -> BTreeSet<TyVarId> {
        let mut out = self.ty.free_vars();
        for v in &self.vars {
            out.remove(&v.id);
        }
        out
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.vars.is_empty() {
            f.write_str("forall")?;
            for v in &self.vars {
                write!(f, " {}", v.id)?;
                if !v.bounds.is_empty() {
                    let bounds: Vec<&str> = v.bounds.iter().map(String::as_str).collect();
                    write!(f, ": {}", bounds.join(" + "))?;
                }
            }
            f.write_str(". ")?;
        }
        write!(f, "{}", self.ty)
    }
}

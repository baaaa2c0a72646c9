#![forbid(unsafe_code)]

//! The parsed-program interface consumed by the semantic core.
//!
//! Every node carries a 1-based source position. The tree is serde
//! (de)serializable so an external parser can hand it over as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

pub fn span(line: u32, col: u32) -> Span {
    Span::new(line, col)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub type Ident = Spanned<String>;

pub fn ident(span: Span, name: impl Into<String>) -> Ident {
    Spanned::new(span, name.into())
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Function(FnDef),
    Struct(StructDef),
    Enum(EnumDef),
    Trait(TraitDef),
    Impl(ImplDef),
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Function(f) => f.span,
            Item::Struct(s) => s.span,
            Item::Enum(e) => e.span,
            Item::Trait(t) => t.span,
            Item::Impl(i) => i.span,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FnDef {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub type_params: Vec<TypeParam>,
    /// Named lifetime parameters (`'a`), without the leading quote.
    #[serde(default)]
    pub lifetimes: Vec<Ident>,
    pub params: Vec<Param>,
    #[serde(default)]
    pub ret: Option<TypeRef>,
    pub body: Expr,
}

impl FnDef {
    /// True when every parameter and the return type are written out.
    pub fn is_fully_annotated(&self) -> bool {
        self.ret.is_some() && self.params.iter().all(|p| p.ty.is_some())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeParam {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub bounds: Vec<Ident>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub ty: Option<TypeRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructDef {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub type_params: Vec<TypeParam>,
    pub fields: Vec<FieldDef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub span: Span,
    pub name: Ident,
    pub ty: TypeRef,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnumDef {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub type_params: Vec<TypeParam>,
    pub variants: Vec<VariantDef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantDef {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub fields: Vec<TypeRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraitDef {
    pub span: Span,
    pub name: Ident,
    pub methods: Vec<TraitMethod>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraitMethod {
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Param>,
    #[serde(default)]
    pub ret: Option<TypeRef>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImplDef {
    pub span: Span,
    #[serde(default)]
    pub type_params: Vec<TypeParam>,
    #[serde(default)]
    pub trait_name: Option<Ident>,
    pub self_ty: TypeRef,
    #[serde(default)]
    pub methods: Vec<FnDef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeRef {
    /// Primitives, structs, enums, trait objects, type parameters and `Self`.
    Named {
        span: Span,
        name: Ident,
        #[serde(default)]
        args: Vec<TypeRef>,
    },
    Function {
        span: Span,
        params: Vec<TypeRef>,
        ret: Box<TypeRef>,
    },
    Reference {
        span: Span,
        mutable: bool,
        #[serde(default)]
        lifetime: Option<Ident>,
        pointee: Box<TypeRef>,
    },
    Tuple {
        span: Span,
        elems: Vec<TypeRef>,
    },
}

impl TypeRef {
    pub fn span(&self) -> Span {
        match self {
            TypeRef::Named { span, .. }
            | TypeRef::Function { span, .. }
            | TypeRef::Reference { span, .. }
            | TypeRef::Tuple { span, .. } => *span,
        }
    }

    pub fn named(span: Span, name: impl Into<String>) -> Self {
        TypeRef::Named {
            span,
            name: ident(span, name),
            args: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self { span, kind }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Ident(Ident),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: Ident,
        args: Vec<Expr>,
    },
    /// `fn(x, y) { body }`
    Lambda {
        params: Vec<Param>,
        body: Box<Expr>,
    },
    Block(Block),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    /// `Name { field: value, ... }`
    StructLit {
        name: Ident,
        fields: Vec<(Ident, Expr)>,
    },
    /// `Enum::Variant(args...)`
    Variant {
        enum_name: Ident,
        variant: Ident,
        args: Vec<Expr>,
    },
    Field {
        base: Box<Expr>,
        field: Ident,
    },
    Tuple(Vec<Expr>),
    Borrow {
        mutable: bool,
        expr: Box<Expr>,
    },
    Deref(Box<Expr>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Return(Option<Box<Expr>>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Unit,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub tail: Option<Box<Expr>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let(LetStmt),
    Expr(Expr),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LetStmt {
    pub span: Span,
    pub name: Ident,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub ty: Option<TypeRef>,
    pub init: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub span: Span,
    pub pat: Pattern,
    pub body: Expr,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Wildcard {
        span: Span,
    },
    Binding(Ident),
    Literal {
        span: Span,
        value: Literal,
    },
    Tuple {
        span: Span,
        elems: Vec<Pattern>,
    },
    Variant {
        span: Span,
        enum_name: Ident,
        variant: Ident,
        #[serde(default)]
        fields: Vec<Pattern>,
    },
    Struct {
        span: Span,
        name: Ident,
        fields: Vec<(Ident, Pattern)>,
    },
}

impl Pattern {
    pub fn span(&self) -> Span {
        match self {
            Pattern::Binding(id) => id.span,
            Pattern::Wildcard { span }
            | Pattern::Literal { span, .. }
            | Pattern::Tuple { span, .. }
            | Pattern::Variant { span, .. }
            | Pattern::Struct { span, .. } => *span,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

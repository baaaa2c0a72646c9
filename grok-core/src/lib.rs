#![forbid(unsafe_code)]

pub mod collect;
pub mod config;
pub mod constraint;
pub mod control_flow;
pub mod diagnostics;
pub mod env;
mod error;
pub mod exhaustive;
pub mod generalize;
pub mod move_tracking;
pub mod ownership_enforcement;
mod sema;
pub mod subst;
pub mod symbols;
pub mod traits;
pub mod typed;
pub mod types;
pub mod unify;
pub mod verifier;

pub use config::{CheckerConfig, IntLiteralMode, Verbosity};
pub use error::{ErrorKind, InternalError, RelatedLocation, SemanticError};
pub use ownership_enforcement::{Access, OwnershipFact, UseAnnotation};
pub use sema::{CheckOutcome, Checker};
pub use subst::Substitution;
pub use typed::{TypedFunction, TypedProgram};
pub use types::{Scheme, TyVar, TyVarId, Type};

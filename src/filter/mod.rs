//! Query filters: the backend-neutral tree, its JSON decoding, and its
//! compilation into native predicate fragments.

mod ast;
mod compiler;
mod parse;

pub use ast::{
    Bounds, Children, Filter, GeoRadius, IntoMatchValue, MatchValue, MetaConditions, RangeBounds,
    Scalar, ScalarList,
};
pub use compiler::{
    ConditionBuilder, PgvectorConditionBuilder, compile, compile_conditions, quote_ident,
    quote_literal,
};
pub use parse::parse_conditions;
use thiserror::Error;

use crate::capabilities::IncompatibilityError;

/// A filter that violates the shape contract. Raised while the tree is built,
/// never by the compiler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("AND/OR combinator requires at least one child")]
    EmptyCombinator,

    #[error("range filter on '{field}' has no bounds")]
    NoBounds { field: String },

    #[error("range filter on '{field}' has conflicting bounds: {reason}")]
    ConflictingBounds { field: String, reason: String },

    #[error("exact-match filter requires at least one value")]
    EmptyMatchList,

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("malformed condition: {0}")]
    Malformed(String),
}

/// Errors raised while lowering a filter into a native fragment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Incompatible(#[from] IncompatibilityError),

    #[error("failed to encode value for '{field}': {message}")]
    Encoding { field: String, message: String },
}

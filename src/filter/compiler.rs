//! Lowering of filter trees into native predicate fragments.
//!
//! [`compile`] walks the tree and hands each node to a [`ConditionBuilder`],
//! the per-backend set of hooks for atomic predicates and combinators. The
//! shipped builder, [`PgvectorConditionBuilder`], produces PostgreSQL `WHERE`
//! fragments.
//!
//! The generated SQL inlines values as escaped literals rather than bind
//! parameters: every `'` in a string literal is doubled and every identifier
//! is double-quoted with embedded `"` doubled. The output is trusted-but-escaped
//! text for benchmark filters, not a guard for arbitrary untrusted input.

use std::collections::HashSet;

use super::{CompileError, Filter, GeoRadius, MatchValue, MetaConditions, RangeBounds, Scalar};
use crate::{
    capabilities::Capabilities,
    config::{FieldSchema, FieldType},
};

/// Statute miles to meters; earthdistance's `<@>` operator returns miles.
const METERS_PER_MILE: f64 = 1609.344;

/// Backend hooks used by [`compile`].
pub trait ConditionBuilder {
    fn exact_match(&self, field: &str, value: &MatchValue) -> Result<String, CompileError>;

    fn range(&self, field: &str, bounds: &RangeBounds) -> Result<String, CompileError>;

    /// Backends without geo support must return
    /// [`CompileError::Incompatible`] rather than dropping the predicate.
    fn geo(&self, field: &str, area: &GeoRadius) -> Result<String, CompileError>;

    fn and(&self, clauses: &[String]) -> String {
        format!("({})", clauses.join(" AND "))
    }

    fn or(&self, clauses: &[String]) -> String {
        format!("({})", clauses.join(" OR "))
    }

    /// Combine the compiled OR-group and AND-group of a [`MetaConditions`].
    fn conditions(&self, or_group: Option<String>, and_group: Option<String>) -> Option<String> {
        let clauses: Vec<String> = or_group.into_iter().chain(and_group).collect();
        if clauses.is_empty() {
            None
        } else {
            Some(clauses.join(" AND "))
        }
    }
}

/// Recursively compile a filter node.
///
/// Returns `None` when the node contributes no predicate.
pub fn compile<B: ConditionBuilder + ?Sized>(
    builder: &B,
    filter: &Filter,
) -> Result<Option<String>, CompileError> {
    match filter {
        Filter::ExactMatch { field, value } => builder.exact_match(field, value).map(Some),
        Filter::Range { field, bounds } => builder.range(field, bounds).map(Some),
        Filter::Geo { field, area } => builder.geo(field, area).map(Some),
        Filter::And(children) => {
            let clauses = compile_children(builder, children)?;
            Ok((!clauses.is_empty()).then(|| builder.and(&clauses)))
        }
        Filter::Or(children) => {
            let clauses = compile_children(builder, children)?;
            Ok((!clauses.is_empty()).then(|| builder.or(&clauses)))
        }
    }
}

fn compile_children<'a, B: ConditionBuilder + ?Sized>(
    builder: &B,
    children: impl IntoIterator<Item = &'a Filter>,
) -> Result<Vec<String>, CompileError> {
    let mut clauses = Vec::new();
    for child in children {
        if let Some(clause) = compile(builder, child)? {
            clauses.push(clause);
        }
    }
    Ok(clauses)
}

/// Compile the root of a query filter.
///
/// `None` (or empty conditions) compiles to `None`: the caller must then omit
/// the `WHERE` clause entirely.
pub fn compile_conditions<B: ConditionBuilder + ?Sized>(
    builder: &B,
    conditions: Option<&MetaConditions>,
) -> Result<Option<String>, CompileError> {
    let Some(conditions) = conditions else {
        return Ok(None);
    };

    let or_group = match conditions.or_group() {
        Some(children) => {
            let clauses = compile_children(builder, children)?;
            (!clauses.is_empty()).then(|| builder.or(&clauses))
        }
        None => None,
    };
    let and_group = match conditions.and_group() {
        Some(children) => {
            let clauses = compile_children(builder, children)?;
            (!clauses.is_empty()).then(|| builder.and(&clauses))
        }
        None => None,
    };

    Ok(builder.conditions(or_group, and_group))
}

// ============================================================================
// PostgreSQL / pgvector
// ============================================================================

/// Condition builder producing PostgreSQL `WHERE` fragments.
#[derive(Debug, Clone)]
pub struct PgvectorConditionBuilder {
    capabilities: Capabilities,
    /// Columns stored as `jsonb`; exact matches on them test containment.
    array_fields: HashSet<String>,
}

impl PgvectorConditionBuilder {
    pub fn new(capabilities: Capabilities, schema: &[FieldSchema]) -> Self {
        let array_fields = schema
            .iter()
            .filter(|f| f.field_type == FieldType::Json)
            .map(|f| f.name.clone())
            .collect();
        Self {
            capabilities,
            array_fields,
        }
    }

    fn is_array_field(&self, field: &str) -> bool {
        self.array_fields.contains(field)
    }
}

impl ConditionBuilder for PgvectorConditionBuilder {
    fn exact_match(&self, field: &str, value: &MatchValue) -> Result<String, CompileError> {
        let column = quote_ident(field);

        if self.is_array_field(field) {
            let json = match value {
                MatchValue::One(v) => serde_json::to_string(v),
                MatchValue::Any(values) => serde_json::to_string(values.as_slice()),
            }
            .map_err(|e| CompileError::Encoding {
                field: field.to_string(),
                message: e.to_string(),
            })?;
            return Ok(format!("{} @> {}::jsonb", column, quote_literal(&json)));
        }

        match value {
            MatchValue::One(v) => Ok(format!("{} = {}", column, scalar_literal(v))),
            MatchValue::Any(values) => {
                let list: Vec<String> = values.as_slice().iter().map(scalar_literal).collect();
                Ok(format!("{} IN ({})", column, list.join(", ")))
            }
        }
    }

    fn range(&self, field: &str, bounds: &RangeBounds) -> Result<String, CompileError> {
        let column = quote_ident(field);
        let clauses: Vec<String> = [
            ("<", bounds.lt()),
            (">", bounds.gt()),
            ("<=", bounds.lte()),
            (">=", bounds.gte()),
        ]
        .into_iter()
        .filter_map(|(op, bound)| bound.map(|b| format!("{} {} {}", column, op, bound_literal(b))))
        .collect();
        Ok(format!("({})", clauses.join(" AND ")))
    }

    fn geo(&self, field: &str, area: &GeoRadius) -> Result<String, CompileError> {
        self.capabilities.check_geo(field)?;
        // earthdistance points are (longitude, latitude)
        Ok(format!(
            "(({} <@> point({}, {})) * {} <= {})",
            quote_ident(field),
            area.lon(),
            area.lat(),
            METERS_PER_MILE,
            area.radius()
        ))
    }
}

/// Double-quote an identifier, doubling embedded `"`.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a string literal, doubling embedded `'`.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Equality literals are always quoted; PostgreSQL coerces an untyped literal
/// to the column type.
fn scalar_literal(value: &Scalar) -> String {
    match value {
        Scalar::Bool(b) => quote_literal(&b.to_string()),
        Scalar::Int(i) => quote_literal(&i.to_string()),
        Scalar::Float(f) => quote_literal(&f.to_string()),
        Scalar::String(s) => quote_literal(s),
    }
}

/// Range bounds render numbers bare so the comparison stays numeric.
fn bound_literal(value: &Scalar) -> String {
    match value {
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(_) | Scalar::String(_) => scalar_literal(value),
    }
}

//! Decoding of the benchmark dataset's JSON condition format.
//!
//! ```json
//! {
//!   "and": [
//!     { "update_date_ts": { "range": { "gte": 1500000000, "lt": 1600000000 } } },
//!     { "labels": { "match": { "value": ["cs.AI"] } } }
//!   ],
//!   "or": [
//!     { "city": { "geo": { "lat": 52.52, "lon": 13.40, "radius": 5000 } } }
//!   ]
//! }
//! ```
//!
//! Each group entry maps a field name to one or more condition kinds
//! (`match`, `range`, `geo`); every kind becomes its own predicate, in entry
//! order. An entry keyed `and`/`or` holding an array nests a combinator.

use serde_json::{Map, Value};

use super::{Bounds, Filter, FilterError, MetaConditions, Scalar};

/// Decode a conditions document. `null` and `{}` mean "no filter".
pub fn parse_conditions(value: &Value) -> Result<Option<MetaConditions>, FilterError> {
    let object = match value {
        Value::Null => return Ok(None),
        Value::Object(object) => object,
        other => {
            return Err(FilterError::Malformed(format!(
                "conditions must be an object, got {other}"
            )));
        }
    };

    if let Some(key) = object.keys().find(|k| *k != "and" && *k != "or") {
        return Err(FilterError::Malformed(format!(
            "unknown conditions group '{key}'"
        )));
    }

    let and = parse_group(object.get("and"))?;
    let or = parse_group(object.get("or"))?;
    let conditions = MetaConditions::new(and, or);

    Ok((!conditions.is_empty()).then_some(conditions))
}

fn parse_group(group: Option<&Value>) -> Result<Vec<Filter>, FilterError> {
    match group {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(entries)) => {
            let mut filters = Vec::new();
            for entry in entries {
                parse_entry(entry, &mut filters)?;
            }
            Ok(filters)
        }
        Some(other) => Err(FilterError::Malformed(format!(
            "condition group must be an array, got {other}"
        ))),
    }
}

fn parse_entry(entry: &Value, filters: &mut Vec<Filter>) -> Result<(), FilterError> {
    let Value::Object(fields) = entry else {
        return Err(FilterError::Malformed(format!(
            "condition entry must be an object, got {entry}"
        )));
    };
    if fields.is_empty() {
        return Err(FilterError::Malformed(
            "condition entry has no fields".into(),
        ));
    }

    for (field, conditions) in fields {
        match (field.as_str(), conditions) {
            ("and", Value::Array(_)) => filters.push(Filter::and(parse_group(Some(conditions))?)?),
            ("or", Value::Array(_)) => filters.push(Filter::or(parse_group(Some(conditions))?)?),
            (_, Value::Object(kinds)) => {
                if kinds.is_empty() {
                    return Err(FilterError::Malformed(format!(
                        "no condition given for '{field}'"
                    )));
                }
                for (kind, payload) in kinds {
                    filters.push(parse_condition(field, kind, payload)?);
                }
            }
            (_, other) => {
                return Err(FilterError::Malformed(format!(
                    "conditions for '{field}' must be an object, got {other}"
                )));
            }
        }
    }
    Ok(())
}

fn parse_condition(field: &str, kind: &str, payload: &Value) -> Result<Filter, FilterError> {
    let Value::Object(payload) = payload else {
        return Err(FilterError::Malformed(format!(
            "'{kind}' condition on '{field}' must be an object"
        )));
    };

    match kind {
        "match" => {
            let value = payload.get("value").ok_or_else(|| {
                FilterError::Malformed(format!("match condition on '{field}' has no value"))
            })?;
            match value {
                Value::Array(items) => {
                    let values = items
                        .iter()
                        .map(|v| scalar(field, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    Filter::exact_match(field, values)
                }
                other => Filter::exact_match(field, scalar(field, other)?),
            }
        }
        "range" => {
            let bounds = Bounds {
                lt: optional_scalar(field, payload, "lt")?,
                gt: optional_scalar(field, payload, "gt")?,
                lte: optional_scalar(field, payload, "lte")?,
                gte: optional_scalar(field, payload, "gte")?,
            };
            Filter::range(field, bounds)
        }
        "geo" => Filter::geo(
            field,
            number(field, payload, "lat")?,
            number(field, payload, "lon")?,
            number(field, payload, "radius")?,
        ),
        other => Err(FilterError::Malformed(format!(
            "unknown condition type '{other}' on '{field}'"
        ))),
    }
}

fn scalar(field: &str, value: &Value) -> Result<Scalar, FilterError> {
    match value {
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Scalar::Int(i)),
            None => n.as_f64().map(Scalar::Float).ok_or_else(|| {
                FilterError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("unrepresentable number {n}"),
                }
            }),
        },
        Value::String(s) => Ok(Scalar::String(s.clone())),
        other => Err(FilterError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a scalar, got {other}"),
        }),
    }
}

fn optional_scalar(
    field: &str,
    payload: &Map<String, Value>,
    key: &str,
) -> Result<Option<Scalar>, FilterError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar(field, value).map(Some),
    }
}

fn number(field: &str, payload: &Map<String, Value>, key: &str) -> Result<f64, FilterError> {
    payload
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| FilterError::InvalidValue {
            field: field.to_string(),
            reason: format!("geo condition requires numeric '{key}'"),
        })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        capabilities::{Capabilities, EngineKind},
        config::{FieldSchema, FieldType},
        filter::{PgvectorConditionBuilder, compile_conditions},
    };

    fn compile_json(value: Value) -> Option<String> {
        let builder = PgvectorConditionBuilder::new(
            Capabilities::for_engine(EngineKind::PgvectorHnsw),
            &[FieldSchema::new("labels", FieldType::Json)],
        );
        let conditions = parse_conditions(&value).unwrap();
        compile_conditions(&builder, conditions.as_ref()).unwrap()
    }

    #[test]
    fn test_null_and_empty_mean_no_filter() {
        assert_eq!(parse_conditions(&Value::Null).unwrap(), None);
        assert_eq!(parse_conditions(&json!({})).unwrap(), None);
        assert_eq!(
            parse_conditions(&json!({"and": [], "or": null})).unwrap(),
            None
        );
    }

    #[test]
    fn test_decoded_conditions_match_hand_built_tree() {
        let decoded = parse_conditions(&json!({
            "and": [
                {"year": {"range": {"gte": 2015, "lt": 2020}}},
                {"labels": {"match": {"value": ["ai", "nlp"]}}}
            ]
        }))
        .unwrap()
        .unwrap();

        let expected = MetaConditions::all(vec![
            Filter::range("year", Bounds::new().gte(2015).lt(2020)).unwrap(),
            Filter::exact_match("labels", vec!["ai", "nlp"]).unwrap(),
        ]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn test_decoded_conditions_compile() {
        let sql = compile_json(json!({
            "and": [{"a": {"match": {"value": 80}}}],
            "or": [{"labels": {"match": {"value": ["x"]}}}]
        }));
        assert_eq!(
            sql.as_deref(),
            Some("(\"labels\" @> '[\"x\"]'::jsonb) AND (\"a\" = '80')")
        );
    }

    #[test]
    fn test_null_range_bounds_are_ignored() {
        let sql = compile_json(json!({
            "and": [{"price": {"range": {"lt": null, "gt": 1.5, "lte": null, "gte": null}}}]
        }));
        assert_eq!(sql.as_deref(), Some("((\"price\" > 1.5))"));
    }

    #[test]
    fn test_nested_combinator_entry() {
        let sql = compile_json(json!({
            "and": [{"or": [
                {"a": {"match": {"value": "x"}}},
                {"b": {"match": {"value": "y"}}}
            ]}]
        }));
        assert_eq!(sql.as_deref(), Some("((\"a\" = 'x' OR \"b\" = 'y'))"));
    }

    #[test]
    fn test_geo_condition_decodes() {
        let conditions = parse_conditions(&json!({
            "and": [{"location": {"geo": {"lat": 52.52, "lon": 13.4, "radius": 1000}}}]
        }))
        .unwrap()
        .unwrap();
        let filters: Vec<_> = conditions.and_group().unwrap().iter().collect();
        assert!(matches!(filters[0], Filter::Geo { .. }));
    }

    #[test]
    fn test_malformed_documents_are_rejected() {
        assert!(matches!(
            parse_conditions(&json!({"not": []})),
            Err(FilterError::Malformed(_))
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{"a": {"fuzzy": {"value": 1}}}]})),
            Err(FilterError::Malformed(_))
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{"a": {"range": {}}}]})),
            Err(FilterError::NoBounds { .. })
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{"or": []}]})),
            Err(FilterError::EmptyCombinator)
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{"a": {"match": {"value": {"x": 1}}}}]})),
            Err(FilterError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{"year": {}}]})),
            Err(FilterError::Malformed(_))
        ));
        assert!(matches!(
            parse_conditions(&json!({"and": [{}]})),
            Err(FilterError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_entry_does_not_drop_sibling_group() {
        let result = parse_conditions(&json!({
            "or": [{"a": {}}],
            "and": [{"b": {"match": {"value": 1}}}]
        }));
        assert!(matches!(result, Err(FilterError::Malformed(_))));

        let result = parse_conditions(&json!({
            "or": [{"and": [{"a": {}}]}]
        }));
        assert!(matches!(result, Err(FilterError::Malformed(_))));
    }
}

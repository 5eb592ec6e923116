//! Backend-neutral filter tree for benchmark queries.
//!
//! A query filter is a boolean tree over three atomic predicate kinds:
//!
//! - [`Filter::ExactMatch`]: field equals a value (or, for array columns, contains it)
//! - [`Filter::Range`]: field lies within the present `lt`/`gt`/`lte`/`gte` bounds
//! - [`Filter::Geo`]: field lies within a radius around a coordinate
//!
//! combined with [`Filter::And`] and [`Filter::Or`].
//!
//! Malformed shapes (empty combinators, bound-less ranges, conflicting bounds)
//! cannot be built: the payload types [`Children`], [`RangeBounds`],
//! [`GeoRadius`] and [`ScalarList`] only come out of validating constructors.
//!
//! The root of a query filter is [`MetaConditions`], which mirrors the
//! benchmark's filter schema: an OR-group and an AND-group side by side.
//!
//! # Example
//!
//! ```
//! use vecbench::filter::{Bounds, Filter, MetaConditions};
//!
//! let conditions = MetaConditions::all(vec![
//!     Filter::exact_match("labels", vec!["ai", "nlp"]).unwrap(),
//!     Filter::range("year", Bounds::new().gte(2015).lt(2020)).unwrap(),
//! ]);
//! assert!(!conditions.is_empty());
//! ```

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::FilterError;

/// A scalar value a predicate compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Scalar {
    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Bool(_) | Scalar::String(_) => None,
        }
    }

    /// Numeric ordering used for bound consistency checks. Two integers are
    /// compared exactly; anything else numeric goes through `f64`.
    fn numeric_cmp(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            Scalar::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Scalar {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<f64> for Scalar {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Non-empty list of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarList(Vec<Scalar>);

impl ScalarList {
    pub fn new(values: Vec<Scalar>) -> Result<Self, FilterError> {
        if values.is_empty() {
            return Err(FilterError::EmptyMatchList);
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[Scalar] {
        &self.0
    }
}

/// Right-hand side of an exact-match predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchValue {
    One(Scalar),
    Any(ScalarList),
}

/// Unvalidated range bounds, turned into [`RangeBounds`] by [`Filter::range`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bounds {
    pub lt: Option<Scalar>,
    pub gt: Option<Scalar>,
    pub lte: Option<Scalar>,
    pub gte: Option<Scalar>,
}

impl Bounds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lt(mut self, value: impl Into<Scalar>) -> Self {
        self.lt = Some(value.into());
        self
    }

    pub fn gt(mut self, value: impl Into<Scalar>) -> Self {
        self.gt = Some(value.into());
        self
    }

    pub fn lte(mut self, value: impl Into<Scalar>) -> Self {
        self.lte = Some(value.into());
        self
    }

    pub fn gte(mut self, value: impl Into<Scalar>) -> Self {
        self.gte = Some(value.into());
        self
    }
}

/// Validated range bounds: at least one bound, no conflicting pair.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBounds {
    lt: Option<Scalar>,
    gt: Option<Scalar>,
    lte: Option<Scalar>,
    gte: Option<Scalar>,
}

impl RangeBounds {
    pub fn new(field: &str, bounds: Bounds) -> Result<Self, FilterError> {
        let Bounds { lt, gt, lte, gte } = bounds;

        if lt.is_none() && gt.is_none() && lte.is_none() && gte.is_none() {
            return Err(FilterError::NoBounds {
                field: field.to_string(),
            });
        }
        if [&lt, &gt, &lte, &gte]
            .into_iter()
            .flatten()
            .any(|b| !b.is_finite())
        {
            return Err(FilterError::InvalidValue {
                field: field.to_string(),
                reason: "range bounds must be finite".into(),
            });
        }
        if lt.is_some() && lte.is_some() {
            return Err(FilterError::ConflictingBounds {
                field: field.to_string(),
                reason: "both lt and lte given".into(),
            });
        }
        if gt.is_some() && gte.is_some() {
            return Err(FilterError::ConflictingBounds {
                field: field.to_string(),
                reason: "both gt and gte given".into(),
            });
        }

        // (value, exclusive) for each side
        let lower = gt
            .as_ref()
            .map(|b| (b, true))
            .or(gte.as_ref().map(|b| (b, false)));
        let upper = lt
            .as_ref()
            .map(|b| (b, true))
            .or(lte.as_ref().map(|b| (b, false)));
        if let (Some((lo, lo_excl)), Some((hi, hi_excl))) = (lower, upper)
            && let Some(order) = lo.numeric_cmp(hi)
            && (order == Ordering::Greater || (order == Ordering::Equal && (lo_excl || hi_excl)))
        {
            return Err(FilterError::ConflictingBounds {
                field: field.to_string(),
                reason: format!("interval between {} and {} is empty", display(lo), display(hi)),
            });
        }

        Ok(Self { lt, gt, lte, gte })
    }

    pub fn lt(&self) -> Option<&Scalar> {
        self.lt.as_ref()
    }

    pub fn gt(&self) -> Option<&Scalar> {
        self.gt.as_ref()
    }

    pub fn lte(&self) -> Option<&Scalar> {
        self.lte.as_ref()
    }

    pub fn gte(&self) -> Option<&Scalar> {
        self.gte.as_ref()
    }
}

fn display(value: &Scalar) -> String {
    match value {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::String(s) => s.clone(),
    }
}

/// Circle on the earth's surface; `radius` is in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRadius {
    lat: f64,
    lon: f64,
    radius: f64,
}

impl GeoRadius {
    pub fn new(field: &str, lat: f64, lon: f64, radius: f64) -> Result<Self, FilterError> {
        let invalid = |reason: &str| FilterError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if !(-90.0..=90.0).contains(&lat) {
            return Err(invalid("latitude must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(invalid("longitude must be within [-180, 180]"));
        }
        if !radius.is_finite() || radius < 0.0 {
            return Err(invalid("radius must be a non-negative number of meters"));
        }
        Ok(Self { lat, lon, radius })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }
}

/// Non-empty, ordered children of a combinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Children(Vec<Filter>);

impl Children {
    pub fn new(filters: Vec<Filter>) -> Result<Self, FilterError> {
        if filters.is_empty() {
            return Err(FilterError::EmptyCombinator);
        }
        Ok(Self(filters))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Children {
    type Item = &'a Filter;
    type IntoIter = std::slice::Iter<'a, Filter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A node of the filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    ExactMatch { field: String, value: MatchValue },
    Range { field: String, bounds: RangeBounds },
    Geo { field: String, area: GeoRadius },
    And(Children),
    Or(Children),
}

impl Filter {
    /// Match a single value, or any value of a list.
    pub fn exact_match(
        field: impl Into<String>,
        value: impl IntoMatchValue,
    ) -> Result<Self, FilterError> {
        let field = field.into();
        let value = value.into_match_value()?;
        let values = match &value {
            MatchValue::One(scalar) => std::slice::from_ref(scalar),
            MatchValue::Any(list) => list.as_slice(),
        };
        if !values.iter().all(Scalar::is_finite) {
            return Err(FilterError::InvalidValue {
                field,
                reason: "match values must be finite".into(),
            });
        }
        Ok(Self::ExactMatch { field, value })
    }

    pub fn range(field: impl Into<String>, bounds: Bounds) -> Result<Self, FilterError> {
        let field = field.into();
        let bounds = RangeBounds::new(&field, bounds)?;
        Ok(Self::Range { field, bounds })
    }

    pub fn geo(
        field: impl Into<String>,
        lat: f64,
        lon: f64,
        radius: f64,
    ) -> Result<Self, FilterError> {
        let field = field.into();
        let area = GeoRadius::new(&field, lat, lon, radius)?;
        Ok(Self::Geo { field, area })
    }

    pub fn and(filters: Vec<Filter>) -> Result<Self, FilterError> {
        Ok(Self::And(Children::new(filters)?))
    }

    pub fn or(filters: Vec<Filter>) -> Result<Self, FilterError> {
        Ok(Self::Or(Children::new(filters)?))
    }
}

/// Conversion into a validated [`MatchValue`].
pub trait IntoMatchValue {
    fn into_match_value(self) -> Result<MatchValue, FilterError>;
}

impl IntoMatchValue for MatchValue {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(self)
    }
}

impl IntoMatchValue for Scalar {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self))
    }
}

impl IntoMatchValue for &str {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl IntoMatchValue for String {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl IntoMatchValue for i64 {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl IntoMatchValue for i32 {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl IntoMatchValue for f64 {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl IntoMatchValue for bool {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        Ok(MatchValue::One(self.into()))
    }
}

impl<T: Into<Scalar>> IntoMatchValue for Vec<T> {
    fn into_match_value(self) -> Result<MatchValue, FilterError> {
        let values = self.into_iter().map(Into::into).collect();
        Ok(MatchValue::Any(ScalarList::new(values)?))
    }
}

/// Root of a query filter.
///
/// The benchmark filter schema expresses OR'd alternatives and AND'd
/// requirements as sibling groups. When both are present they are joined
/// with AND, OR-group first. Empty groups count as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaConditions {
    or: Option<Children>,
    and: Option<Children>,
}

impl MetaConditions {
    pub fn new(and: Vec<Filter>, or: Vec<Filter>) -> Self {
        Self {
            or: Children::new(or).ok(),
            and: Children::new(and).ok(),
        }
    }

    /// Only an AND-group.
    pub fn all(filters: Vec<Filter>) -> Self {
        Self::new(filters, Vec::new())
    }

    /// Only an OR-group.
    pub fn any(filters: Vec<Filter>) -> Self {
        Self::new(Vec::new(), filters)
    }

    pub fn and_group(&self) -> Option<&Children> {
        self.and.as_ref()
    }

    pub fn or_group(&self) -> Option<&Children> {
        self.or.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_none() && self.or.is_none()
    }
}

impl From<Filter> for MetaConditions {
    fn from(filter: Filter) -> Self {
        Self::all(vec![filter])
    }
}

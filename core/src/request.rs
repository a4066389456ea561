use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::expression::{Expression, ExpressionParts};

/// Bucketing granularity for time dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeGrain {
    #[serde(rename = "TIME_GRAIN_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "TIME_GRAIN_MILLISECOND")]
    Millisecond,
    #[serde(rename = "TIME_GRAIN_SECOND")]
    Second,
    #[serde(rename = "TIME_GRAIN_MINUTE")]
    Minute,
    #[serde(rename = "TIME_GRAIN_HOUR")]
    Hour,
    #[serde(rename = "TIME_GRAIN_DAY")]
    Day,
    #[serde(rename = "TIME_GRAIN_WEEK")]
    Week,
    #[serde(rename = "TIME_GRAIN_MONTH")]
    Month,
    #[serde(rename = "TIME_GRAIN_QUARTER")]
    Quarter,
    #[serde(rename = "TIME_GRAIN_YEAR")]
    Year,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Dimension {
    pub name: String,
    /// When set, the runtime buckets this dimension by the grain
    #[serde(default, alias = "timeGrain")]
    pub time_grain: Option<TimeGrain>,
}

impl Dimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time_grain: None,
        }
    }

    pub fn with_grain(name: impl Into<String>, grain: TimeGrain) -> Self {
        Self {
            name: name.into(),
            time_grain: Some(grain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Measure {
    pub name: String,
}

impl Measure {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Query time window; both ends carry an explicit UTC offset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl TimeRange {
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        Self { start, end }
    }

    fn validate(&self, field: &str) -> Result<(), ValidationError> {
        if self.end < self.start {
            return Err(ValidationError::new(
                field,
                "end time must not be before start time",
            ));
        }
        Ok(())
    }
}

/// Ordering on a dimension or measure name. Which of the two the name refers
/// to is resolved by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SortSpec {
    pub name: String,
    #[serde(default)]
    pub desc: Option<bool>,
}

impl SortSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: None,
        }
    }

    pub fn descending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: Some(true),
        }
    }
}

/// One analytical query against a metrics view.
///
/// `metrics_view` is routing information only; it selects the request path and
/// never appears in the wire body. Sequence order is the caller's grouping and
/// column order and is preserved through translation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "AggregationRequestArgs")]
pub struct AggregationRequest {
    pub metrics_view: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    pub sort: Option<Vec<SortSpec>>,
    pub time_range: Option<TimeRange>,
    pub comparison_time_range: Option<TimeRange>,
    pub pivot_on: Option<Vec<String>>,
    pub where_clause: Option<Expression>,
    pub having: Option<Expression>,
    /// Stored as an integer; the runtime expects a decimal string on the wire
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub exact: Option<bool>,
    pub fill_missing: Option<bool>,
    pub rows: Option<bool>,
}

impl AggregationRequest {
    pub fn new(metrics_view: impl Into<String>) -> Self {
        Self {
            metrics_view: metrics_view.into(),
            dimensions: Vec::new(),
            measures: Vec::new(),
            sort: None,
            time_range: None,
            comparison_time_range: None,
            pivot_on: None,
            where_clause: None,
            having: None,
            limit: None,
            offset: None,
            exact: None,
            fill_missing: None,
            rows: None,
        }
    }

    pub fn dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.push(dimension);
        self
    }

    pub fn measure(mut self, measure: Measure) -> Self {
        self.measures.push(measure);
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(sort);
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn filter(mut self, expr: Expression) -> Self {
        self.where_clause = Some(expr);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Decode caller-supplied JSON (snake_case keys) into a validated request.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let args: AggregationRequestArgs = serde_json::from_value(value)
            .map_err(|e| ValidationError::new("request", format!("failed to decode request: {e}")))?;
        Self::try_from(args)
    }

    /// Structural checks that the types alone do not enforce.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.metrics_view.trim().is_empty() {
            return Err(ValidationError::new(
                "metrics_view",
                "metrics view name is required",
            ));
        }
        for (index, dimension) in self.dimensions.iter().enumerate() {
            if dimension.name.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("dimensions[{index}].name"),
                    "dimension name is required",
                ));
            }
        }
        for (index, measure) in self.measures.iter().enumerate() {
            if measure.name.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("measures[{index}].name"),
                    "measure name is required",
                ));
            }
        }
        for (index, sort) in self.sort.iter().flatten().enumerate() {
            if sort.name.trim().is_empty() {
                return Err(ValidationError::new(
                    format!("sort[{index}].name"),
                    "sort name is required",
                ));
            }
        }
        if let Some(range) = &self.time_range {
            range.validate("time_range")?;
        }
        if let Some(range) = &self.comparison_time_range {
            range.validate("comparison_time_range")?;
        }
        if let Some(expr) = &self.where_clause {
            expr.validate().map_err(|e| e.nested("where"))?;
        }
        if let Some(expr) = &self.having {
            expr.validate().map_err(|e| e.nested("having"))?;
        }
        Ok(())
    }
}

/// Raw shape of a caller's aggregation request, before validation.
#[derive(Debug, Deserialize)]
pub struct AggregationRequestArgs {
    #[serde(alias = "metricsView")]
    pub metrics_view: String,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub sort: Option<Vec<SortSpec>>,
    #[serde(default, alias = "timeRange")]
    pub time_range: Option<TimeRange>,
    #[serde(default, alias = "comparisonTimeRange")]
    pub comparison_time_range: Option<TimeRange>,
    #[serde(default, alias = "pivotOn")]
    pub pivot_on: Option<Vec<String>>,
    #[serde(default, rename = "where")]
    pub where_clause: Option<ExpressionParts>,
    #[serde(default)]
    pub having: Option<ExpressionParts>,
    #[serde(default)]
    pub limit: Option<Value>,
    #[serde(default)]
    pub offset: Option<Value>,
    #[serde(default)]
    pub exact: Option<bool>,
    #[serde(default, alias = "fillMissing")]
    pub fill_missing: Option<bool>,
    #[serde(default)]
    pub rows: Option<bool>,
}

impl TryFrom<AggregationRequestArgs> for AggregationRequest {
    type Error = ValidationError;

    fn try_from(args: AggregationRequestArgs) -> Result<Self, Self::Error> {
        let where_clause = args
            .where_clause
            .map(|p| Expression::try_from(p).map_err(|e| e.nested("where")))
            .transpose()?;
        let having = args
            .having
            .map(|p| Expression::try_from(p).map_err(|e| e.nested("having")))
            .transpose()?;

        let request = AggregationRequest {
            metrics_view: args.metrics_view,
            dimensions: args.dimensions,
            measures: args.measures,
            sort: args.sort,
            time_range: args.time_range,
            comparison_time_range: args.comparison_time_range,
            pivot_on: args.pivot_on,
            where_clause,
            having,
            limit: parse_non_negative(args.limit, "limit")?,
            offset: parse_non_negative(args.offset, "offset")?,
            exact: args.exact,
            fill_missing: args.fill_missing,
            rows: args.rows,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Accepts a JSON integer or a decimal string; the runtime's string encoding
/// of these fields is a protocol detail, so both spellings are taken here.
fn parse_non_negative(value: Option<Value>, field: &str) -> Result<Option<u64>, ValidationError> {
    let invalid = || ValidationError::new(field, "must be a non-negative integer");
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(invalid),
        Some(Value::String(s)) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

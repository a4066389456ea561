use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

const EXPRESSION_SLOTS: [&str; 4] = ["ident", "val", "cond", "subquery"];

/// Comparison and boolean operators understood by the runtime.
/// Always serialized as the explicit `OPERATION_*` token, never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "OPERATION_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "OPERATION_EQ")]
    Eq,
    #[serde(rename = "OPERATION_NEQ")]
    Neq,
    #[serde(rename = "OPERATION_LT")]
    Lt,
    #[serde(rename = "OPERATION_LTE")]
    Lte,
    #[serde(rename = "OPERATION_GT")]
    Gt,
    #[serde(rename = "OPERATION_GTE")]
    Gte,
    #[serde(rename = "OPERATION_OR")]
    Or,
    #[serde(rename = "OPERATION_AND")]
    And,
    #[serde(rename = "OPERATION_IN")]
    In,
    #[serde(rename = "OPERATION_NIN")]
    Nin,
    #[serde(rename = "OPERATION_LIKE")]
    Like,
    #[serde(rename = "OPERATION_NLIKE")]
    Nlike,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Unspecified,
        Operation::Eq,
        Operation::Neq,
        Operation::Lt,
        Operation::Lte,
        Operation::Gt,
        Operation::Gte,
        Operation::Or,
        Operation::And,
        Operation::In,
        Operation::Nin,
        Operation::Like,
        Operation::Nlike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Unspecified => "OPERATION_UNSPECIFIED",
            Operation::Eq => "OPERATION_EQ",
            Operation::Neq => "OPERATION_NEQ",
            Operation::Lt => "OPERATION_LT",
            Operation::Lte => "OPERATION_LTE",
            Operation::Gt => "OPERATION_GT",
            Operation::Gte => "OPERATION_GTE",
            Operation::Or => "OPERATION_OR",
            Operation::And => "OPERATION_AND",
            Operation::In => "OPERATION_IN",
            Operation::Nin => "OPERATION_NIN",
            Operation::Like => "OPERATION_LIKE",
            Operation::Nlike => "OPERATION_NLIKE",
        }
    }
}

/// A constant operand. Scalars (string, number, bool) or arrays only;
/// `null` would be indistinguishable from an unset slot on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Literal(Value);

impl Literal {
    pub fn new(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Null => Err(ValidationError::new("val", "literal must not be null")),
            Value::Object(_) => Err(ValidationError::new(
                "val",
                "literal must be a JSON scalar or array, not an object",
            )),
            other => Ok(Self(other)),
        }
    }

    /// Array literal, e.g. the right-hand side of `OPERATION_IN`.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Literal>,
    {
        Self(Value::Array(
            items.into_iter().map(|item| item.into().0).collect(),
        ))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Self(Value::from(value))
    }
}

impl From<u64> for Literal {
    fn from(value: u64) -> Self {
        Self(Value::from(value))
    }
}

impl From<bool> for Literal {
    fn from(value: bool) -> Self {
        Self(Value::Bool(value))
    }
}

/// Boolean/comparison node. Operand order matters for asymmetric operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub op: Operation,
    pub exprs: Vec<Expression>,
}

/// Correlated filter against another aggregation of the same metrics view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subquery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measures: Option<Vec<String>>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Expression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<Expression>,
}

/// Filter expression tree. Exactly one variant by construction; the wire
/// shape is a single-key object (`ident`, `val`, `cond` or `subquery`).
///
/// Untrusted input goes through [`ExpressionParts`], which is validated
/// eagerly on decode so malformed filters never reach the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExpressionParts")]
pub enum Expression {
    #[serde(rename = "ident")]
    Identifier(String),
    #[serde(rename = "val")]
    Literal(Literal),
    #[serde(rename = "cond")]
    Condition(Condition),
    #[serde(rename = "subquery")]
    Subquery(Box<Subquery>),
}

impl Expression {
    pub fn ident(name: impl Into<String>) -> Self {
        Expression::Identifier(name.into())
    }

    pub fn val(value: impl Into<Literal>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn cond(op: Operation, exprs: impl IntoIterator<Item = Expression>) -> Self {
        Expression::Condition(Condition {
            op,
            exprs: exprs.into_iter().collect(),
        })
    }

    pub fn and(exprs: impl IntoIterator<Item = Expression>) -> Self {
        Self::cond(Operation::And, exprs)
    }

    pub fn or(exprs: impl IntoIterator<Item = Expression>) -> Self {
        Self::cond(Operation::Or, exprs)
    }

    /// `<ident> <op> <value>`, the common leaf comparison.
    pub fn compare(op: Operation, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        Self::cond(op, [Self::ident(name), Self::val(value)])
    }

    pub fn subquery(subquery: Subquery) -> Self {
        Expression::Subquery(Box::new(subquery))
    }

    /// Checks a tree built in code against the rules decoding enforces.
    /// Constructors accept any name; this is where an empty identifier is
    /// caught before the tree is sent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Expression::Identifier(name) if name.trim().is_empty() => {
                Err(ValidationError::new("ident", "identifier must not be empty"))
            }
            Expression::Identifier(_) | Expression::Literal(_) => Ok(()),
            Expression::Condition(cond) => {
                cond.exprs.iter().enumerate().try_for_each(|(index, operand)| {
                    operand
                        .validate()
                        .map_err(|e| e.nested(&format!("[{index}]")).nested("cond.exprs"))
                })
            }
            Expression::Subquery(subquery) => {
                if let Some(expr) = &subquery.where_clause {
                    expr.validate()
                        .map_err(|e| e.nested("where").nested("subquery"))?;
                }
                if let Some(expr) = &subquery.having {
                    expr.validate()
                        .map_err(|e| e.nested("having").nested("subquery"))?;
                }
                Ok(())
            }
        }
    }

    /// Wire key of the populated variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Identifier(_) => "ident",
            Expression::Literal(_) => "val",
            Expression::Condition(_) => "cond",
            Expression::Subquery(_) => "subquery",
        }
    }
}

/// Candidate expression as received from a caller: four optional slots.
/// A `null` slot counts as unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpressionParts {
    #[serde(default)]
    pub ident: Option<String>,
    #[serde(default)]
    pub val: Option<Value>,
    #[serde(default)]
    pub cond: Option<ConditionParts>,
    #[serde(default)]
    pub subquery: Option<SubqueryParts>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionParts {
    pub op: Operation,
    #[serde(default)]
    pub exprs: Vec<ExpressionParts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubqueryParts {
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub measures: Option<Vec<String>>,
    #[serde(default, rename = "where")]
    pub where_clause: Option<Box<ExpressionParts>>,
    #[serde(default)]
    pub having: Option<Box<ExpressionParts>>,
}

impl ExpressionParts {
    fn populated_slots(&self) -> Vec<&'static str> {
        let flags = [
            self.ident.is_some(),
            self.val.is_some(),
            self.cond.is_some(),
            self.subquery.is_some(),
        ];
        EXPRESSION_SLOTS
            .iter()
            .zip(flags)
            .filter_map(|(slot, set)| set.then_some(*slot))
            .collect()
    }
}

impl TryFrom<ExpressionParts> for Expression {
    type Error = ValidationError;

    fn try_from(parts: ExpressionParts) -> Result<Self, Self::Error> {
        let populated = parts.populated_slots();
        match (parts.ident, parts.val, parts.cond, parts.subquery) {
            (Some(name), None, None, None) => {
                if name.trim().is_empty() {
                    return Err(ValidationError::new("ident", "identifier must not be empty"));
                }
                Ok(Expression::Identifier(name))
            }
            (None, Some(value), None, None) => Literal::new(value).map(Expression::Literal),
            (None, None, Some(cond), None) => {
                let mut exprs = Vec::with_capacity(cond.exprs.len());
                for (index, operand) in cond.exprs.into_iter().enumerate() {
                    let expr = Expression::try_from(operand)
                        .map_err(|e| e.nested(&format!("[{index}]")).nested("cond.exprs"))?;
                    exprs.push(expr);
                }
                Ok(Expression::Condition(Condition { op: cond.op, exprs }))
            }
            (None, None, None, Some(subquery)) => Subquery::try_from(subquery)
                .map(|s| Expression::Subquery(Box::new(s)))
                .map_err(|e| e.nested("subquery")),
            _ if populated.is_empty() => Err(ValidationError::new(
                "",
                format!("one of {} must be set", EXPRESSION_SLOTS.join(", ")),
            )),
            _ => Err(ValidationError::new(
                "",
                format!(
                    "only one of {} can be set, but got {} fields set ({})",
                    EXPRESSION_SLOTS.join(", "),
                    populated.len(),
                    populated.join(", ")
                ),
            )),
        }
    }
}

impl TryFrom<SubqueryParts> for Subquery {
    type Error = ValidationError;

    fn try_from(parts: SubqueryParts) -> Result<Self, Self::Error> {
        let where_clause = parts
            .where_clause
            .map(|p| Expression::try_from(*p).map_err(|e| e.nested("where")))
            .transpose()?;
        let having = parts
            .having
            .map(|p| Expression::try_from(*p).map_err(|e| e.nested("having")))
            .transpose()?;
        Ok(Subquery {
            dimension: parts.dimension,
            measures: parts.measures,
            where_clause,
            having,
        })
    }
}

/// Decode and validate an untrusted expression.
pub fn parse_expression(value: Value) -> Result<Expression, ValidationError> {
    let parts: ExpressionParts = serde_json::from_value(value)
        .map_err(|e| ValidationError::new("", format!("invalid expression: {e}")))?;
    Expression::try_from(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exactly_one_slot_is_accepted() {
        for candidate in [
            json!({"ident": "country"}),
            json!({"val": "US"}),
            json!({"val": [1, 2, 3]}),
            json!({"cond": {"op": "OPERATION_EQ", "exprs": [{"ident": "a"}, {"val": 1}]}}),
            json!({"subquery": {"dimension": "country", "measures": ["revenue"]}}),
        ] {
            assert!(
                parse_expression(candidate.clone()).is_ok(),
                "expected {candidate} to be accepted"
            );
        }
    }

    #[test]
    fn zero_slots_are_rejected() {
        let err = parse_expression(json!({})).unwrap_err();
        assert!(err.message.contains("must be set"));

        let err = parse_expression(json!({"ident": null, "val": null})).unwrap_err();
        assert!(err.message.contains("must be set"));
    }

    #[test]
    fn multiple_slots_are_rejected() {
        let err = parse_expression(json!({"ident": "a", "val": 1})).unwrap_err();
        assert!(err.message.contains("got 2 fields set"));
        assert!(err.message.contains("ident, val"));

        let err = parse_expression(json!({
            "ident": "a",
            "val": 1,
            "cond": {"op": "OPERATION_AND", "exprs": []},
            "subquery": {}
        }))
        .unwrap_err();
        assert!(err.message.contains("got 4 fields set"));
    }

    #[test]
    fn nested_operand_errors_carry_a_field_path() {
        let err = parse_expression(json!({
            "cond": {
                "op": "OPERATION_AND",
                "exprs": [
                    {"ident": "country"},
                    {"cond": {"op": "OPERATION_EQ", "exprs": [{"ident": "a"}, {}]}}
                ]
            }
        }))
        .unwrap_err();
        assert_eq!(err.field, "cond.exprs[1].cond.exprs[1]");
    }

    #[test]
    fn subquery_filters_are_validated_recursively() {
        let err = parse_expression(json!({
            "subquery": {"dimension": "country", "having": {"ident": "x", "val": 2}}
        }))
        .unwrap_err();
        assert_eq!(err.field, "subquery.having");
    }

    #[test]
    fn object_literals_and_empty_identifiers_are_rejected() {
        let err = parse_expression(json!({"val": {"nested": true}})).unwrap_err();
        assert_eq!(err.field, "val");

        let err = parse_expression(json!({"ident": "  "})).unwrap_err();
        assert_eq!(err.field, "ident");
    }

    #[test]
    fn built_trees_follow_the_decode_rules() {
        let built = Expression::ident("");
        assert_eq!(built.validate().unwrap_err().field, "ident");
        assert!(parse_expression(json!({"ident": ""})).is_err());

        let nested = Expression::and([
            Expression::compare(Operation::Eq, "country", "US"),
            Expression::subquery(Subquery {
                dimension: Some("country".to_string()),
                having: Some(Expression::compare(Operation::Gt, " ", 10_i64)),
                ..Subquery::default()
            }),
        ]);
        assert_eq!(
            nested.validate().unwrap_err().field,
            "cond.exprs[1].subquery.having.cond.exprs[0].ident"
        );
        assert!(Expression::compare(Operation::Eq, "country", "US").validate().is_ok());
    }

    #[test]
    fn unknown_operation_token_is_rejected() {
        let err = parse_expression(json!({"cond": {"op": "EQ", "exprs": []}})).unwrap_err();
        assert!(err.message.contains("invalid expression"));
    }

    #[test]
    fn serializes_single_key_wire_shape() {
        let expr = Expression::and([
            Expression::cond(
                Operation::In,
                [
                    Expression::ident("country"),
                    Expression::val(Literal::list(["US", "CA"])),
                ],
            ),
            Expression::compare(Operation::Gte, "revenue", 1000_i64),
        ]);

        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({
                "cond": {
                    "op": "OPERATION_AND",
                    "exprs": [
                        {"cond": {"op": "OPERATION_IN", "exprs": [{"ident": "country"}, {"val": ["US", "CA"]}]}},
                        {"cond": {"op": "OPERATION_GTE", "exprs": [{"ident": "revenue"}, {"val": 1000}]}}
                    ]
                }
            })
        );
    }

    #[test]
    fn subquery_omits_unset_fields() {
        let expr = Expression::subquery(Subquery {
            dimension: Some("country".to_string()),
            measures: None,
            where_clause: None,
            having: Some(Expression::compare(Operation::Gt, "revenue", 10_i64)),
        });
        assert_eq!(
            serde_json::to_value(&expr).unwrap(),
            json!({
                "subquery": {
                    "dimension": "country",
                    "having": {"cond": {"op": "OPERATION_GT", "exprs": [{"ident": "revenue"}, {"val": 10}]}}
                }
            })
        );
    }

    #[test]
    fn decoded_tree_reserializes_to_the_same_shape() {
        let input = json!({
            "cond": {
                "op": "OPERATION_NLIKE",
                "exprs": [{"ident": "campaign"}, {"val": "%test%"}]
            }
        });
        let expr: Expression = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(expr.kind(), "cond");
        assert_eq!(serde_json::to_value(&expr).unwrap(), input);
    }

    #[test]
    fn operation_tokens_match_as_str() {
        for op in Operation::ALL {
            assert_eq!(serde_json::to_value(op).unwrap(), json!(op.as_str()));
        }
    }
}

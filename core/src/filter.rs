//! Structured search filters and their two wire encodings.
//!
//! A `FilterGroup` is an ordered list of conditions. The remote engine
//! evaluates them in order, so neither encoding ever re-sorts them:
//!
//! - query string: `query[0][attribute]=about.industries&query[0][operator]=or&query[0][sign]=equals&query[0][values][0]=saas`
//! - JSON body: `"query": [{"attribute": "...", "operator": "or", "sign": "equals", "values": ["saas"]}]`
//!
//! An empty group encodes to nothing at all, so the key is left out of the
//! request instead of being sent as an empty list.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::ApiError;
use crate::request::flatten_query;

/// How multiple values of one condition combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
        }
    }
}

impl FromStr for Operator {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "and" => Ok(Operator::And),
            "or" => Ok(Operator::Or),
            other => Err(ApiError::InvalidFilter(format!("unsupported operator `{other}`"))),
        }
    }
}

/// Comparison applied between the attribute and each value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Sign {
    Equals,
    ExactEquals,
    NotEquals,
    NotExactEquals,
    Contains,
    NotContains,
    GreaterThan,
    GreaterOrEqual,
    LowerThan,
    LowerOrEqual,
}

impl Sign {
    const ALL: [Sign; 10] = [
        Sign::Equals,
        Sign::ExactEquals,
        Sign::NotEquals,
        Sign::NotExactEquals,
        Sign::Contains,
        Sign::NotContains,
        Sign::GreaterThan,
        Sign::GreaterOrEqual,
        Sign::LowerThan,
        Sign::LowerOrEqual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Sign::Equals => "equals",
            Sign::ExactEquals => "exactEquals",
            Sign::NotEquals => "notEquals",
            Sign::NotExactEquals => "notExactEquals",
            Sign::Contains => "contains",
            Sign::NotContains => "notContains",
            Sign::GreaterThan => "greaterThan",
            Sign::GreaterOrEqual => "greaterOrEqual",
            Sign::LowerThan => "lowerThan",
            Sign::LowerOrEqual => "lowerOrEqual",
        }
    }
}

impl FromStr for Sign {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sign::ALL
            .into_iter()
            .find(|sign| sign.as_str() == s)
            .ok_or_else(|| ApiError::InvalidFilter(format!("unsupported sign `{s}`")))
    }
}

/// A primitive compared against an attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    String(String),
    Number(Number),
    Bool(bool),
}

impl FilterValue {
    /// Read a value back from its query-string text. Literals that print
    /// back identically as a number or a boolean come back typed, so the
    /// query-string round trip is exact for every value except a string
    /// spelling such a literal: `"2010"` returns as the number 2010 and
    /// `"true"` as a boolean. The JSON body form keeps the type.
    fn infer(raw: &str) -> FilterValue {
        match raw {
            "true" => return FilterValue::Bool(true),
            "false" => return FilterValue::Bool(false),
            _ => {}
        }
        if let Ok(number) = raw.parse::<Number>() {
            if number.to_string() == raw {
                return FilterValue::Number(number);
            }
        }
        FilterValue::String(raw.to_string())
    }

    fn to_json(&self) -> Value {
        match self {
            FilterValue::String(s) => Value::String(s.clone()),
            FilterValue::Number(n) => Value::Number(n.clone()),
            FilterValue::Bool(b) => Value::Bool(*b),
        }
    }

    fn from_json(value: &Value) -> Result<FilterValue, String> {
        match value {
            Value::String(s) => Ok(FilterValue::String(s.clone())),
            Value::Number(n) => Ok(FilterValue::Number(n.clone())),
            Value::Bool(b) => Ok(FilterValue::Bool(*b)),
            other => Err(format!("values must be strings, numbers or booleans, got `{other}`")),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::String(s) => f.write_str(s),
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::String(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value.into())
    }
}

impl From<u64> for FilterValue {
    fn from(value: u64) -> Self {
        FilterValue::Number(value.into())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

/// One `attribute sign values` condition.
///
/// Field order matters: it is the order the fields appear on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterExpression {
    pub attribute: String,
    pub operator: Operator,
    pub sign: Sign,
    pub values: Vec<FilterValue>,
}

impl FilterExpression {
    pub fn new(attribute: impl Into<String>, operator: Operator, sign: Sign) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            sign,
            values: Vec::new(),
        }
    }

    /// `attribute equals any of values`.
    pub fn equals<V: Into<FilterValue>>(attribute: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::new(attribute, Operator::Or, Sign::Equals).with_values(values)
    }

    pub fn with_value(mut self, value: impl Into<FilterValue>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn with_values<V: Into<FilterValue>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.values.extend(values.into_iter().map(Into::into));
        self
    }

    fn from_json(value: &Value) -> Result<FilterExpression, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("condition must be an object, got `{value}`"))?;

        if let Some(field) = object
            .keys()
            .find(|key| !matches!(key.as_str(), "attribute" | "operator" | "sign" | "values" | "value"))
        {
            return Err(format!("unknown condition field `{field}`"));
        }

        let attribute = match object.get("attribute") {
            Some(Value::String(attribute)) if !attribute.is_empty() => attribute.clone(),
            Some(Value::String(_)) | None | Some(Value::Null) => return Err("missing attribute".to_string()),
            Some(other) => return Err(format!("attribute must be a string, got `{other}`")),
        };

        let operator = match object.get("operator") {
            None | Some(Value::Null) => Operator::Or,
            Some(Value::String(s)) => s.parse().map_err(|e: ApiError| filter_message(e))?,
            Some(other) => return Err(format!("operator must be a string, got `{other}`")),
        };

        let sign = match object.get("sign") {
            None | Some(Value::Null) => Sign::Equals,
            Some(Value::String(s)) => s.parse().map_err(|e: ApiError| filter_message(e))?,
            Some(other) => return Err(format!("sign must be a string, got `{other}`")),
        };

        let values = match (object.get("values"), object.get("value")) {
            (Some(_), Some(_)) => return Err("use either `values` or `value`, not both".to_string()),
            (Some(Value::Array(items)), None) | (None, Some(Value::Array(items))) => items
                .iter()
                .map(FilterValue::from_json)
                .collect::<Result<Vec<_>, _>>()?,
            (None, Some(single)) => vec![FilterValue::from_json(single)?],
            (Some(other), None) => return Err(format!("values must be an array, got `{other}`")),
            (None, None) => Vec::new(),
        };
        if values.is_empty() {
            return Err(format!("condition on `{attribute}` has no values"));
        }

        Ok(FilterExpression {
            attribute,
            operator,
            sign,
            values,
        })
    }
}

fn filter_message(err: ApiError) -> String {
    match err {
        ApiError::InvalidFilter(message) => message,
        other => other.to_string(),
    }
}

/// Which shape the owning operation sends filters in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterEncoding {
    QueryString,
    JsonBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFilter {
    Query(Vec<(String, String)>),
    Body(Value),
}

/// An ordered sequence of conditions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FilterGroup {
    expressions: Vec<FilterExpression>,
}

impl FilterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, expression: FilterExpression) -> Self {
        self.expressions.push(expression);
        self
    }

    pub fn push(&mut self, expression: FilterExpression) {
        self.expressions.push(expression);
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn expressions(&self) -> &[FilterExpression] {
        &self.expressions
    }

    /// Encode under `key`. `None` means the key must be omitted entirely.
    pub fn encode(&self, key: &str, encoding: FilterEncoding) -> Option<EncodedFilter> {
        if self.is_empty() {
            return None;
        }
        Some(match encoding {
            FilterEncoding::QueryString => EncodedFilter::Query(self.to_query_pairs(key)),
            FilterEncoding::JsonBody => EncodedFilter::Body(self.to_json()),
        })
    }

    pub fn to_query_pairs(&self, key: &str) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        flatten_query(key, &self.to_json(), &mut pairs);
        pairs
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.expressions
                .iter()
                .map(|expression| {
                    let mut object = Map::new();
                    object.insert("attribute".to_string(), Value::String(expression.attribute.clone()));
                    object.insert("operator".to_string(), Value::String(expression.operator.as_str().to_string()));
                    object.insert("sign".to_string(), Value::String(expression.sign.as_str().to_string()));
                    object.insert(
                        "values".to_string(),
                        Value::Array(expression.values.iter().map(FilterValue::to_json).collect()),
                    );
                    Value::Object(object)
                })
                .collect(),
        )
    }

    /// Validate untyped caller input. Accepts an array of conditions or a
    /// single bare condition, which is wrapped into a group of one.
    pub fn from_value(value: &Value) -> Result<FilterGroup, ApiError> {
        let expressions = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    FilterExpression::from_json(item)
                        .map_err(|message| ApiError::InvalidFilter(format!("condition {index}: {message}")))
                })
                .collect::<Result<_, _>>()?,
            Value::Object(_) => vec![FilterExpression::from_json(value).map_err(ApiError::InvalidFilter)?],
            other => {
                return Err(ApiError::InvalidFilter(format!(
                    "expected a list of conditions, got `{other}`"
                )))
            }
        };
        Ok(FilterGroup { expressions })
    }

    /// Parse the query-string form produced by `to_query_pairs`. Pairs
    /// with other keys are ignored.
    pub fn from_query_pairs<I, K, V>(key: &str, pairs: I) -> Result<FilterGroup, ApiError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        #[derive(Default)]
        struct Slot {
            attribute: Option<String>,
            operator: Option<String>,
            sign: Option<String>,
            values: BTreeMap<usize, String>,
        }

        let malformed = |name: &str| ApiError::InvalidFilter(format!("malformed filter key `{name}`"));
        let index = |raw: &str, name: &str| raw.parse::<usize>().map_err(|_| malformed(name));

        let mut slots: BTreeMap<usize, Slot> = BTreeMap::new();
        for (name, value) in pairs {
            let (name, value) = (name.as_ref(), value.as_ref());
            let Some(rest) = name.strip_prefix(key) else { continue };
            let Some(segments) = rest
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .map(|inner| inner.split("][").collect::<Vec<_>>())
            else {
                continue;
            };

            match segments.as_slice() {
                [position, field] => {
                    let slot = slots.entry(index(position, name)?).or_default();
                    let target = match *field {
                        "attribute" => &mut slot.attribute,
                        "operator" => &mut slot.operator,
                        "sign" => &mut slot.sign,
                        _ => return Err(malformed(name)),
                    };
                    *target = Some(value.to_string());
                }
                [position, "values", value_position] => {
                    let value_position = index(value_position, name)?;
                    slots
                        .entry(index(position, name)?)
                        .or_default()
                        .values
                        .insert(value_position, value.to_string());
                }
                _ => return Err(malformed(name)),
            }
        }

        let expressions = slots
            .into_iter()
            .map(|(position, slot)| -> Result<FilterExpression, ApiError> {
                let attribute = slot
                    .attribute
                    .filter(|attribute| !attribute.is_empty())
                    .ok_or_else(|| ApiError::InvalidFilter(format!("condition {position}: missing attribute")))?;
                if slot.values.is_empty() {
                    return Err(ApiError::InvalidFilter(format!(
                        "condition {position}: condition on `{attribute}` has no values"
                    )));
                }
                Ok(FilterExpression {
                    attribute,
                    operator: slot.operator.as_deref().unwrap_or("or").parse()?,
                    sign: slot.sign.as_deref().unwrap_or("equals").parse()?,
                    values: slot.values.values().map(|raw| FilterValue::infer(raw)).collect(),
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(FilterGroup { expressions })
    }

    /// Parse a raw (percent-encoded) query string.
    pub fn from_query_string(key: &str, query: &str) -> Result<FilterGroup, ApiError> {
        FilterGroup::from_query_pairs(key, url::form_urlencoded::parse(query.as_bytes()))
    }
}

impl From<FilterExpression> for FilterGroup {
    fn from(expression: FilterExpression) -> Self {
        FilterGroup {
            expressions: vec![expression],
        }
    }
}

impl From<Vec<FilterExpression>> for FilterGroup {
    fn from(expressions: Vec<FilterExpression>) -> Self {
        FilterGroup { expressions }
    }
}

impl FromIterator<FilterExpression> for FilterGroup {
    fn from_iter<I: IntoIterator<Item = FilterExpression>>(iter: I) -> Self {
        FilterGroup {
            expressions: iter.into_iter().collect(),
        }
    }
}

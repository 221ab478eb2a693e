//! Filter conditions as the mock API reads them.
//!
//! GET requests carry `query[i][field]` pairs; POST requests carry the same
//! conditions as a JSON array. Expressions are combined with AND; within
//! one expression `operator` combines its values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default = "default_sign")]
    pub sign: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

fn default_operator() -> String {
    "or".to_string()
}

fn default_sign() -> String {
    "equals".to_string()
}

const SIGNS: [&str; 10] = [
    "equals",
    "exactEquals",
    "notEquals",
    "notExactEquals",
    "contains",
    "notContains",
    "greaterThan",
    "greaterOrEqual",
    "lowerThan",
    "lowerOrEqual",
];

impl Condition {
    pub fn validate(&self) -> Result<(), String> {
        if self.attribute.is_empty() {
            return Err("condition is missing an attribute".to_string());
        }
        if !matches!(self.operator.as_str(), "and" | "or") {
            return Err(format!("unsupported operator `{}`", self.operator));
        }
        if !SIGNS.contains(&self.sign.as_str()) {
            return Err(format!("unsupported sign `{}`", self.sign));
        }
        if self.values.is_empty() {
            return Err(format!("condition on `{}` has no values", self.attribute));
        }
        Ok(())
    }

    pub fn matches(&self, record: &Value) -> bool {
        let field = lookup(record, &self.attribute);
        let mut results = self.values.iter().map(|value| self.matches_value(field, value));
        match self.operator.as_str() {
            "and" => results.all(|hit| hit),
            _ => results.any(|hit| hit),
        }
    }

    fn matches_value(&self, field: Option<&Value>, wanted: &Value) -> bool {
        let wanted = text(wanted);
        let candidates: Vec<String> = match field {
            Some(Value::Array(items)) => items.iter().map(text).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![text(other)],
        };
        let lower = wanted.to_lowercase();
        match self.sign.as_str() {
            "equals" => candidates.iter().any(|c| c.to_lowercase() == lower),
            "exactEquals" => candidates.iter().any(|c| *c == wanted),
            "notEquals" => candidates.iter().all(|c| c.to_lowercase() != lower),
            "notExactEquals" => candidates.iter().all(|c| *c != wanted),
            "contains" => candidates.iter().any(|c| c.to_lowercase().contains(&lower)),
            "notContains" => candidates.iter().all(|c| !c.to_lowercase().contains(&lower)),
            sign => {
                let Ok(bound) = wanted.parse::<f64>() else { return false };
                candidates.iter().filter_map(|c| c.parse::<f64>().ok()).any(|n| match sign {
                    "greaterThan" => n > bound,
                    "greaterOrEqual" => n >= bound,
                    "lowerThan" => n < bound,
                    "lowerOrEqual" => n <= bound,
                    _ => false,
                })
            }
        }
    }
}

/// Read `key[i][field]` and `key[i][values][j]` pairs back into conditions.
pub fn from_query_pairs(key: &str, pairs: &[(String, String)]) -> Result<Vec<Condition>, String> {
    let prefix = format!("{key}[");
    let mut slots: BTreeMap<usize, BTreeMap<String, Vec<(usize, String)>>> = BTreeMap::new();
    for (name, value) in pairs {
        let Some(rest) = name.strip_prefix(&prefix) else { continue };
        let parts: Vec<&str> = rest.trim_end_matches(']').split("][").collect();
        let (index, field, position) = match parts.as_slice() {
            [index, field] => (*index, *field, 0),
            [index, field, position] => (*index, *field, position.parse::<usize>().map_err(|_| format!("bad key `{name}`"))?),
            _ => return Err(format!("bad key `{name}`")),
        };
        let index: usize = index.parse().map_err(|_| format!("bad key `{name}`"))?;
        slots
            .entry(index)
            .or_default()
            .entry(field.to_string())
            .or_default()
            .push((position, value.clone()));
    }

    slots
        .into_values()
        .map(|mut fields| -> Result<Condition, String> {
            let mut single = |name: &str| fields.remove(name).and_then(|mut v| v.pop()).map(|(_, v)| v);
            let attribute = single("attribute").unwrap_or_default();
            let operator = single("operator").unwrap_or_else(default_operator);
            let sign = single("sign").unwrap_or_else(default_sign);
            let mut values = fields.remove("values").unwrap_or_default();
            values.sort_by_key(|(position, _)| *position);
            let condition = Condition {
                attribute,
                operator,
                sign,
                values: values.into_iter().map(|(_, v)| Value::String(v)).collect(),
            };
            condition.validate()?;
            Ok(condition)
        })
        .collect()
}

/// Dotted path lookup.
fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |current, part| current.get(part))
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

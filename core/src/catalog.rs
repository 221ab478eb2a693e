//! Operation catalog: operation id → method, path template and parameters.
//!
//! # Design
//! The catalog is a data artifact (`catalog/operations.json`) regenerated
//! from the remote API schema by an external process. It is embedded at
//! compile time, parsed once on first use and then only read. Custom
//! artifacts can be loaded with `Catalog::from_json` and go through the
//! same validation.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;

use crate::error::ApiError;
use crate::http::HttpMethod;

const EMBEDDED_CATALOG: &str = include_str!("../catalog/operations.json");

/// Where a parameter travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
}

/// Declared semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// A filter group, encoded by `crate::filter`.
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParamLocation,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type")]
    pub kind: ParamKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
}

/// One remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    pub id: String,
    pub method: HttpMethod,
    pub path: Vec<PathSegment>,
    pub params: Vec<ParamSpec>,
    /// Prefix the path with the configured API version segment.
    pub versioned: bool,
    /// Key of the item array in paginated responses (`companies`, `lists`, ...).
    pub resource: Option<String>,
    /// Sibling operation serving the same request over the other verb.
    pub alternate: Option<String>,
}

impl OperationSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn path_params(&self) -> impl Iterator<Item = &str> {
        self.path.iter().filter_map(|segment| match segment {
            PathSegment::Param(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }

    /// The path template in `{placeholder}` form, for logs and messages.
    pub fn path_template(&self) -> String {
        if self.path.is_empty() {
            return "/".to_string();
        }
        self.path
            .iter()
            .map(|segment| match segment {
                PathSegment::Literal(literal) => format!("/{literal}"),
                PathSegment::Param(name) => format!("/{{{name}}}"),
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCatalog {
    version: String,
    operations: Vec<RawOperation>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOperation {
    id: String,
    method: HttpMethod,
    path: String,
    #[serde(default = "default_versioned")]
    versioned: bool,
    #[serde(default)]
    resource: Option<String>,
    #[serde(default)]
    alternate: Option<String>,
    #[serde(default)]
    params: Vec<ParamSpec>,
}

fn default_versioned() -> bool {
    true
}

/// Read-only set of operations, keyed by id.
#[derive(Debug)]
pub struct Catalog {
    version: String,
    operations: Vec<OperationSpec>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// The catalog compiled into this crate, shared process-wide.
    pub fn embedded() -> Result<Arc<Catalog>, ApiError> {
        static CATALOG: OnceLock<Result<Arc<Catalog>, String>> = OnceLock::new();
        CATALOG
            .get_or_init(|| {
                Catalog::from_json(EMBEDDED_CATALOG)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(ApiError::Config)
    }

    /// Parse and validate a catalog artifact.
    pub fn from_json(raw: &str) -> Result<Catalog, ApiError> {
        let raw: RawCatalog = serde_json::from_str(raw)
            .map_err(|e| ApiError::Config(format!("malformed operation catalog: {e}")))?;

        let mut operations = Vec::with_capacity(raw.operations.len());
        let mut index = HashMap::with_capacity(raw.operations.len());
        for op in raw.operations {
            let spec = validate(op)?;
            if index.insert(spec.id.clone(), operations.len()).is_some() {
                return Err(ApiError::Config(format!("duplicate operation id `{}`", spec.id)));
            }
            operations.push(spec);
        }

        for spec in &operations {
            if let Some(alternate) = &spec.alternate {
                if !index.contains_key(alternate) {
                    return Err(ApiError::Config(format!(
                        "operation `{}` names unknown alternate `{alternate}`",
                        spec.id
                    )));
                }
            }
        }

        Ok(Catalog {
            version: raw.version,
            operations,
            index,
        })
    }

    /// Resolve an operation by its generated id (`searchCompanies`) or the
    /// snake_case spelling of it (`search_companies`).
    pub fn lookup(&self, id: &str) -> Result<&OperationSpec, ApiError> {
        self.index
            .get(id)
            .or_else(|| self.index.get(&snake_to_camel(id)))
            .map(|&position| &self.operations[position])
            .ok_or_else(|| ApiError::UnknownOperation(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_ok()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Operations in artifact order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationSpec> {
        self.operations.iter()
    }
}

fn validate(op: RawOperation) -> Result<OperationSpec, ApiError> {
    let invalid = |message: String| ApiError::Config(format!("operation `{}`: {message}", op.id));

    if op.id.is_empty() {
        return Err(ApiError::Config("operation with empty id".to_string()));
    }
    if !op.path.starts_with('/') {
        return Err(invalid(format!("path `{}` must start with `/`", op.path)));
    }

    let path = parse_template(&op.path).map_err(invalid)?;

    for segment in &path {
        if let PathSegment::Param(name) = segment {
            match op.params.iter().find(|param| &param.name == name) {
                Some(param) if param.location == ParamLocation::Path && param.required => {}
                Some(_) => {
                    return Err(invalid(format!("placeholder `{name}` must be a required path parameter")))
                }
                None => return Err(invalid(format!("placeholder `{name}` is not declared"))),
            }
        }
    }

    let mut seen = Vec::with_capacity(op.params.len());
    for param in &op.params {
        if seen.contains(&param.name.as_str()) {
            return Err(invalid(format!("parameter `{}` declared twice", param.name)));
        }
        seen.push(param.name.as_str());

        let bound = path
            .iter()
            .any(|segment| matches!(segment, PathSegment::Param(name) if name == &param.name));
        if param.location == ParamLocation::Path && !bound {
            return Err(invalid(format!("path parameter `{}` missing from template", param.name)));
        }
    }

    Ok(OperationSpec {
        path,
        id: op.id,
        method: op.method,
        params: op.params,
        versioned: op.versioned,
        resource: op.resource,
        alternate: op.alternate,
    })
}

fn parse_template(template: &str) -> Result<Vec<PathSegment>, String> {
    template
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.strip_prefix('{') {
            Some(rest) => rest
                .strip_suffix('}')
                .filter(|name| !name.is_empty() && !name.contains(['{', '}']))
                .map(|name| PathSegment::Param(name.to_string()))
                .ok_or_else(|| format!("malformed placeholder `{segment}`")),
            None if segment.contains(['{', '}']) => Err(format!("malformed placeholder `{segment}`")),
            None => Ok(PathSegment::Literal(segment.to_string())),
        })
        .collect()
}

fn snake_to_camel(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut upper = false;
    for c in id.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

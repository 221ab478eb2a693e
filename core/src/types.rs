//! Typed parameters and results for the operations with convenience
//! wrappers.
//!
//! # Design
//! Parameter structs serialize to the argument map `call` takes, with the
//! catalog's camelCase names, so a wrapper and the equivalent `call` build
//! the same request. Absent options are skipped, never sent as `null`.
//!
//! Result types name the fields clients commonly read and keep the rest of
//! the object in `extra`; the API adds fields faster than this crate.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::filter::FilterGroup;
use crate::request::Args;
use crate::response::PageMeta;

/// Serialize typed params into the argument map of `operation`.
pub fn to_args<P: Serialize>(operation: &str, params: &P) -> Result<Args, ApiError> {
    match serde_json::to_value(params) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(Value::Null) => Ok(Args::new()),
        Ok(other) => Err(ApiError::InvalidArgument {
            operation: operation.to_string(),
            name: "params".to_string(),
            message: format!("expected an object, got `{other}`"),
        }),
        Err(e) => Err(ApiError::InvalidArgument {
            operation: operation.to_string(),
            name: "params".to_string(),
            message: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Parameters of `searchCompanies` and `searchCompaniesPost`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCompanies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<FilterGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

impl SearchCompanies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: impl Into<FilterGroup>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn simplified(mut self, simplified: bool) -> Self {
        self.simplified = Some(simplified);
        self
    }

    pub fn sort(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.sort_key = Some(key.into());
        self.sort_order = Some(order);
        self
    }
}

/// Parameters of `countCompanies` and `countCompaniesPost`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountCompanies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<FilterGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_fields: Option<Vec<String>>,
}

impl CountCompanies {
    pub fn query(query: impl Into<FilterGroup>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn search(search: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchCompaniesByName {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
}

impl SearchCompaniesByName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchSimilarCompanies {
    pub domains: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
}

impl SearchSimilarCompanies {
    pub fn new<S: Into<String>>(domains: impl IntoIterator<Item = S>) -> Self {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchCompany {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
}

impl FetchCompany {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchCompanyByEmail {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
}

impl FetchCompanyByEmail {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            simplified: None,
        }
    }
}

/// At least one profile URL is expected by the API; none is required here.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchCompanyBySocial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simplified: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AskCompany {
    pub domain: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Value>>,
}

impl AskCompany {
    pub fn new(domain: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            question: question.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchLists {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateList {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub list_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<FilterGroup>,
}

impl CreateList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Only the fields present are changed on the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateList {
    pub list_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<FilterGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestAction {
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<FilterGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<bool>,
}

impl RequestAction {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchActions {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

/// A company record. Only `id` and `domain` are pulled out; everything else
/// (`about`, `locations`, `socials`, ...) stays in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub domain: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Company {
    /// Walk a dotted path such as `about.name`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = match first {
            "domain" => Some(&self.domain).filter(|v| !v.is_null())?,
            _ => self.extra.get(first)?,
        };
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// The bare domain, whether the API sent it as a string or as
    /// `{"domain": "..."}`.
    pub fn domain_name(&self) -> Option<&str> {
        match &self.domain {
            Value::String(domain) => Some(domain),
            Value::Object(inner) => inner.get("domain").and_then(Value::as_str),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompanyPage {
    #[serde(default)]
    pub companies: Vec<Company>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct CompanyCount {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EmailPattern {
    pub pattern: String,
    #[serde(default)]
    pub usage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyList {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub list_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub lists: Vec<CompanyList>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionPage {
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

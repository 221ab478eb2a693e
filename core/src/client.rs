//! The client facade: catalog lookup, request building, transport and
//! response normalization behind one type.
//!
//! # Design
//! `CompaniesClient` holds no mutable state between calls. As with the
//! lower layers, the I/O boundary stays visible: `build` produces the
//! `HttpRequest` for an operation and `parse` classifies a response, so a
//! caller with its own HTTP stack can skip the transport entirely. `call`
//! runs both with the configured `Transport` in between.
//!
//! The typed wrappers serialize their params into the same argument map
//! `call` takes and then go through `call`; they cannot drift from the
//! catalog.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::{Catalog, OperationSpec};
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::request::{Args, RequestBuilder};
use crate::response::{self, ResponseEnvelope};
use crate::transport::{Transport, UreqTransport};
use crate::types::{
    to_args, ActionPage, AskCompany, Company, CompanyCount, CompanyList, CompanyPage, CountCompanies, CreateList,
    EmailPattern, FetchActions, FetchCompany, FetchCompanyByEmail, FetchCompanyBySocial, FetchLists, ListPage,
    RequestAction, SearchCompanies, SearchCompaniesByName, SearchSimilarCompanies, UpdateList, User,
};

/// Longest GET URL `Via::Auto` sends before switching to the POST form.
pub const MAX_GET_URL_LEN: usize = 2048;

/// Which verb to use for an operation that has both a GET and a POST form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Via {
    Get,
    Post,
    /// GET, unless the URL would exceed `MAX_GET_URL_LEN`.
    #[default]
    Auto,
}

/// Client for The Companies API.
///
/// Generic over the transport so tests can record requests instead of
/// sending them; `CompaniesClient::new` uses `UreqTransport`.
#[derive(Debug)]
pub struct CompaniesClient<T: Transport = UreqTransport> {
    catalog: Arc<Catalog>,
    requests: RequestBuilder,
    transport: T,
}

impl CompaniesClient<UreqTransport> {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = UreqTransport::new(&config)?;
        Self::with_transport(config, transport)
    }

    /// Configure from the `TCA_*` environment variables.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::new(ClientConfig::from_env()?)
    }
}

impl<T: Transport> CompaniesClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Result<Self, ApiError> {
        Self::with_catalog(config, Catalog::embedded()?, transport)
    }

    pub fn with_catalog(config: ClientConfig, catalog: Arc<Catalog>, transport: T) -> Result<Self, ApiError> {
        config.validate()?;
        let requests = RequestBuilder::from_config(&config)?;
        debug!(api_url = %config.api_url, operations = catalog.len(), "client configured");
        Ok(Self {
            catalog,
            requests,
            transport,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The request `call(operation, args)` would send, without sending it.
    pub fn build(&self, operation: &str, args: &Args) -> Result<HttpRequest, ApiError> {
        let spec = self.catalog.lookup(operation)?;
        self.requests.build(spec, args)
    }

    /// Classify a response to `operation` obtained outside this client.
    pub fn parse(&self, operation: &str, response: &HttpResponse) -> Result<ResponseEnvelope, ApiError> {
        let spec = self.catalog.lookup(operation)?;
        response::normalize(&spec.id, response)
    }

    /// Invoke any catalog operation by id.
    pub fn call(&self, operation: &str, args: Args) -> Result<ResponseEnvelope, ApiError> {
        let spec = self.catalog.lookup(operation)?;
        let request = self.requests.build(spec, &args)?;
        self.dispatch(spec, &request)
    }

    /// `call`, then deserialize the payload into `R`.
    pub fn call_as<R: DeserializeOwned>(&self, operation: &str, args: Args) -> Result<R, ApiError> {
        self.call(operation, args)?.decode::<R>().map(ResponseEnvelope::into_data)
    }

    /// `call` with the verb chosen by `via` among an operation and its
    /// `alternate`.
    pub fn call_via(&self, operation: &str, args: Args, via: Via) -> Result<ResponseEnvelope, ApiError> {
        let (spec, request) = self.select(operation, &args, via)?;
        self.dispatch(spec, &request)
    }

    /// The request `call_via` would send.
    pub fn build_via(&self, operation: &str, args: &Args, via: Via) -> Result<HttpRequest, ApiError> {
        self.select(operation, args, via).map(|(_, request)| request)
    }

    fn select(&self, operation: &str, args: &Args, via: Via) -> Result<(&OperationSpec, HttpRequest), ApiError> {
        let spec = self.catalog.lookup(operation)?;
        let alternate = match &spec.alternate {
            Some(id) => Some(self.catalog.lookup(id)?),
            None => None,
        };
        let find = |method: HttpMethod| std::iter::once(spec).chain(alternate).find(|form| form.method == method);

        let chosen = match via {
            Via::Get => find(HttpMethod::Get).unwrap_or(spec),
            Via::Post => find(HttpMethod::Post).unwrap_or(spec),
            Via::Auto => {
                let get = find(HttpMethod::Get).unwrap_or(spec);
                let request = self.requests.build(get, args)?;
                match find(HttpMethod::Post) {
                    Some(post) if get.method == HttpMethod::Get && request.url.len() > MAX_GET_URL_LEN => {
                        debug!(from = %get.id, to = %post.id, url_len = request.url.len(), "switching to POST form");
                        post
                    }
                    _ => return Ok((get, request)),
                }
            }
        };
        Ok((chosen, self.requests.build(chosen, args)?))
    }

    fn dispatch(&self, spec: &OperationSpec, request: &HttpRequest) -> Result<ResponseEnvelope, ApiError> {
        let operation = spec.id.as_str();
        debug!(operation, method = %request.method, path = %spec.path_template(), "dispatching");
        let response = self
            .transport
            .execute(request)
            .map_err(|e| e.into_api_error(operation))?;
        let result = response::normalize(operation, &response);
        match &result {
            Ok(envelope) => debug!(operation, status = envelope.status, "completed"),
            Err(err) => debug!(operation, kind = ?err.kind(), status = ?err.status(), "failed"),
        }
        result
    }

    fn call_with<P, R>(&self, operation: &str, params: &P) -> Result<R, ApiError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_as(operation, to_args(operation, params)?)
    }

    pub fn fetch_api_health(&self) -> Result<Value, ApiError> {
        self.call("fetchApiHealth", Args::new()).map(ResponseEnvelope::into_data)
    }

    pub fn search_companies(&self, params: &SearchCompanies) -> Result<CompanyPage, ApiError> {
        self.call_with("searchCompanies", params)
    }

    pub fn search_companies_post(&self, params: &SearchCompanies) -> Result<CompanyPage, ApiError> {
        self.call_with("searchCompaniesPost", params)
    }

    pub fn search_companies_via(&self, params: &SearchCompanies, via: Via) -> Result<CompanyPage, ApiError> {
        let args = to_args("searchCompanies", params)?;
        self.call_via("searchCompanies", args, via)?
            .decode()
            .map(ResponseEnvelope::into_data)
    }

    pub fn count_companies(&self, params: &CountCompanies) -> Result<CompanyCount, ApiError> {
        self.call_with("countCompanies", params)
    }

    pub fn count_companies_post(&self, params: &CountCompanies) -> Result<CompanyCount, ApiError> {
        self.call_with("countCompaniesPost", params)
    }

    pub fn search_companies_by_name(&self, params: &SearchCompaniesByName) -> Result<CompanyPage, ApiError> {
        self.call_with("searchCompaniesByName", params)
    }

    pub fn search_similar_companies(&self, params: &SearchSimilarCompanies) -> Result<CompanyPage, ApiError> {
        self.call_with("searchSimilarCompanies", params)
    }

    pub fn fetch_company(&self, params: &FetchCompany) -> Result<Company, ApiError> {
        self.call_with("fetchCompany", params)
    }

    pub fn fetch_company_by_email(&self, params: &FetchCompanyByEmail) -> Result<Company, ApiError> {
        self.call_with("fetchCompanyByEmail", params)
    }

    pub fn fetch_company_by_social(&self, params: &FetchCompanyBySocial) -> Result<Company, ApiError> {
        self.call_with("fetchCompanyBySocial", params)
    }

    pub fn fetch_company_email_patterns(&self, domain: &str) -> Result<Vec<EmailPattern>, ApiError> {
        let mut args = Args::new();
        args.insert("domain".to_string(), Value::from(domain));
        self.call_as("fetchCompanyEmailPatterns", args)
    }

    pub fn ask_company(&self, params: &AskCompany) -> Result<Value, ApiError> {
        self.call_with("askCompany", params)
    }

    pub fn fetch_lists(&self, params: &FetchLists) -> Result<ListPage, ApiError> {
        self.call_with("fetchLists", params)
    }

    pub fn create_list(&self, params: &CreateList) -> Result<CompanyList, ApiError> {
        self.call_with("createList", params)
    }

    pub fn update_list(&self, params: &UpdateList) -> Result<CompanyList, ApiError> {
        self.call_with("updateList", params)
    }

    pub fn delete_list(&self, list_id: u64) -> Result<(), ApiError> {
        let mut args = Args::new();
        args.insert("listId".to_string(), Value::from(list_id));
        self.call("deleteList", args).map(|_| ())
    }

    /// Estimates and queued actions have different shapes; the payload is
    /// returned as is.
    pub fn request_action(&self, params: &RequestAction) -> Result<Value, ApiError> {
        self.call_with("requestAction", params)
    }

    pub fn fetch_actions(&self, params: &FetchActions) -> Result<ActionPage, ApiError> {
        self.call_with("fetchActions", params)
    }

    pub fn fetch_user(&self) -> Result<User, ApiError> {
        self.call_as("fetchUser", Args::new())
    }
}

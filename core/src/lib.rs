//! Typed, synchronous client for The Companies API.
//!
//! # Overview
//! Every remote endpoint is described by an `OperationSpec` in an
//! embedded catalog. A call is looked up by id, turned into a plain
//! `HttpRequest`, executed by a `Transport` and classified into a
//! `ResponseEnvelope` or an `ApiError`.
//!
//! # Design
//! - Only `Transport` implementations perform I/O. Request building and
//!   response normalization are pure and tested without a server.
//! - `CompaniesClient::call` reaches any catalog operation; typed wrappers
//!   such as `search_companies` are thin adapters over it.
//! - Filters (`FilterGroup`) are encoded as `query[i][field]` pairs for
//!   GET and as a JSON array for POST.
//!
//! ```no_run
//! use companies_core::{CompaniesClient, ClientConfig, FilterExpression, SearchCompanies};
//!
//! let client = CompaniesClient::new(ClientConfig::new("my-token"))?;
//! let page = client.search_companies(
//!     &SearchCompanies::new()
//!         .query(FilterExpression::equals("about.industries", ["saas"]))
//!         .size(10),
//! )?;
//! println!("{} companies", page.companies.len());
//! # Ok::<(), companies_core::ApiError>(())
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod request;
pub mod response;
pub mod transport;
pub mod types;

pub use catalog::{Catalog, OperationSpec, ParamKind, ParamLocation, ParamSpec, PathSegment};
pub use client::{CompaniesClient, Via, MAX_GET_URL_LEN};
pub use config::ClientConfig;
pub use error::{ApiError, ErrorKind};
pub use filter::{EncodedFilter, FilterEncoding, FilterExpression, FilterGroup, FilterValue, Operator, Sign};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use request::{Args, RequestBuilder};
pub use response::{normalize, PageMeta, ResponseEnvelope};
pub use transport::{RetryPolicy, Transport, TransportError, UreqTransport};
pub use types::*;

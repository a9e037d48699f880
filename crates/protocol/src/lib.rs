//! # Genie Protocol
//!
//! Shared vocabulary for talking to a running Genie engine: the readiness line
//! it prints on stdout, the HTTP endpoints it serves, and the JSON bodies those
//! endpoints accept.
//!
//! ```text
//! child stdout ──> "... Server port number at ..., 54321"
//!                                                    │
//!                                                    v
//!                         http://127.0.0.1:54321/{query,queryContext,...}
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phrase that marks the stdout line announcing the engine's bound port.
pub const PORT_SENTINEL: &str = "Server port number at";

/// Port assumed for a shared NLU server when no port-binding file is available.
pub const DEFAULT_NLU_PORT: u16 = 8400;

pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Value of the `response` field on every successful engine call.
pub const SUCCESS_CODE: i64 = 200;

/// Locator of a loopback server without a trailing slash (`--nlu-server` form).
pub fn loopback_locator(port: u16) -> String {
    format!("http://{LOOPBACK_HOST}:{port}")
}

/// Base URL for session calls; endpoint paths are appended directly.
pub fn loopback_base_url(port: u16) -> String {
    format!("http://{LOOPBACK_HOST}:{port}/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Endpoints exposed by the engine under its base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Query,
    QueryContext,
    SetNumResults,
    NeglectFilters,
    NeglectProjections,
    ToggleDirectSentenceState,
    Clean,
    Quit,
}

impl Endpoint {
    pub const fn path(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::QueryContext => "queryContext",
            Self::SetNumResults => "setNumResults",
            Self::NeglectFilters => "neglectFilters",
            Self::NeglectProjections => "neglectProjections",
            Self::ToggleDirectSentenceState => "toggleDirectSentenceState",
            Self::Clean => "clean",
            Self::Quit => "quit",
        }
    }

    pub const fn method(self) -> HttpMethod {
        match self {
            Self::Query => HttpMethod::Get,
            _ => HttpMethod::Post,
        }
    }

    /// Endpoints that change session configuration rather than answer a query.
    pub const fn is_configuration(self) -> bool {
        matches!(
            self,
            Self::SetNumResults
                | Self::NeglectFilters
                | Self::NeglectProjections
                | Self::ToggleDirectSentenceState
        )
    }
}

/// Body of `POST queryContext`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContextRequest {
    pub q: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialog_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetNumResultsRequest {
    pub num_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeglectFiltersRequest {
    pub neglect_filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeglectProjectionsRequest {
    pub neglect_projections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectSentenceStateRequest {
    pub direct_sentence_state: bool,
}

/// Numeric `response` field of an engine reply, if present.
pub fn response_code(body: &Value) -> Option<i64> {
    body.get("response").and_then(Value::as_i64)
}

pub fn is_success(body: &Value) -> bool {
    response_code(body) == Some(SUCCESS_CODE)
}

pub fn serialize_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(Into::into)
}

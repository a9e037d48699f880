use crate::error::{Result, SessionError};
use genie_protocol::{
    is_success, response_code, serialize_json, DirectSentenceStateRequest, Endpoint, HttpMethod,
    NeglectFiltersRequest, NeglectProjectionsRequest, QueryContextRequest, SetNumResultsRequest,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Configuration last acknowledged by the engine. `None` means never pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub num_results: Option<u32>,
    pub neglect_filters: Option<Vec<String>>,
    pub neglect_projections: Option<Vec<String>>,
    pub direct_sentence_state: Option<bool>,
}

/// Per-query settings. Configuration fields left as `None` keep whatever the
/// engine currently has.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Continue from the engine's own dialogue state (`GET query`) instead of
    /// sending context explicitly.
    pub use_existing_state: bool,
    pub dialog_state: Option<String>,
    pub aux: Option<Value>,
    pub num_results: Option<u32>,
    pub neglect_filters: Option<Vec<String>>,
    pub neglect_projections: Option<Vec<String>>,
    pub direct_sentence_state: Option<bool>,
}

/// Client for one engine process.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    base_url: String,
    state: SessionState,
    context_queries: u64,
}

impl Session {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, Client::builder().build()?)
    }

    /// Like [`Session::new`] with every request bounded by `timeout`.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        Self::with_client(base_url, Client::builder().timeout(timeout).build()?)
    }

    pub fn with_client(base_url: &str, client: Client) -> Result<Self> {
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url)?,
            state: SessionState::default(),
            context_queries: 0,
        })
    }

    /// Always ends with `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Push changed configuration, then ask the engine.
    pub async fn query(&mut self, text: &str, options: QueryOptions) -> Result<Value> {
        self.apply_options(&options).await?;

        if options.use_existing_state {
            log::debug!("GET {} q={text:?}", Endpoint::Query.path());
            let response = self
                .client
                .get(self.url(Endpoint::Query))
                .query(&[("q", text)])
                .send()
                .await?;
            return Ok(response.json::<Value>().await?);
        }

        if self.context_queries == 0 && options.dialog_state.is_some() {
            log::debug!("First query of this session carries an explicit dialog state");
        }
        self.context_queries += 1;
        let body = QueryContextRequest {
            q: text.to_string(),
            dialog_state: options.dialog_state,
            aux: options.aux,
        };
        self.post(Endpoint::QueryContext, &body).await
    }

    pub async fn set_num_results(&mut self, num_results: u32) -> Result<Value> {
        let reply = self
            .post(Endpoint::SetNumResults, &SetNumResultsRequest { num_results })
            .await?;
        if is_success(&reply) {
            self.state.num_results = Some(num_results);
        }
        Ok(reply)
    }

    pub async fn set_neglect_filters(&mut self, neglect_filters: Vec<String>) -> Result<Value> {
        let reply = self
            .post(
                Endpoint::NeglectFilters,
                &NeglectFiltersRequest {
                    neglect_filters: neglect_filters.clone(),
                },
            )
            .await?;
        if is_success(&reply) {
            self.state.neglect_filters = Some(neglect_filters);
        }
        Ok(reply)
    }

    pub async fn set_neglect_projections(&mut self, neglect_projections: Vec<String>) -> Result<Value> {
        let reply = self
            .post(
                Endpoint::NeglectProjections,
                &NeglectProjectionsRequest {
                    neglect_projections: neglect_projections.clone(),
                },
            )
            .await?;
        if is_success(&reply) {
            self.state.neglect_projections = Some(neglect_projections);
        }
        Ok(reply)
    }

    pub async fn set_direct_sentence_state(&mut self, direct_sentence_state: bool) -> Result<Value> {
        let reply = self
            .post(
                Endpoint::ToggleDirectSentenceState,
                &DirectSentenceStateRequest {
                    direct_sentence_state,
                },
            )
            .await?;
        if is_success(&reply) {
            self.state.direct_sentence_state = Some(direct_sentence_state);
        }
        Ok(reply)
    }

    /// Reset the engine's dialogue state. Cached configuration is kept.
    pub async fn clean(&mut self) -> Result<Value> {
        self.context_queries = 0;
        self.post_empty(Endpoint::Clean).await
    }

    /// Ask the engine to exit. Later calls on this session fail with a
    /// connection error.
    pub async fn quit(&mut self) -> Result<Value> {
        self.post_empty(Endpoint::Quit).await
    }

    async fn apply_options(&mut self, options: &QueryOptions) -> Result<()> {
        if let Some(n) = options.num_results {
            if self.state.num_results != Some(n) {
                let reply = self.set_num_results(n).await?;
                if !is_success(&reply) {
                    warn_rejected(Endpoint::SetNumResults, &reply);
                }
            }
        }
        if let Some(filters) = &options.neglect_filters {
            if self.state.neglect_filters.as_ref() != Some(filters) {
                let reply = self.set_neglect_filters(filters.clone()).await?;
                if !is_success(&reply) {
                    warn_rejected(Endpoint::NeglectFilters, &reply);
                }
            }
        }
        if let Some(projections) = &options.neglect_projections {
            if self.state.neglect_projections.as_ref() != Some(projections) {
                let reply = self.set_neglect_projections(projections.clone()).await?;
                if !is_success(&reply) {
                    warn_rejected(Endpoint::NeglectProjections, &reply);
                }
            }
        }
        if let Some(direct) = options.direct_sentence_state {
            if self.state.direct_sentence_state != Some(direct) {
                let reply = self.set_direct_sentence_state(direct).await?;
                if !is_success(&reply) {
                    warn_rejected(Endpoint::ToggleDirectSentenceState, &reply);
                }
            }
        }
        Ok(())
    }

    async fn post<B: Serialize + ?Sized>(&self, endpoint: Endpoint, body: &B) -> Result<Value> {
        debug_assert_eq!(endpoint.method(), HttpMethod::Post);
        if log::log_enabled!(log::Level::Debug) {
            let kind = if endpoint.is_configuration() { "config" } else { "query" };
            let body = serialize_json(body).unwrap_or_default();
            log::debug!("POST {} ({kind}) {body}", endpoint.path());
        }
        let response = self
            .client
            .post(self.url(endpoint))
            .json(body)
            .send()
            .await?;
        Ok(response.json::<Value>().await?)
    }

    async fn post_empty(&self, endpoint: Endpoint) -> Result<Value> {
        log::debug!("POST {}", endpoint.path());
        let response = self.client.post(self.url(endpoint)).send().await?;
        Ok(response.json::<Value>().await?)
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

fn warn_rejected(endpoint: Endpoint, reply: &Value) {
    match response_code(reply) {
        Some(code) => log::warn!(
            "{} returned response {code}; keeping previous setting",
            endpoint.path()
        ),
        None => log::warn!("{} returned no response code: {reply}", endpoint.path()),
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| SessionError::InvalidBaseUrl(raw.to_string()))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(SessionError::InvalidBaseUrl(raw.to_string()));
    }
    if trimmed.ends_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/"))
    }
}

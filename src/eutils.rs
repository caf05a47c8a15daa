use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ClientConfig, FetchOptions, SearchOptions};
use crate::domain::{RecordType, SearchResult};
use crate::error::GeoError;
use crate::executor::{HttpTransport, RawResponse, RequestSpec, RetryingExecutor, Transport};
use crate::history::{HistorySession, HistoryTokens, Selection, Selector};
use crate::rate_limit::RateLimiter;
use crate::retry::{Sleeper, ThreadSleeper};

/// Client for the E-utilities search API.
///
/// Owns its rate limiter and history session; two clients never share either.
pub struct EutilsClient<T: Transport = HttpTransport, S: Sleeper = ThreadSleeper> {
    executor: RetryingExecutor<T, S>,
    history: HistorySession,
    base_url: String,
    tool: String,
    email: Option<String>,
    api_key: Option<String>,
}

impl EutilsClient {
    pub fn new(config: &ClientConfig) -> Result<Self, GeoError> {
        let transport = HttpTransport::new(&config.user_agent(), config.timeout)?;
        Ok(Self::with_parts(config, transport, ThreadSleeper))
    }
}

impl<T: Transport, S: Sleeper> EutilsClient<T, S> {
    pub fn with_parts(config: &ClientConfig, transport: T, sleeper: S) -> Self {
        let executor = RetryingExecutor::with_sleeper(
            transport,
            RateLimiter::new(config.min_interval),
            config.retry.clone(),
            sleeper,
        );
        Self {
            executor,
            history: HistorySession::new(),
            base_url: config.eutils_url.clone(),
            tool: config.tool.clone(),
            email: config.email.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn history(&self) -> Option<&HistoryTokens> {
        self.history.current()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn executor(&self) -> &RetryingExecutor<T, S> {
        &self.executor
    }

    pub fn search(
        &mut self,
        db: &str,
        term: &str,
        options: &SearchOptions,
    ) -> Result<SearchResult, GeoError> {
        require("db", db)?;
        require("term", term)?;
        let mut request = self
            .request("esearch.fcgi")
            .param("db", db)
            .param("term", term)
            .param("retmode", "json");
        for (key, value) in options.query_pairs() {
            request = request.param(key, value);
        }
        let response = self.dispatch(request)?;
        let result = parse_search_response(&response.body)?;
        if options.usehistory {
            self.history.record(&result);
        }
        info!(
            db,
            count = result.count,
            returned = result.uids.len(),
            history = result.query_key.is_some(),
            "search complete"
        );
        Ok(result)
    }

    /// Searches `gds` restricted to one record type.
    pub fn search_records(
        &mut self,
        record_type: RecordType,
        term: &str,
        options: &SearchOptions,
    ) -> Result<SearchResult, GeoError> {
        require("term", term)?;
        let term = format!("{term} AND {}[ETYP]", record_type.prefix());
        self.search("gds", &term, options)
    }

    pub fn summary(&mut self, db: &str, selection: &Selection) -> Result<String, GeoError> {
        require("db", db)?;
        let selector = self.history.resolve(selection)?;
        let request = with_selector(self.request("esummary.fcgi").param("db", db), &selector)
            .param("version", "2.0");
        Ok(self.dispatch(request)?.body)
    }

    pub fn fetch(
        &mut self,
        db: &str,
        selection: &Selection,
        options: &FetchOptions,
    ) -> Result<String, GeoError> {
        require("db", db)?;
        let selector = self.history.resolve(selection)?;
        let mut request = with_selector(self.request("efetch.fcgi").param("db", db), &selector);
        for (key, value) in options.query_pairs() {
            request = request.param(key, value);
        }
        Ok(self.dispatch(request)?.body)
    }

    pub fn link(&mut self, dbfrom: &str, db: &str, selection: &Selection) -> Result<String, GeoError> {
        require("dbfrom", dbfrom)?;
        require("db", db)?;
        let selector = self.history.resolve(selection)?;
        let request = with_selector(
            self.request("elink.fcgi")
                .param("dbfrom", dbfrom)
                .param("db", db),
            &selector,
        );
        Ok(self.dispatch(request)?.body)
    }

    fn request(&self, endpoint: &str) -> RequestSpec {
        RequestSpec::new(format!("{}/{}", self.base_url, endpoint))
            .param("tool", self.tool.clone())
            .param_opt("email", self.email.clone())
            .param_opt("api_key", self.api_key.clone())
    }

    fn dispatch(&mut self, request: RequestSpec) -> Result<RawResponse, GeoError> {
        debug!(url = %request.url, params = request.query.len(), "eutils request");
        self.executor.execute(&request)
    }
}

fn with_selector(mut request: RequestSpec, selector: &Selector) -> RequestSpec {
    for (key, value) in selector.query_pairs() {
        request = request.param(key, value);
    }
    request
}

fn require(name: &str, value: &str) -> Result<(), GeoError> {
    if value.trim().is_empty() {
        return Err(GeoError::InvalidRequest(format!("{name} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    esearchresult: Option<SearchPayload>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    retstart: Option<String>,
    #[serde(default)]
    querykey: Option<String>,
    #[serde(default)]
    webenv: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(default)]
    querytranslation: Option<String>,
    #[serde(default, rename = "ERROR")]
    error: Option<String>,
}

/// Decodes a JSON-mode `esearch` reply.
pub fn parse_search_response(body: &str) -> Result<SearchResult, GeoError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)
        .map_err(|err| GeoError::MalformedResponse(format!("esearch: {err}")))?;
    if let Some(message) = envelope.error {
        return Err(GeoError::Rejected {
            status: 200,
            message,
        });
    }
    let payload = envelope
        .esearchresult
        .ok_or_else(|| GeoError::MalformedResponse("esearch: missing esearchresult".to_string()))?;
    if let Some(message) = payload.error {
        return Err(GeoError::Rejected {
            status: 200,
            message,
        });
    }

    let query_key = payload.querykey.filter(|value| !value.is_empty());
    let web_env = payload.webenv.filter(|value| !value.is_empty());
    if query_key.is_some() != web_env.is_some() {
        return Err(GeoError::MalformedResponse(
            "esearch: querykey and webenv must appear together".to_string(),
        ));
    }

    Ok(SearchResult {
        uids: payload.idlist,
        count: parse_count("count", payload.count)?,
        retstart: parse_count("retstart", payload.retstart)?,
        query_key,
        web_env,
        translation: payload.querytranslation,
    })
}

fn parse_count(field: &str, value: Option<String>) -> Result<u64, GeoError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| GeoError::MalformedResponse(format!("esearch: bad {field}: {value}"))),
        None => Ok(0),
    }
}

use serde::Serialize;

use crate::domain::SearchResult;
use crate::error::GeoError;

/// Server-side query handle issued by `esearch` with `usehistory=y`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryTokens {
    pub query_key: String,
    pub web_env: String,
}

/// What the caller passed to a summary/fetch/link call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub uids: Vec<String>,
    pub query_key: Option<String>,
    pub web_env: Option<String>,
}

impl Selection {
    pub fn uids<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            uids: uids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn history(query_key: impl Into<String>, web_env: impl Into<String>) -> Self {
        Self {
            uids: Vec::new(),
            query_key: Some(query_key.into()),
            web_env: Some(web_env.into()),
        }
    }

    /// Falls back to the last search of the session.
    pub fn session() -> Self {
        Self::default()
    }
}

/// The records a follow-up call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Ids(Vec<String>),
    History(HistoryTokens),
}

impl Selector {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Selector::Ids(uids) => vec![("id", uids.join(","))],
            Selector::History(tokens) => vec![
                ("query_key", tokens.query_key.clone()),
                ("WebEnv", tokens.web_env.clone()),
            ],
        }
    }
}

/// Most recent history pair of one client instance.
#[derive(Debug, Clone, Default)]
pub struct HistorySession {
    current: Option<HistoryTokens>,
}

impl HistorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&HistoryTokens> {
        self.current.as_ref()
    }

    /// Keeps the pair from `result` if the server issued one, even when the
    /// search matched nothing.
    pub fn record(&mut self, result: &SearchResult) {
        if let (Some(query_key), Some(web_env)) = (&result.query_key, &result.web_env) {
            self.current = Some(HistoryTokens {
                query_key: query_key.clone(),
                web_env: web_env.clone(),
            });
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Explicit UIDs, then explicit tokens, then the session, else an error.
    pub fn resolve(&self, selection: &Selection) -> Result<Selector, GeoError> {
        let uids: Vec<String> = selection
            .uids
            .iter()
            .map(|uid| uid.trim())
            .filter(|uid| !uid.is_empty())
            .map(str::to_string)
            .collect();
        if !uids.is_empty() {
            return Ok(Selector::Ids(uids));
        }
        match (&selection.query_key, &selection.web_env) {
            (Some(query_key), Some(web_env)) => {
                return Ok(Selector::History(HistoryTokens {
                    query_key: query_key.clone(),
                    web_env: web_env.clone(),
                }));
            }
            (Some(_), None) | (None, Some(_)) => return Err(GeoError::PartialHistoryTokens),
            (None, None) => {}
        }
        self.current
            .clone()
            .map(Selector::History)
            .ok_or(GeoError::MissingSelector)
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::GeoError;
use crate::retry::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = "geodataset.json";
pub const DEFAULT_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_FILE_SERVER_URL: &str = "https://ftp.ncbi.nlm.nih.gov";
pub const DEFAULT_GEO_ROOT: &str = "/geo";
const DEFAULT_TOOL: &str = "geodataset";
const INTERVAL_WITHOUT_KEY: Duration = Duration::from_millis(100);
const INTERVAL_WITH_KEY: Duration = Duration::from_millis(50);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// On-disk shape of `geodataset.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub min_interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub eutils_url: Option<String>,
    #[serde(default)]
    pub file_server_url: Option<String>,
    #[serde(default)]
    pub geo_root: Option<String>,
}

/// Values taken from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub email: Option<String>,
    pub api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            email: read("NCBI_EMAIL"),
            api_key: read("NCBI_API_KEY"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub tool: String,
    pub min_interval: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub eutils_url: String,
    pub file_server_url: String,
    pub geo_root: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            email: None,
            api_key: None,
            tool: DEFAULT_TOOL.to_string(),
            min_interval: INTERVAL_WITHOUT_KEY,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            eutils_url: DEFAULT_EUTILS_URL.to_string(),
            file_server_url: DEFAULT_FILE_SERVER_URL.to_string(),
            geo_root: DEFAULT_GEO_ROOT.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} (email: {})",
            DEFAULT_TOOL,
            env!("CARGO_PKG_VERSION"),
            self.email.as_deref().unwrap_or("not_provided")
        )
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./geodataset.json`, then the user config
    /// directory, then built-in defaults; environment applied on top.
    pub fn resolve(path: Option<&str>) -> Result<ClientConfig, GeoError> {
        let file = match path {
            Some(path) => Self::read_file(Path::new(path))?,
            None => match Self::discover() {
                Some(found) => Self::read_file(&found)?,
                None => ConfigFile::default(),
            },
        };
        Self::resolve_config(file, EnvOverrides::from_env())
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("geodataset").join("config.json"))
            .filter(|path| path.exists())
    }

    fn read_file(path: &Path) -> Result<ConfigFile, GeoError> {
        let content =
            fs::read_to_string(path).map_err(|_| GeoError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| GeoError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(file: ConfigFile, env: EnvOverrides) -> Result<ClientConfig, GeoError> {
        let defaults = ClientConfig::default();
        let email = non_empty("email", env.email.or(file.email))?;
        let api_key = non_empty("api_key", env.api_key.or(file.api_key))?;
        let tool = non_empty("tool", file.tool)?.unwrap_or(defaults.tool);

        let min_interval = match file.min_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None if api_key.is_some() => INTERVAL_WITH_KEY,
            None => INTERVAL_WITHOUT_KEY,
        };
        let retry = RetryPolicy {
            max_retries: file.max_retries.unwrap_or(defaults.retry.max_retries),
            base_delay: file
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
            max_delay: file
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_delay),
        };

        Ok(ClientConfig {
            email,
            api_key,
            tool,
            min_interval,
            timeout: file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            retry,
            eutils_url: trim_slash(file.eutils_url.unwrap_or(defaults.eutils_url)),
            file_server_url: trim_slash(file.file_server_url.unwrap_or(defaults.file_server_url)),
            geo_root: trim_slash(file.geo_root.unwrap_or(defaults.geo_root)),
        })
    }
}

fn non_empty(field: &str, value: Option<String>) -> Result<Option<String>, GeoError> {
    match value {
        Some(value) if value.trim().is_empty() => {
            Err(GeoError::InvalidCredential(format!("{field} must not be empty")))
        }
        Some(value) => Ok(Some(value.trim().to_string())),
        None => Ok(None),
    }
}

fn trim_slash(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

/// Recognized `esearch` options.
///
/// Defaults: `retmax = 1000`, `retstart = 0`, `usehistory = true`, everything
/// else unset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct SearchOptions {
    pub retmax: u32,
    pub retstart: u32,
    pub usehistory: bool,
    /// `uilist` or `count`.
    pub rettype: Option<String>,
    pub sort: Option<String>,
    /// Restricts the whole term to one search field.
    pub field: Option<String>,
    pub datetype: Option<String>,
    pub reldate: Option<u32>,
    pub mindate: Option<String>,
    pub maxdate: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            retmax: 1000,
            retstart: 0,
            usehistory: true,
            rettype: None,
            sort: None,
            field: None,
            datetype: None,
            reldate: None,
            mindate: None,
            maxdate: None,
        }
    }
}

impl SearchOptions {
    /// Builds options from `key=value` style pairs, rejecting unknown keys.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, GeoError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "retmax" => options.retmax = parse_number(key, value)?,
                "retstart" => options.retstart = parse_number(key, value)?,
                "usehistory" => options.usehistory = parse_flag(key, value)?,
                "rettype" => options.rettype = Some(value.to_string()),
                "sort" => options.sort = Some(value.to_string()),
                "field" => options.field = Some(value.to_string()),
                "datetype" => options.datetype = Some(value.to_string()),
                "reldate" => options.reldate = Some(parse_number(key, value)?),
                "mindate" => options.mindate = Some(value.to_string()),
                "maxdate" => options.maxdate = Some(value.to_string()),
                other => return Err(GeoError::UnknownOption(other.to_string())),
            }
        }
        Ok(options)
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("retmax", self.retmax.to_string()),
            ("retstart", self.retstart.to_string()),
            ("usehistory", if self.usehistory { "y" } else { "n" }.to_string()),
        ];
        let optional = [
            ("rettype", self.rettype.clone()),
            ("sort", self.sort.clone()),
            ("field", self.field.clone()),
            ("datetype", self.datetype.clone()),
            ("reldate", self.reldate.map(|days| days.to_string())),
            ("mindate", self.mindate.clone()),
            ("maxdate", self.maxdate.clone()),
        ];
        pairs.extend(
            optional
                .into_iter()
                .filter_map(|(key, value)| value.map(|value| (key, value))),
        );
        pairs
    }
}

/// Recognized `efetch` options. `retmode` defaults to `text`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct FetchOptions {
    pub rettype: Option<String>,
    pub retmode: String,
    pub retstart: Option<u32>,
    pub retmax: Option<u32>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            rettype: None,
            retmode: "text".to_string(),
            retstart: None,
            retmax: None,
        }
    }
}

impl FetchOptions {
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, GeoError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "rettype" => options.rettype = Some(value.to_string()),
                "retmode" => options.retmode = value.to_string(),
                "retstart" => options.retstart = Some(parse_number(key, value)?),
                "retmax" => options.retmax = Some(parse_number(key, value)?),
                other => return Err(GeoError::UnknownOption(other.to_string())),
            }
        }
        Ok(options)
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("retmode", self.retmode.clone())];
        if let Some(rettype) = &self.rettype {
            pairs.push(("rettype", rettype.clone()));
        }
        if let Some(retstart) = self.retstart {
            pairs.push(("retstart", retstart.to_string()));
        }
        if let Some(retmax) = self.retmax {
            pairs.push(("retmax", retmax.to_string()));
        }
        pairs
    }
}

/// Splits a `key=value` command-line option.
pub fn split_option(raw: &str) -> Result<(String, String), GeoError> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| GeoError::InvalidOption {
            key: raw.to_string(),
            value: String::new(),
        })
}

fn parse_number(key: &str, value: &str) -> Result<u32, GeoError> {
    value.parse().map_err(|_| GeoError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, GeoError> {
    match value.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "1" => Ok(true),
        "n" | "no" | "false" | "0" => Ok(false),
        _ => Err(GeoError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

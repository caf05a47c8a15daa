use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GeoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Series,
    Dataset,
    Sample,
    Platform,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::Series,
        RecordType::Dataset,
        RecordType::Sample,
        RecordType::Platform,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            RecordType::Series => "GSE",
            RecordType::Dataset => "GDS",
            RecordType::Sample => "GSM",
            RecordType::Platform => "GPL",
        }
    }

    /// Top-level directory under the GEO root.
    pub fn root_dir(self) -> &'static str {
        match self {
            RecordType::Series => "series",
            RecordType::Dataset => "datasets",
            RecordType::Sample => "samples",
            RecordType::Platform => "platforms",
        }
    }

    /// Category holding the ancillary files for a record; datasets only
    /// publish SOFT files.
    pub fn supplementary_category(self) -> FileCategory {
        match self {
            RecordType::Dataset => FileCategory::Soft,
            RecordType::Series | RecordType::Sample | RecordType::Platform => FileCategory::Suppl,
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.prefix().eq_ignore_ascii_case(prefix))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Series => write!(f, "series"),
            RecordType::Dataset => write!(f, "dataset"),
            RecordType::Sample => write!(f, "sample"),
            RecordType::Platform => write!(f, "platform"),
        }
    }
}

/// A validated GEO accession such as `GSE12345`. Only built through parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Accession {
    record_type: RecordType,
    digits: String,
}

impl Accession {
    /// Parses `value` and requires it to belong to `record_type`.
    pub fn parse_as(record_type: RecordType, value: &str) -> Result<Self, GeoError> {
        let invalid = || GeoError::InvalidAccession {
            expected: record_type.prefix(),
            value: value.to_string(),
        };
        let normalized = value.trim().to_ascii_uppercase();
        let digits = normalized
            .strip_prefix(record_type.prefix())
            .ok_or_else(invalid)?;
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(invalid());
        }
        Ok(Self {
            record_type,
            digits: digits.to_string(),
        })
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn digits(&self) -> &str {
        &self.digits
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.record_type.prefix(), self.digits)
    }
}

impl FromStr for Accession {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let record_type = trimmed
            .get(..3)
            .and_then(RecordType::from_prefix)
            .ok_or_else(|| GeoError::InvalidAccession {
                expected: "GSE/GDS/GSM/GPL",
                value: value.to_string(),
            })?;
        Self::parse_as(record_type, trimmed)
    }
}

/// Outcome of an `esearch` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub uids: Vec<String>,
    pub count: u64,
    pub retstart: u64,
    pub query_key: Option<String>,
    pub web_env: Option<String>,
    pub translation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Soft,
    Miniml,
    Matrix,
    Suppl,
}

impl FileCategory {
    pub fn subdir(self) -> &'static str {
        match self {
            FileCategory::Soft => "soft",
            FileCategory::Miniml => "miniml",
            FileCategory::Matrix => "matrix",
            FileCategory::Suppl => "suppl",
        }
    }

    pub fn matches(self, file_name: &str, accession: &Accession) -> bool {
        let name = file_name.to_ascii_lowercase();
        let acc = accession.to_string().to_ascii_lowercase();
        match self {
            FileCategory::Soft => name.ends_with(".soft.gz") && name.contains(&acc),
            FileCategory::Miniml => name.ends_with(".xml.tgz") && name.contains(&acc),
            FileCategory::Matrix => {
                name.ends_with("_series_matrix.txt.gz") && name.contains(&acc)
            }
            FileCategory::Suppl => [".tar", ".gz", ".txt", ".tgz", ".zip"]
                .iter()
                .any(|ext| name.ends_with(ext)),
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subdir())
    }
}

pub fn default_series_categories() -> Vec<FileCategory> {
    vec![
        FileCategory::Soft,
        FileCategory::Miniml,
        FileCategory::Matrix,
        FileCategory::Suppl,
    ]
}

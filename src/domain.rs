use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::MgError;

/// A MG-RAST metagenome identifier (`mgm` form). KBase aliases of the shape
/// `kb|mg.N` are normalized to `mgm` form on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetagenomeId(String);

impl MetagenomeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetagenomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MetagenomeId {
    type Err = MgError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(MgError::InvalidMetagenomeId(value.to_string()));
        }
        if let Some(rest) = trimmed.strip_prefix("kb|mg.") {
            if rest.is_empty() || !rest.chars().all(|ch| ch.is_ascii_digit()) {
                return Err(MgError::InvalidMetagenomeId(value.to_string()));
            }
            return Ok(Self(format!("mgm{rest}")));
        }
        let is_valid = trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '.' || ch == '_');
        if !is_valid {
            return Err(MgError::InvalidMetagenomeId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Biom,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Biom => write!(f, "biom"),
        }
    }
}

/// Query parameters common to every matrix fetch in one run. The per-batch
/// metagenome ids are appended by the fetch client, not stored here.
#[derive(Debug, Clone)]
pub struct MatrixQuery {
    pub group_level: String,
    pub source: String,
    pub evalue: i32,
    pub identity: i32,
    pub length: i32,
    pub intersect: Option<IntersectFilter>,
}

/// Taxon intersection constraint forwarded verbatim to the matrix endpoint.
#[derive(Debug, Clone)]
pub struct IntersectFilter {
    pub source: String,
    pub level: String,
    pub names: Vec<String>,
}

impl MatrixQuery {
    /// Key/value pairs in the order the original tool sends them.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("group_level".to_string(), self.group_level.clone()),
            ("source".to_string(), self.source.clone()),
            ("evalue".to_string(), self.evalue.to_string()),
            ("identity".to_string(), self.identity.to_string()),
            ("length".to_string(), self.length.to_string()),
            ("result_type".to_string(), "abundance".to_string()),
            ("asynchronous".to_string(), "1".to_string()),
        ];
        if let Some(intersect) = &self.intersect {
            pairs.push(("filter_source".to_string(), intersect.source.clone()));
            pairs.push(("filter_level".to_string(), intersect.level.clone()));
            for name in &intersect.names {
                pairs.push(("filter".to_string(), name.clone()));
            }
        }
        pairs
    }
}

/// Ontology levels are named `level1..levelN`; the coarsest grouping level
/// `function` corresponds to `level4` in the ontology records.
pub fn ontology_level(group_level: &str) -> &str {
    if group_level == "function" {
        "level4"
    } else {
        group_level
    }
}

/// Loads a CLI list argument: the value is either a path to a file with one
/// entry per line, or an inline comma-separated list.
pub fn load_name_list(value: &str) -> Result<Vec<String>, MgError> {
    let entries = if Path::new(value).is_file() {
        let content = fs::read_to_string(value)
            .map_err(|err| MgError::Filesystem(format!("read {value}: {err}")))?;
        content.lines().map(str::to_string).collect::<Vec<_>>()
    } else {
        value.split(',').map(str::to_string).collect()
    };
    Ok(entries
        .into_iter()
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect())
}

/// Same loader, but every entry must parse as a metagenome id.
pub fn load_id_list(value: &str) -> Result<Vec<MetagenomeId>, MgError> {
    load_name_list(value)?
        .iter()
        .map(|entry| entry.parse())
        .collect()
}

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MgError {
    #[error("malformed matrix input: {0}")]
    Parse(String),

    #[error("non-numeric value where a number was expected: {0}")]
    Format(String),

    #[error("cannot merge matrix fragments: {0}")]
    Merge(String),

    #[error("matrix request failed: {0}")]
    Fetch(String),

    #[error("matrix service returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("ontology lookup failed: {0}")]
    Ontology(String),

    #[error("remote normalization failed: {0}")]
    RemoteCompute(String),

    #[error("local normalization failed: {0}")]
    LocalCompute(String),

    #[error("invalid metagenome id: {0}")]
    InvalidMetagenomeId(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

use thiserror::Error;

/// Fatal failures of a pipeline run.
///
/// Expected data-quality issues (orphaned keys, implausible prices, unknown
/// categories) are repaired inside the stages and only show up as counts in
/// the run report. Anything that ends up here halts the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {source_name}: {source}")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// A source table lacks a column the schema requires.
    #[error("{source_name}: missing required column `{column}`")]
    MissingColumn { source_name: String, column: String },

    /// A timestamp or date that stays unparseable after the known repairs.
    #[error("{source_name} row {row}: cannot parse `{column}` value {value:?}")]
    ParseFault {
        source_name: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io { path: path.into(), source }
    }

    pub(crate) fn csv(source_name: impl Into<String>, source: csv::Error) -> Self {
        PipelineError::Csv { source_name: source_name.into(), source }
    }

    pub(crate) fn parse_fault(
        source_name: &str,
        row: usize,
        column: &str,
        value: impl Into<String>,
    ) -> Self {
        PipelineError::ParseFault {
            source_name: source_name.to_string(),
            row,
            column: column.to_string(),
            value: value.into(),
        }
    }
}

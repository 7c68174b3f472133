//! Error types for the Hydra system

use thiserror::Error;

/// Main error type for Hydra operations
#[derive(Error, Debug)]
pub enum Error {
    /// A task identifier outside `{1, 2}` was requested
    #[error("Invalid task selector {0}: expected 1 (disaster) or 2 (sentiment)")]
    InvalidTaskSelector(u8),

    /// A mixing coefficient or search bound fell outside `[0, 1]`
    #[error("Invalid coefficient {name} = {value}: must lie within [0, 1]")]
    InvalidCoefficients {
        /// Coefficient name (`lambda1`, `lambda2`)
        name: String,
        /// Offending value
        value: f64,
    },

    /// The objective failed while evaluating a search trial
    #[error("Search trial {trial} failed: {source}")]
    SearchEvaluation {
        /// Zero-based trial index
        trial: usize,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The objective returned a value that cannot be ranked
    #[error("Objective returned a non-finite fitness: {0}")]
    InvalidFitness(f64),

    /// A proposal strategy could not produce a candidate
    #[error("Search error: {0}")]
    Search(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset or batch error
    #[error("Data error: {0}")]
    Data(String),

    /// Model construction or loading error
    #[error("Model error: {0}")]
    Model(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Hydra operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a search strategy error
    pub fn search(msg: impl Into<String>) -> Self {
        Self::Search(msg.into())
    }

    /// Wrap a failure raised by the objective during a trial
    pub fn search_evaluation(trial: usize, source: Error) -> Self {
        Self::SearchEvaluation {
            trial,
            source: Box::new(source),
        }
    }
}

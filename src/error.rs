//! Error type shared by every pipeline stage

use thiserror::Error;

/// Failures that abort a scoring run.
///
/// Invalid individual transactions are never reported here; they are
/// filtered out during preprocessing.
#[derive(Debug, Error)]
pub enum CltvError {
    /// No customers survived the named stage.
    #[error("no customers left after {stage}")]
    EmptyCohort { stage: &'static str },

    /// Likelihood maximisation failed to produce usable parameters.
    #[error("{model} fit did not converge: {reason}")]
    NonConvergence { model: &'static str, reason: String },

    /// Every lifetime value in the run is identical, so min-max scaling is undefined.
    #[error("all {count} lifetime values are identical ({value}); cannot normalize")]
    DegenerateScores { count: usize, value: f64 },

    /// A model prediction evaluated to NaN or infinity.
    #[error("non-finite {what} for customer {customer_id}")]
    NonFinite { what: &'static str, customer_id: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, CltvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_failure() {
        let err = CltvError::EmptyCohort {
            stage: "rfm aggregation",
        };
        assert_eq!(err.to_string(), "no customers left after rfm aggregation");

        let err = CltvError::NonConvergence {
            model: "bg/nbd",
            reason: "objective is not finite".to_string(),
        };
        assert!(err.to_string().contains("bg/nbd"));
        assert!(err.to_string().contains("objective is not finite"));
    }

    #[test]
    fn test_io_errors_convert() {
        fn read() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            Ok(())
        }
        assert!(matches!(read(), Err(CltvError::Io(_))));
    }
}

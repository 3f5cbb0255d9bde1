//! Error types for u-consensus.

use thiserror::Error;

/// All errors produced by u-consensus operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusError {
    /// A configuration value is out of range. Raised before any computation.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },
    /// Insufficient data for the requested operation.
    #[error("need at least {min_required} rows, got {actual}")]
    InsufficientData { min_required: usize, actual: usize },
    /// Dimension mismatch.
    #[error("expected {expected} elements, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// A feature row contains NaN or an infinite value.
    #[error("row {row} contains a non-finite value")]
    NonFiniteValue { row: usize },
    /// Data is degenerate (e.g. zero features).
    #[error("degenerate data: {reason}")]
    DegenerateData { reason: String },
    /// A base clusterer failed inside a resampling round (strict mode).
    #[error("clusterer '{clusterer}' failed in round {round}: {message}")]
    BaseAlgorithm {
        clusterer: String,
        round: usize,
        message: String,
    },
    /// A numerical routine failed.
    #[error("{operation} failed: {detail}")]
    ComputationFailed { operation: String, detail: String },
    /// Accumulation was cancelled; partial results were discarded.
    #[error("accumulation cancelled")]
    Cancelled,
}

impl ConsensusError {
    /// Create an InvalidParameter error.
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an InsufficientData error.
    pub fn insufficient_data(min_required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            min_required,
            actual,
        }
    }

    /// Returns true for configuration errors (always fatal, raised up front).
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. })
    }
}

/// Validates a feature matrix: non-empty, rectangular, at least one
/// feature, all values finite. Returns the feature count.
pub(crate) fn validate_points(data: &[Vec<f64>]) -> Result<usize, ConsensusError> {
    if data.is_empty() {
        return Err(ConsensusError::DegenerateData {
            reason: "no data points provided".into(),
        });
    }
    let d = data[0].len();
    if d == 0 {
        return Err(ConsensusError::DegenerateData {
            reason: "data has 0 features".into(),
        });
    }
    for (i, point) in data.iter().enumerate() {
        if point.len() != d {
            return Err(ConsensusError::DimensionMismatch {
                expected: d,
                actual: point.len(),
            });
        }
        if point.iter().any(|v| !v.is_finite()) {
            return Err(ConsensusError::NonFiniteValue { row: i });
        }
    }
    Ok(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let cases = [
            (
                ConsensusError::invalid_parameter("threshold", "must lie in [0, 1], got 1.5"),
                "threshold",
            ),
            (ConsensusError::insufficient_data(2, 1), "at least 2"),
            (
                ConsensusError::DimensionMismatch {
                    expected: 3,
                    actual: 2,
                },
                "expected 3",
            ),
            (ConsensusError::NonFiniteValue { row: 4 }, "row 4"),
            (
                ConsensusError::BaseAlgorithm {
                    clusterer: "kmeans".into(),
                    round: 7,
                    message: "boom".into(),
                },
                "round 7",
            ),
            (ConsensusError::Cancelled, "cancelled"),
        ];
        for (err, needle) in cases {
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn configuration_errors_are_flagged() {
        assert!(ConsensusError::invalid_parameter("k", "zero").is_configuration());
        assert!(!ConsensusError::Cancelled.is_configuration());
    }

    #[test]
    fn validate_points_rejects_bad_input() {
        assert!(validate_points(&[]).is_err());
        assert!(validate_points(&[vec![]]).is_err());
        assert_eq!(
            validate_points(&[vec![1.0, 2.0], vec![1.0]]),
            Err(ConsensusError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            validate_points(&[vec![1.0], vec![f64::NAN]]),
            Err(ConsensusError::NonFiniteValue { row: 1 })
        );
        assert_eq!(validate_points(&[vec![1.0, 2.0]]), Ok(2));
    }
}

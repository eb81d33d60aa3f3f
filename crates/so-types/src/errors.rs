use thiserror::Error;

/// Main error type for the optimizer.
///
/// Constraint violations and termination are part of normal optimization
/// dynamics and never show up here. Only contract breaches by the driver and
/// defects in a collaborator are surfaced as errors.
#[derive(Error, Debug)]
pub enum OptError {
    #[error("next() called again before the dispatched configuration reported back")]
    NotReentrant,

    #[error("execution result reported but no configuration is dispatched")]
    NoDispatch,

    #[error("Algorithm error: {message}")]
    Algorithm { message: String },

    #[error("Problem definition error: {message}")]
    Problem { message: String },

    #[error("No acceptable candidate after {rejected} consecutive rejections")]
    CandidateStarvation { rejected: usize },

    #[error("Executor error: {message}")]
    Executor { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for optimizer operations
pub type OptResult<T> = Result<T, OptError>;

/// Macro for creating algorithm errors
#[macro_export]
macro_rules! algorithm_error {
    ($($arg:tt)*) => {
        $crate::OptError::Algorithm { message: format!($($arg)*) }
    };
}

/// Macro for creating problem definition errors
#[macro_export]
macro_rules! problem_error {
    ($($arg:tt)*) => {
        $crate::OptError::Problem { message: format!($($arg)*) }
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::OptError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = OptError::CandidateStarvation { rejected: 17 };
        assert!(error.to_string().contains("17"));

        let error = problem_error!("missing response {}", "throughput");
        assert!(error.to_string().contains("Problem definition error"));
        assert!(error.to_string().contains("throughput"));
    }

    #[test]
    fn test_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let opt_error: OptError = json_error.into();

        match opt_error {
            OptError::Serialization(_) => (),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_macros() {
        let _algorithm_err = algorithm_error!("generator failed at step {}", 3);
        let _problem_err = problem_error!("bad objective");
        let config_err = config_error!("concurrency must be positive, got {}", 0);
        assert!(matches!(config_err, OptError::Config(_)));
    }
}

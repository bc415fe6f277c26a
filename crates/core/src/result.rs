//! Result type definition and extension traits for Railway-Oriented Programming.
//!
//! Provides combinators for Result types on non-fatal paths, where a failure
//! is logged and the caller carries on.

use crate::error::Error;

/// The standard Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing log-and-continue combinators for any Result.
pub trait ResultExt<T, E> {
    /// Convert a Result to an Option, logging the error at `warn` if present.
    fn ok_logged(self, context: &str) -> Option<T>;

    /// Get the value or a default, logging the error at `warn` if present.
    fn or_default_logged(self, context: &str, default: T) -> T;

    /// Inspect the error without consuming the Result.
    fn inspect_failure<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E: std::fmt::Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn ok_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{context}");
                None
            }
        }
    }

    fn or_default_logged(self, context: &str, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "{context}, using default");
                default
            }
        }
    }

    fn inspect_failure<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_logged_keeps_value() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.ok_logged("should not log"), Some(42));
    }

    #[test]
    fn test_ok_logged_drops_error() {
        let result: Result<i32> = Err(Error::invalid_config("bad"));
        assert_eq!(result.ok_logged("config failed"), None);
    }

    #[test]
    fn test_or_default_logged() {
        let result: std::result::Result<u32, String> = Err("boom".to_string());
        assert_eq!(result.or_default_logged("counter", 7), 7);
    }

    #[test]
    fn test_inspect_failure_sees_error() {
        let mut seen = String::new();
        let result: std::result::Result<(), String> = Err("boom".to_string());
        let _ = result.inspect_failure(|e| seen.push_str(e));
        assert_eq!(seen, "boom");
    }
}

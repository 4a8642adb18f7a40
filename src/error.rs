//! Error types for makeavail

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::mount::Stage;

/// Result type alias for makeavail operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    // Pre-flight errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration incomplete: {0}")]
    IncompleteConfig(String),

    #[error("Mount selection error: {0}")]
    Selection(String),

    #[error("Checksum precondition failed: {0}")]
    ChecksumPrecondition(String),

    // Staging errors
    #[error("Failed to {stage}: {source}")]
    Acquisition {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("Directory operation on {} failed: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },

    // Teardown errors
    #[error(transparent)]
    Teardown(#[from] TeardownFailure),

    #[error("{primary}; teardown also failed: {teardown}")]
    WithTeardown {
        primary: Box<Error>,
        teardown: TeardownFailure,
    },

    // Checksum errors
    #[error("Checksum generation failed: {0}")]
    ChecksumGeneration(String),

    #[error("Failed to commit checksum file {} -> {}: {source}", .from.display(), .to.display())]
    ChecksumCommit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Attach a teardown failure to a primary error, keeping both visible
    pub fn with_teardown(self, teardown: TeardownFailure) -> Self {
        Error::WithTeardown {
            primary: Box::new(self),
            teardown,
        }
    }

    /// Whether this error was raised before any resource was acquired
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidConfig(_)
                | Error::IncompleteConfig(_)
                | Error::Selection(_)
                | Error::ChecksumPrecondition(_)
        )
    }
}

/// A single release action that failed during unwind
#[derive(Debug)]
pub struct ReleaseFailure {
    /// Label of the stack entry that failed to release
    pub label: String,
    /// Underlying error
    pub error: Error,
}

/// Aggregate of every release that failed during one unwind
#[derive(Debug, Default)]
pub struct TeardownFailure {
    pub failures: Vec<ReleaseFailure>,
}

impl TeardownFailure {
    /// Labels of the resources that may still need manual cleanup
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.label.as_str())
    }
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} release step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {} ({})", failure.label, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_display_names_every_label() {
        let failure = TeardownFailure {
            failures: vec![
                ReleaseFailure {
                    label: "unmount /tmp/w/emnt".to_string(),
                    error: Error::Internal("busy".to_string()),
                },
                ReleaseFailure {
                    label: "remove /tmp/w".to_string(),
                    error: Error::Internal("not empty".to_string()),
                },
            ],
        };

        let text = failure.to_string();
        assert!(text.starts_with("2 release step(s) failed"));
        assert!(text.contains("unmount /tmp/w/emnt (Internal error: busy)"));
        assert!(text.contains("remove /tmp/w"));
        assert_eq!(failure.labels().count(), 2);
    }

    #[test]
    fn test_with_teardown_keeps_primary() {
        let err = Error::ChecksumGeneration("exit status: 1".to_string())
            .with_teardown(TeardownFailure::default());
        let text = err.to_string();
        assert!(text.contains("Checksum generation failed"));
        assert!(text.contains("teardown also failed"));
    }

    #[test]
    fn test_preflight_classification() {
        assert!(Error::Selection("x".into()).is_preflight());
        assert!(Error::IncompleteConfig("x".into()).is_preflight());
        assert!(!Error::Internal("x".into()).is_preflight());
    }
}

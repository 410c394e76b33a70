//! CLI error type and exit-code mapping.

use std::fmt::{self, Display, Formatter};

use depot_fsops::{ErrorCategory, FsOpsError};

/// CLI-level error distinguishing bad invocations, refused requests, and failures.
#[derive(Debug)]
pub(crate) enum CliError {
    Validation(String),
    Request(FsOpsError),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Failure(_) => 3,
            Self::Request(err) => match err.category() {
                ErrorCategory::Validation => 2,
                ErrorCategory::Backend => 3,
                ErrorCategory::NotFound => 4,
                ErrorCategory::Conflict => 5,
                ErrorCategory::Permission => 6,
            },
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Request(err) => err.describe(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl From<FsOpsError> for CliError {
    fn from(err: FsOpsError) -> Self {
        Self::Request(err)
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_fsops::{ResourceKind, Verb};

    #[test]
    fn exit_codes_follow_error_category() {
        let missing = FsOpsError::NotFound {
            kind: ResourceKind::File,
            path: "a.txt".to_string(),
        }
        .in_request(Verb::Delete, "a.txt");
        let err = CliError::from(missing);
        assert_eq!(err.exit_code(), 4);
        assert!(err.display_message().contains("a.txt"));

        assert_eq!(CliError::validation("bad flag").exit_code(), 2);
        assert_eq!(CliError::failure(anyhow::anyhow!("boom")).exit_code(), 3);
    }
}

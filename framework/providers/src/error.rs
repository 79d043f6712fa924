pub type ProviderResult<T> = Result<T, ProviderError>;

/// A failed call to one of the external tools.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("required tool `{0}` was not found in PATH")]
    ToolMissing(String),
    /// The resource does not exist, or no longer exists.
    #[error("not found: {0}")]
    NotFound(String),
    /// The resource is still referenced by something else. Usually clears on its own.
    #[error("dependency violation: {0}")]
    DependencyViolation(String),
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {reason}")]
    InvalidResponse { command: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Error codes and messages the cloud CLI and kubectl print when the target is gone.
const NOT_FOUND_PATTERNS: &[&str] = &[
    "NotFound",
    "NoSuchEntity",
    "does not exist",
    "not found",
    "InvalidInstanceID.Malformed",
];

/// Error codes printed when a delete is blocked by something still attached.
const DEPENDENCY_PATTERNS: &[&str] = &[
    "DependencyViolation",
    "has a dependent object",
    "ResourceInUse",
    "in use by",
    "DeleteConflict",
];

impl ProviderError {
    /// Classify a non-zero exit by the tool's stderr.
    pub(crate) fn from_failure(command: String, status: String, stderr: String) -> Self {
        if NOT_FOUND_PATTERNS.iter().any(|p| stderr.contains(p)) {
            ProviderError::NotFound(first_line(&stderr))
        } else if DEPENDENCY_PATTERNS.iter().any(|p| stderr.contains(p)) {
            ProviderError::DependencyViolation(first_line(&stderr))
        } else {
            ProviderError::CommandFailed {
                command,
                status,
                stderr: stderr.trim().to_string(),
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, ProviderError::DependencyViolation(_))
    }
}

fn first_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(stderr: &str) -> ProviderError {
        ProviderError::from_failure("aws ec2".to_string(), "exit 254".to_string(), stderr.to_string())
    }

    #[test]
    fn classifies_missing_resources() {
        let err = classify(
            "\nAn error occurred (InvalidVpcID.NotFound) when calling the DeleteVpc operation: The vpc ID 'vpc-1' does not exist\n",
        );
        assert!(err.is_not_found());
        assert!(err.to_string().contains("InvalidVpcID.NotFound"));

        assert!(classify("An error occurred (NoSuchEntity) when calling the GetRole operation").is_not_found());
        assert!(classify("Error from server (NotFound): services \"web\" not found").is_not_found());
    }

    #[test]
    fn classifies_dependency_violations() {
        let err = classify(
            "An error occurred (DependencyViolation) when calling the DeleteSecurityGroup operation: resource sg-1 has a dependent object",
        );
        assert!(err.is_dependency_violation());
    }

    #[test]
    fn other_failures_keep_their_stderr() {
        let err = classify("An error occurred (UnauthorizedOperation)\n");
        match err {
            ProviderError::CommandFailed { stderr, .. } => {
                assert_eq!("An error occurred (UnauthorizedOperation)", stderr)
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }
}

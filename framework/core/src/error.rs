//! Marker errors for the failure classes of a run.
//!
//! Each marker is attached to an [anyhow::Error] at the point where the failure class becomes
//! known, and the runner decides how to exit by checking `error.is::<T>()`.

/// A required tool or configuration value is missing. Raised before any cloud resource exists.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("precondition failed: {msg}")]
pub struct PreconditionError {
    msg: String,
}

impl PreconditionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// A create call failed or a resource never converged within its attempt ceiling.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("provisioning failed during {step}: {msg}")]
pub struct ProvisioningError {
    step: String,
    msg: String,
}

impl ProvisioningError {
    pub fn new(step: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            msg: msg.into(),
        }
    }

    pub fn step(&self) -> &str {
        &self.step
    }
}

/// The benchmark itself failed after the environment was up. Diagnostics are dumped for these.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("load test failed: {msg}")]
pub struct RuntimeError {
    msg: String,
}

impl RuntimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

/// The run was stopped by an external signal.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("{msg}")]
pub struct InterruptedError {
    msg: String,
}

impl Default for InterruptedError {
    fn default() -> Self {
        Self {
            msg: "Run interrupted by shutdown signal".to_string(),
        }
    }
}

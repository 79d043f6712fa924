//! Provisions a disposable cloud environment, benchmarks two runtime images in it, and tears it
//! all down again on every exit path.

mod boot_script;
mod cli;
mod cluster;
mod config;
mod context;
mod deploy;
mod diagnostics;
mod dispatch;
mod images;
mod init;
mod monitor;
mod progress;
mod provision;
mod registry;
mod results;
mod run;
mod shutdown;
mod teardown;
mod types;

pub mod prelude {
    pub use crate::boot_script::{
        BOOT_FAILED_MARKER, MAX_USER_DATA_BYTES, TEST_COMPLETE_MARKER, TEST_START_MARKER,
    };
    pub use crate::cli::BenchfleetCli;
    pub use crate::config::{LoadProfile, RunConfig, Timings};
    pub use crate::context::{PublishedImages, RunContext, RunPhase, RUN_ID_TAG};
    pub use crate::deploy::{
        CAGED_IMAGE_PLACEHOLDER, EXPOSE_ANNOTATION, PATH_ANNOTATION, STANDARD_IMAGE_PLACEHOLDER,
        VARIANT_ANNOTATION,
    };
    pub use crate::init::init;
    pub use crate::monitor::{FailureReason, MonitorOutcome, FATAL_PATTERNS};
    pub use crate::registry::{Handle, HandleId, HandleState, Registry, RegistryError, ResourceKind};
    pub use crate::results::RUN_SUMMARY_FILE;
    pub use crate::run::{
        execute, run, Providers, RunOutcome, RunReport, EXIT_FAILURE, EXIT_INTERRUPTED,
        EXIT_SUCCESS,
    };
    pub use crate::teardown::{TeardownManager, TeardownReport};
    pub use crate::types::{BenchfleetResult, Endpoint};
}

mod error;
mod poll;
mod shutdown;

pub mod prelude {
    pub use crate::error::{InterruptedError, PreconditionError, ProvisioningError, RuntimeError};
    pub use crate::poll::{poll, Poll, PollError, PollPolicy};
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
}

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{borrow::BorrowMut, sync::Arc};

use tokio::sync::broadcast::{Receiver, Sender};
use tokio::sync::Mutex;

/// Broadcasts a single "stop now" signal to every listener in the process.
///
/// The runner holds one of these per run. The signal listener fires it on Ctrl-C or SIGTERM. The
/// orchestrator only acts on it at points where no create call is in flight.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Sender<()>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            sender: tokio::sync::broadcast::channel(1).0,
        }
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.sender.send(()) {
            // Will fail if nobody is listening for a shutdown signal, in which case the log message
            // can be ignored.
            log::warn!("Failed to send shutdown signal: {e:?}");
        }
    }

    pub fn new_listener(&self) -> DelegatedShutdownListener {
        DelegatedShutdownListener::new(self.sender.subscribe())
    }
}

/// A listener shared between clones. Once any clone has seen the signal, every clone reports it.
#[derive(Clone, Debug)]
pub struct DelegatedShutdownListener {
    receiver: Arc<Mutex<Receiver<()>>>,
    received: Arc<AtomicBool>,
}

impl DelegatedShutdownListener {
    pub(crate) fn new(receiver: Receiver<()>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
            received: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point in time check if the shutdown signal has been received.
    pub fn should_shutdown(&mut self) -> bool {
        if self.received.load(Ordering::SeqCst) {
            return true;
        }

        let seen = match self.receiver.try_lock() {
            Ok(mut guard) => {
                match guard.try_recv() {
                    Ok(_) => true,
                    Err(tokio::sync::broadcast::error::TryRecvError::Closed) => true,
                    // If the receiver is empty or lagged then we should not shutdown.
                    Err(_) => false,
                }
            }
            Err(_) => false,
        };
        if seen {
            self.received.store(true, Ordering::SeqCst);
        }
        seen
    }

    /// Drive `work` to completion unless the shutdown signal arrives first, in which case `work` is
    /// dropped and `None` returned.
    ///
    /// Only hand this work that is safe to abandon part way through, such as status polls.
    pub async fn unless_shutdown<F: Future>(&mut self, work: F) -> Option<F::Output> {
        if self.should_shutdown() {
            return None;
        }

        tokio::select! {
            output = work => Some(output),
            _ = self.wait_for_shutdown() => None,
        }
    }

    /// Wait for the shutdown signal to be received.
    ///
    /// If every [ShutdownHandle] has been dropped no signal can ever arrive and this never
    /// returns. It is safe to race this with another future so that the signal cancels work in
    /// progress.
    pub async fn wait_for_shutdown(&mut self) {
        if self.received.load(Ordering::SeqCst) {
            return;
        }

        let result = self.receiver.borrow_mut().lock().await.recv().await;
        match result {
            Ok(()) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                self.received.store(true, Ordering::SeqCst);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                log::debug!("Shutdown channel closed, no signal can arrive");
                std::future::pending::<()>().await;
            }
        }
    }
}

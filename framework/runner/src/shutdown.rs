use benchfleet_core::prelude::ShutdownHandle;
use tokio::signal;

/// Route Ctrl-C, and SIGTERM on unix, into a [ShutdownHandle].
///
/// The listener keeps running after the first signal. Later signals are logged and otherwise
/// ignored, since once the handlers are installed the process is no longer killed by them and
/// teardown is left to finish.
pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::default();

    #[cfg(unix)]
    let mut terminate = {
        let _guard = runtime.enter();
        signal::unix::signal(signal::unix::SignalKind::terminate())?
    };

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        let mut received = 0u32;
        loop {
            #[cfg(unix)]
            let name = tokio::select! {
                result = signal::ctrl_c() => match result {
                    Ok(()) => "Ctrl-C",
                    Err(e) => {
                        log::error!("Failed to listen for Ctrl-C: {e}");
                        return;
                    }
                },
                _ = terminate.recv() => "SIGTERM",
            };
            #[cfg(not(unix))]
            let name = match signal::ctrl_c().await {
                Ok(()) => "Ctrl-C",
                Err(e) => {
                    log::error!("Failed to listen for Ctrl-C: {e}");
                    return;
                }
            };

            received += 1;
            if received == 1 {
                log::warn!("Received {name}, stopping the run and tearing down");
                listener_handle.shutdown();
            } else {
                log::warn!("Received {name} again, teardown is still running and will not be interrupted");
            }
        }
    });

    Ok(handle)
}

use std::process::ExitCode;

use benchfleet_runner::prelude::{init, run, EXIT_FAILURE};

fn main() -> ExitCode {
    let (cli, log_path) = init();
    if let Some(path) = &log_path {
        log::info!("Logging to {}", path.display());
    }

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            log::error!("{e:?}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

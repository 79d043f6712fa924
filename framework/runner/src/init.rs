use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use crate::cli::BenchfleetCli;

/// Initialise the CLI and logging for the benchfleet runner.
///
/// Returns the parsed CLI and the path of the run log, if one could be created.
pub fn init() -> (BenchfleetCli, Option<PathBuf>) {
    let cli = BenchfleetCli::parse();

    let log_path = match open_run_log(&cli.log_dir) {
        Ok((path, file)) => {
            init_logging(Some(file));
            Some(path)
        }
        Err(e) => {
            init_logging(None);
            log::warn!("Logging to stderr only: {e:?}");
            None
        }
    };

    (cli, log_path)
}

fn open_run_log(log_dir: &Path) -> anyhow::Result<(PathBuf, File)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(format!(
        "benchfleet-{}.log",
        chrono::Utc::now().format("%Y%m%dT%H%M%SZ")
    ));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    Ok((path, file))
}

fn init_logging(file: Option<File>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(file) = file {
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
    }
    // Already initialised when embedded, e.g. in tests.
    let _ = builder.try_init();
}

/// Every log line goes to stderr and to the run log.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _file) = open_run_log(&dir.path().join("logs")).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("benchfleet-"));
        assert!(name.ends_with("Z.log"));
        assert!(path.exists());
    }

    #[test]
    fn tee_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tee.log");
        let mut tee = TeeWriter {
            file: File::create(&path).unwrap(),
        };

        tee.write_all(b"hello\n").unwrap();
        tee.flush().unwrap();

        assert_eq!("hello\n", std::fs::read_to_string(&path).unwrap());
    }
}

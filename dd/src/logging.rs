//! Log output: level selection and a switchable sink
//!
//! The subscriber is installed once per process and writes through a
//! [`LogSink`]. The sink starts on stderr and can be pointed at an
//! append-mode file later, once the configuration naming it has been read.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use eyre::{Context, Result};
use tracing::{Level, debug, info};

enum Target {
    Stderr,
    File { path: PathBuf, file: File },
}

/// Cloneable writer shared by every log line
#[derive(Clone)]
pub struct LogSink {
    target: Arc<Mutex<Target>>,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::stderr()
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink").field("path", &self.path()).finish()
    }
}

impl LogSink {
    pub fn stderr() -> Self {
        Self {
            target: Arc::new(Mutex::new(Target::Stderr)),
        }
    }

    /// Append all further output to `path`, creating parent directories
    pub fn redirect(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "redirect: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(format!("Failed to open log file {}", path.display()))?;

        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = Target::File {
            path: path.to_path_buf(),
            file,
        };
        info!(path = %path.display(), "Log output redirected");
        Ok(())
    }

    /// Go back to stderr
    pub fn reset(&self) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = Target::Stderr;
    }

    /// File currently written to, if any
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.target.lock().unwrap_or_else(|e| e.into_inner()) {
            Target::Stderr => None,
            Target::File { path, .. } => Some(path.clone()),
        }
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.target.lock().unwrap_or_else(|e| e.into_inner()) {
            Target::Stderr => io::stderr().write(buf),
            Target::File { file, .. } => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.target.lock().unwrap_or_else(|e| e.into_inner()) {
            Target::Stderr => io::stderr().flush(),
            Target::File { file, .. } => file.flush(),
        }
    }
}

/// Parse a level name as written in configuration or on the command line
pub fn parse_level(s: &str) -> Result<Level> {
    match s.to_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" => Ok(Level::ERROR),
        _ => Err(eyre::eyre!("Unknown log level '{}'", s)),
    }
}

/// Pick the log level: CLI --log-level > config file > -d count > INFO
pub fn resolve_level(cli_log_level: Option<&str>, config_log_level: Option<&str>, debug_count: u8) -> Result<Level> {
    if let Some(s) = cli_log_level.or(config_log_level) {
        return parse_level(s);
    }
    Ok(match debug_count {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    })
}

/// Install the global subscriber writing through `sink`
pub fn setup_logging(level: Level, sink: LogSink) -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(move || sink.clone())
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install log subscriber: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_level("Warning").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_resolve_level_priority() {
        assert_eq!(resolve_level(Some("error"), Some("debug"), 2).unwrap(), Level::ERROR);
        assert_eq!(resolve_level(None, Some("debug"), 0).unwrap(), Level::DEBUG);
        assert_eq!(resolve_level(None, None, 0).unwrap(), Level::INFO);
        assert_eq!(resolve_level(None, None, 1).unwrap(), Level::DEBUG);
        assert_eq!(resolve_level(None, None, 3).unwrap(), Level::TRACE);
    }

    #[test]
    fn test_redirect_appends_and_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("dashd.log");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "earlier\n").unwrap();

        let mut sink = LogSink::stderr();
        assert!(sink.path().is_none());
        sink.redirect(&path).unwrap();
        assert_eq!(sink.path(), Some(path.clone()));

        let mut clone = sink.clone();
        writeln!(clone, "later").unwrap();
        sink.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
    }

    #[test]
    fn test_redirect_creates_missing_directories() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("b").join("dashd.log");
        let sink = LogSink::stderr();
        sink.redirect(&path).unwrap();
        assert!(path.exists());
        sink.reset();
        assert!(sink.path().is_none());
    }

    #[test]
    fn test_redirect_to_unwritable_path_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "").unwrap();
        // A regular file cannot be a parent directory
        let sink = LogSink::stderr();
        assert!(sink.redirect(&blocker.join("dashd.log")).is_err());
        assert!(sink.path().is_none());
    }
}

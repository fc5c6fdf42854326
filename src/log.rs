//! File-backed tracing setup for hosts that cannot read stderr.

use crate::config::LogLevel;
use crate::error::{Error, Result};
use crate::path_utils;
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

static INITIALIZED: OnceCell<String> = OnceCell::new();

/// Initialize global tracing writing to `log_file` at `level` (defaults to
/// info when absent or unparseable) and return the resolved log file path.
///
/// Idempotent: later calls return the path of the first initialization.
pub fn init_tracing(log_file: &str, level: Option<&str>) -> Result<String> {
    let resolved = INITIALIZED.get_or_try_init(|| -> Result<String> {
        let path = Path::new(log_file);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(Error::CreateDir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::TracingInit(format!("cannot open {}: {e}", path.display())))?;

        let level = level
            .and_then(|l| l.parse::<LogLevel>().ok())
            .unwrap_or_default();

        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level.as_tracing_level())
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| Error::TracingInit(e.to_string()))?;

        install_panic_hook();

        let resolved = path_utils::canonicalize(path)
            .map_err(|e| Error::TracingInit(format!("cannot resolve {}: {e}", path.display())))?;
        Ok(resolved.to_string_lossy().into_owned())
    })?;

    Ok(resolved.clone())
}

/// Route panics through tracing so they land in the log file instead of a
/// stderr the host may have swallowed.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "<unknown>".to_string());

        tracing::error!(panic = payload, %location, "Panic");
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent_and_returns_resolved_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let log_file = dir.path().join("logs/picker.log");
        let log_file = log_file.to_string_lossy().into_owned();

        let first = init_tracing(&log_file, Some("debug")).unwrap();
        let second = init_tracing(&log_file, Some("trace")).unwrap();
        assert_eq!(first, second);
        assert!(Path::new(&first).exists());
    }
}

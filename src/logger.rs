use crate::config::Settings;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "assistant.log";

/// Set up console logging, plus a debug log file under `LOG_DIR` when debug
/// mode is on. `RUST_LOG` overrides the console level only.
///
/// Returns the log file path when one was opened.
pub fn init_tracing(settings: &Settings) -> anyhow::Result<Option<PathBuf>> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (subscriber, log_path) = build_subscriber(settings, rust_log.as_deref())?;
    subscriber.try_init()?;
    Ok(log_path)
}

fn build_subscriber(
    settings: &Settings,
    rust_log: Option<&str>,
) -> anyhow::Result<(impl Subscriber + Send + Sync + 'static, Option<PathBuf>)> {
    let level = if settings.debug_mode {
        "debug"
    } else {
        settings.log_level.as_str()
    };
    let console_filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(format!("assistant_shell={}", level)).ok())
        .unwrap_or_else(|| EnvFilter::new("assistant_shell=info"));

    let (file_layer, log_path) = if settings.debug_mode {
        fs::create_dir_all(&settings.log_dir)?;
        let path = settings.log_dir.join(LOG_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let layer = fmt::layer()
            .with_ansi(false)
            .with_timer(ChronoLocal::rfc_3339())
            .with_writer(Mutex::new(file))
            .with_filter(EnvFilter::new("assistant_shell=debug"));
        (Some(layer), Some(path))
    } else {
        (None, None)
    };

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_layer);

    Ok((subscriber, log_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};

    fn settings_in(dir: &std::path::Path, debug_mode: &str) -> Settings {
        let log_dir = dir.display().to_string();
        Settings::from_pairs([("DEBUG_MODE", debug_mode), ("LOG_DIR", log_dir.as_str())]).unwrap()
    }

    #[test]
    fn debug_file_keeps_debug_output_when_rust_log_is_quieter() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), "true");

        let (subscriber, path) = build_subscriber(&settings, Some("warn")).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            debug!("request body for the file");
        });

        let path = path.unwrap();
        assert_eq!(path, dir.path().join(LOG_FILE));
        let written = fs::read_to_string(path).unwrap();
        assert!(written.contains("request body for the file"));
    }

    #[test]
    fn no_log_file_outside_debug_mode() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), "false");

        let (subscriber, path) = build_subscriber(&settings, None).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            info!("console only");
        });

        assert!(path.is_none());
        assert!(!dir.path().join(LOG_FILE).exists());
    }
}

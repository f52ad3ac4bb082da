//! Structured JSON telemetry for one evaluation run.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::Level;
use tracing::span::EnteredSpan;
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LoggingConfig, ResolvedOutputs};

pub const TELEMETRY_FILE: &str = "telemetry.jsonl";

/// Crates whose events reach the telemetry file at the configured level.
/// Everything else is held at `warn`.
const TOOLBOX_TARGETS: [&str; 3] = ["cpt_bench", "cpt_core", "cpt_policy"];

/// Telemetry sits next to the summary report.
pub fn telemetry_path(outputs: &ResolvedOutputs) -> PathBuf {
    outputs
        .summary_md
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(TELEMETRY_FILE)
}

fn filter_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in TOOLBOX_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Keeps the writer flushing and every event inside the `evaluation` span.
pub struct LoggingGuard {
    _span: EnteredSpan,
    _writer: WorkerGuard,
    path: PathBuf,
}

impl LoggingGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Installs a JSON subscriber writing to [`telemetry_path`].
///
/// `RUST_LOG` takes precedence over `logging.tracing_level`. Every line
/// carries the run id through the enclosing `evaluation` span.
pub fn init_logging(
    logging: &LoggingConfig,
    outputs: &ResolvedOutputs,
    run_id: &str,
) -> Result<Option<LoggingGuard>> {
    if !logging.enable_structured {
        return Ok(None);
    }

    let path = telemetry_path(outputs);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating telemetry directory at {}", dir.display()))?;
    }
    let file = File::create(&path)
        .with_context(|| format!("creating telemetry file at {}", path.display()))?;
    let (writer, writer_guard) = non_blocking::NonBlockingBuilder::default()
        .lossy(false)
        .finish(file);

    let level = logging.level().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(level)));

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(writer)
        .finish();

    // Tests may have installed a subscriber already.
    let _ = tracing::subscriber::set_global_default(subscriber);
    let span = tracing::info_span!(target: "cpt_bench::logging", "evaluation", run_id).entered();
    tracing::info!(
        target: "cpt_bench::logging",
        path = %path.display(),
        level = level.as_str(),
        "structured telemetry enabled"
    );

    Ok(Some(LoggingGuard {
        _span: span,
        _writer: writer_guard,
        path,
    }))
}

//! Structured logging setup.
//!
//! Events are written as JSON lines to a daily-rolled file. Stdout is never
//! touched because it carries command output (`--json` results in
//! particular); when no log file can be opened, logs go to stderr.
//!
//! Destination, first match wins:
//! 1. `GEMSTAMP_LOG_PATH` (explicit file)
//! 2. `GEMSTAMP_LOG_DIR`
//! 3. `log_dir` from configuration
//! 4. `/var/log` (unix), the platform local data dir, the working directory

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::Event;
use tracing::field::{Field, Visit};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const ENV_LOG_PATH: &str = "GEMSTAMP_LOG_PATH";
const ENV_LOG_DIR: &str = "GEMSTAMP_LOG_DIR";
const UNIX_LOG_DIR: &str = "/var/log";
const LOG_EXTENSION: &str = "jsonl";

/// Inputs for logging setup.
#[derive(Clone, Debug)]
pub struct ObservabilityConfig {
    /// Name written into the log file name.
    pub service: String,
    /// `log_dir` from configuration.
    pub log_dir: Option<PathBuf>,
}

impl ObservabilityConfig {
    /// Config for this binary with the configured log directory.
    pub fn from_env_with_overrides(log_dir: Option<PathBuf>) -> Self {
        Self {
            service: env!("CARGO_PKG_NAME").to_string(),
            log_dir,
        }
    }
}

/// Where log lines go.
#[derive(Clone, Debug, PartialEq, Eq)]
struct LogFile {
    dir: PathBuf,
    file_name: String,
}

/// Keeps the background log writer alive; drop it last.
pub struct ObservabilityGuard {
    _worker: WorkerGuard,
}

/// Install the global subscriber.
pub fn init_observability(
    cfg: &ObservabilityConfig,
    env_filter: EnvFilter,
) -> Result<ObservabilityGuard> {
    let (writer, worker) = match open_log_writer(cfg) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("Warning: {err:#}. Logging to stderr.");
            tracing_appender::non_blocking(std::io::stderr())
        }
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(JsonLines::new(writer))
        .try_init()
        .context("a global subscriber is already installed")?;

    tracing::debug!(service = %cfg.service, "logging initialized");
    Ok(ObservabilityGuard { _worker: worker })
}

/// Filter from CLI flags and environment.
///
/// `--quiet` beats `-v`/`-vv`, which beat `RUST_LOG`, which beats the
/// configured level.
pub fn env_filter(quiet: bool, verbose: u8, default_level: &str) -> EnvFilter {
    match (quiet, verbose) {
        (true, _) => EnvFilter::new("error"),
        (false, 1) => EnvFilter::new("debug"),
        (false, 2..) => EnvFilter::new("trace"),
        (false, 0) => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
        }
    }
}

fn open_log_writer(cfg: &ObservabilityConfig) -> Result<(NonBlocking, WorkerGuard)> {
    let target = resolve_log_file(
        &cfg.service,
        std::env::var_os(ENV_LOG_PATH).map(PathBuf::from),
        std::env::var_os(ENV_LOG_DIR).map(PathBuf::from),
        cfg.log_dir.clone(),
    )?;
    let appender = tracing_appender::rolling::daily(&target.dir, &target.file_name);
    Ok(tracing_appender::non_blocking(appender))
}

// ──────────────────────────────────────────────
// Destination
// ──────────────────────────────────────────────

fn resolve_log_file(
    service: &str,
    explicit_path: Option<PathBuf>,
    env_dir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
) -> Result<LogFile> {
    if let Some(path) = explicit_path {
        return log_file_at(&path);
    }
    let file_name = format!("{service}.{LOG_EXTENSION}");
    if let Some(dir) = env_dir.or(config_dir) {
        check_writable(&dir, &file_name)?;
        return Ok(LogFile { dir, file_name });
    }

    let mut fallbacks = Vec::new();
    if cfg!(unix) {
        fallbacks.push(PathBuf::from(UNIX_LOG_DIR));
    }
    if let Some(dirs) = directories::ProjectDirs::from("", "", service) {
        fallbacks.push(dirs.data_local_dir().join("logs"));
    }
    if let Ok(cwd) = std::env::current_dir() {
        fallbacks.push(cwd);
    }

    fallbacks
        .into_iter()
        .find(|dir| check_writable(dir, &file_name).is_ok())
        .map(|dir| LogFile { dir, file_name })
        .ok_or_else(|| anyhow!("no writable log directory found"))
}

fn log_file_at(path: &Path) -> Result<LogFile> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{ENV_LOG_PATH} must end in a UTF-8 file name"))?
        .to_string();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    check_writable(&dir, &file_name)?;
    Ok(LogFile { dir, file_name })
}

fn check_writable(dir: &Path, file_name: &str) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let path = dir.join(file_name);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    Ok(())
}

// ──────────────────────────────────────────────
// JSON lines layer
// ──────────────────────────────────────────────

struct JsonLines<W> {
    writer: W,
}

impl<W> JsonLines<W> {
    const fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[derive(Clone, Debug, Default)]
struct SpanFields(Map<String, Value>);

impl<S, W> tracing_subscriber::Layer<S> for JsonLines<W>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldMap::default();
        attrs.record(&mut fields);
        span.extensions_mut().insert(SpanFields(fields.0));
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        ctx: LayerContext<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut fields = FieldMap::default();
        values.record(&mut fields);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(existing) => existing.0.extend(fields.0),
            None => extensions.insert(SpanFields(fields.0)),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: LayerContext<'_, S>) {
        let meta = event.metadata();
        let mut line = Map::new();
        line.insert("timestamp".into(), Value::String(timestamp()));
        line.insert("level".into(), Value::String(meta.level().as_str().to_lowercase()));
        line.insert("target".into(), Value::String(meta.target().to_string()));

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(fields) = span.extensions().get::<SpanFields>() {
                    line.extend(fields.0.clone());
                }
            }
        }

        let mut fields = FieldMap::default();
        event.record(&mut fields);
        line.extend(fields.0);

        let mut writer = self.writer.make_writer();
        if serde_json::to_writer(&mut writer, &Value::Object(line)).is_ok() {
            let _ = writer.write_all(b"\n");
        }
    }
}

#[derive(Default)]
struct FieldMap(Map<String, Value>);

impl FieldMap {
    fn put(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldMap {
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(number));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gemstamp-obs-{name}"))
    }

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(env_filter(true, 2, "info").to_string(), "error");
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(env_filter(false, 1, "info").to_string(), "debug");
        assert_eq!(env_filter(false, 3, "info").to_string(), "trace");
    }

    #[test]
    fn explicit_path_wins() {
        let path = temp_log_dir("explicit").join("release.jsonl");
        let target = resolve_log_file(
            "gemstamp",
            Some(path.clone()),
            Some(temp_log_dir("ignored-env")),
            Some(temp_log_dir("ignored-config")),
        )
        .unwrap();
        assert_eq!(target.dir.join(&target.file_name), path);
    }

    #[test]
    fn env_dir_beats_config_dir() {
        let env_dir = temp_log_dir("env");
        let target =
            resolve_log_file("gemstamp", None, Some(env_dir.clone()), Some(temp_log_dir("cfg")))
                .unwrap();
        assert_eq!(target.dir, env_dir);
        assert_eq!(target.file_name, "gemstamp.jsonl");
    }

    #[test]
    fn config_dir_used_without_env() {
        let dir = temp_log_dir("config-only");
        let target = resolve_log_file("gemstamp", None, None, Some(dir.clone())).unwrap();
        assert_eq!(target, LogFile {
            dir,
            file_name: "gemstamp.jsonl".into(),
        });
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        let target = log_file_at(Path::new("only-name.jsonl"));
        if let Ok(target) = target {
            assert_eq!(target.dir, PathBuf::from("."));
            let _ = std::fs::remove_file("only-name.jsonl");
        }
    }

    #[test]
    fn timestamp_is_rfc3339_millis() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'), "{ts}");
        assert_eq!(ts.len(), 24, "{ts}");
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}

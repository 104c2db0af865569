use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// grammers is chatty at debug; keep its noise out of run logs unless asked.
const DEFAULT_FILTER: &str = "debug,grammers_client=warn,grammers_mtsender=warn,grammers_mtproto=warn,grammers_session=warn";

static RUN_LOG: OnceLock<RunLogSink> = OnceLock::new();
static TRACING_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Login,
    List,
    Send,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::List => "list",
            Self::Send => "send",
        }
    }
}

/// Process-wide NDJSON sink; writes are dropped while no run is active.
#[derive(Debug, Default)]
struct RunLogSink {
    file: Mutex<Option<BufWriter<File>>>,
}

impl RunLogSink {
    fn lock(&self) -> MutexGuard<'_, Option<BufWriter<File>>> {
        self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self, path: &Path) -> std::io::Result<()> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "run log already active",
            ));
        }
        let file = OpenOptions::new().create_new(true).write(true).open(path)?;
        *slot = Some(BufWriter::new(file));
        Ok(())
    }

    fn close(&self) -> std::io::Result<()> {
        let Some(mut writer) = self.lock().take() else {
            return Ok(());
        };
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

struct RunLogWriter<'a> {
    slot: MutexGuard<'a, Option<BufWriter<File>>>,
}

impl Write for RunLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.slot.as_mut() {
            Some(writer) => writer.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.slot.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RunLogSink {
    type Writer = RunLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter { slot: self.lock() }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for &RunLogSink {
    type Writer = RunLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        (**self).make_writer()
    }
}

fn build_env_filter_from(tgdrop_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    [tgdrop_log, rust_log]
        .into_iter()
        .flatten()
        .find_map(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_run_logging() {
    TRACING_INIT.get_or_init(|| {
        let sink = RUN_LOG.get_or_init(RunLogSink::default);
        let env_filter = build_env_filter_from(
            std::env::var("TGDROP_LOG").ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        );

        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
            .with_writer(sink);

        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init();
    });
}

/// Closes and syncs the run log when dropped.
pub struct RunLogGuard {
    path: PathBuf,
}

impl RunLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        if let Some(sink) = RUN_LOG.get() {
            let _ = sink.close();
        }
    }
}

/// Starts `<log dir>/run-<kind>-<utc>-<run_id>.ndjson`; one run per process at a time.
pub fn start_run_log(kind: RunKind, run_id: &str, data_dir: &Path) -> std::io::Result<RunLogGuard> {
    init_run_logging();

    let log_dir = std::env::var_os("TGDROP_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join("logs"));
    std::fs::create_dir_all(&log_dir)?;

    let path = log_dir.join(format!(
        "run-{}-{}-{}.ndjson",
        kind.as_str(),
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        sanitize_filename_component(run_id)
    ));
    RUN_LOG.get_or_init(RunLogSink::default).open(&path)?;

    Ok(RunLogGuard { path })
}

fn sanitize_filename_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tgdrop_core::run_log::{RunKind, start_run_log};
use tgdrop_core::{
    APP_NAME, DispatchConfig, DispatchOptions, DispatchProgress, DispatchResult, FailureStage,
    ItemOutcome, ListingEntry, LoginPrompt, ProgressSink, Settings, TelegramMtProto,
    TelegramMtProtoConfig, dispatch_with, fetch_directory, list_images, load_credentials,
    load_settings, resolve,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "tgdrop")]
#[command(about = "Telegram CLI: list chats and send a folder of images to one of them", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with a phone number and store the session.
    Login {
        #[arg(short, long)]
        phone: Option<String>,
    },
    /// Show the chats a message can be sent to.
    List,
    /// Send every image in a directory to one chat.
    #[command(alias = "spam")]
    Send {
        #[arg(allow_negative_numbers = true)]
        chat_id: i64,
        #[arg(short = 'd', long)]
        images_dir: Option<PathBuf>,
        /// Delay between messages in milliseconds.
        #[arg(short = 't', long)]
        delay: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Human-readable progress, one block per image.
struct ConsoleProgressSink;

impl ProgressSink for ConsoleProgressSink {
    fn on_item_start(&self, ordinal: usize, total: usize, path: &Path) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        println!("[{ordinal}/{total}] Sending {name}...");
    }

    fn on_progress(&self, p: DispatchProgress) {
        match p.outcome {
            ItemOutcome::Sent { .. } => println!("  ✓ Sent successfully"),
            ItemOutcome::Failed { stage, cause } => {
                println!("  ✗ Failed to {}: {cause}", stage_label(stage))
            }
            ItemOutcome::Pending => {}
        }
    }
}

struct NdjsonProgressSink {
    run_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: DispatchProgress) {
        let line = serde_json::json!({
            "type": "dispatch.progress",
            "runId": self.run_id,
            "ordinal": p.ordinal,
            "total": p.total,
            "path": p.path,
            "outcome": p.outcome,
        });
        println!("{line}");
    }
}

/// Counts finished items and forwards to the display sink, if any.
#[derive(Default)]
struct TallySink<'a> {
    inner: Option<&'a dyn ProgressSink>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl TallySink<'_> {
    fn details(&self) -> serde_json::Value {
        let sent = self.sent.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        serde_json::json!({
            "attempted": sent + failed,
            "sent": sent,
            "failed": failed,
        })
    }
}

impl ProgressSink for TallySink<'_> {
    fn on_item_start(&self, ordinal: usize, total: usize, path: &Path) {
        if let Some(inner) = self.inner {
            inner.on_item_start(ordinal, total, path);
        }
    }

    fn on_progress(&self, p: DispatchProgress) {
        match p.outcome {
            ItemOutcome::Sent { .. } => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            ItemOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            ItemOutcome::Pending => {}
        }
        if let Some(inner) = self.inner {
            inner.on_progress(p);
        }
    }
}

/// A failed session save is logged; it never hides how the batch went.
fn finish_dispatch(
    res: tgdrop_core::Result<DispatchResult>,
    saved: tgdrop_core::Result<()>,
    tally: &TallySink<'_>,
) -> Result<DispatchResult, CliError> {
    if let Err(e) = saved {
        warn!(event = "session.save_failed", error = %e, "session.save_failed");
    }
    match res {
        Ok(res) => Ok(res),
        Err(tgdrop_core::Error::Cancelled) => {
            Err(map_core_err(tgdrop_core::Error::Cancelled).with_details(tally.details()))
        }
        Err(e) => Err(map_core_err(e)),
    }
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Open => "open file",
        FailureStage::Upload => "upload",
        FailureStage::Send => "send",
    }
}

/// Reads answers from stdin, prompting on stdout.
struct StdinPrompt;

impl StdinPrompt {
    fn ask(question: &str) -> tgdrop_core::Result<String> {
        print!("{question}");
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl LoginPrompt for StdinPrompt {
    fn code(&self) -> tgdrop_core::Result<String> {
        Self::ask("Enter the code you received: ")
    }

    fn password(&self, hint: Option<&str>) -> tgdrop_core::Result<String> {
        match hint.filter(|h| !h.is_empty()) {
            Some(hint) => Self::ask(&format!("Enter your 2FA password (hint: {hint}): ")),
            None => Self::ask("Enter your 2FA password: "),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| std::env::var("TGDROP_CONFIG_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_dir);
    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("TGDROP_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_dir);

    let kind = match &cli.cmd {
        Command::Login { .. } => RunKind::Login,
        Command::List => RunKind::List,
        Command::Send { .. } => RunKind::Send,
    };
    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    let _run_log = start_run_log(kind, &run_id, &data_dir)
        .map_err(|e| CliError::new("log.init_failed", e.to_string()))?;
    info!(
        event = "run.start",
        app = APP_NAME,
        kind = kind.as_str(),
        run_id = %run_id,
        "run.start"
    );

    let settings = load_settings(&config_dir).map_err(map_core_err)?;
    let result = match cli.cmd {
        Command::Login { phone } => login(&settings, phone, cli.json).await,
        Command::List => list(&settings, cli.json).await,
        Command::Send {
            chat_id,
            images_dir,
            delay,
        } => {
            send(
                &settings,
                SendArgs {
                    chat_id,
                    images_dir,
                    delay,
                },
                &run_id,
                cli.json,
                cli.events,
            )
            .await
        }
    };

    match &result {
        Ok(()) => info!(event = "run.finish", status = "succeeded", "run.finish"),
        Err(e) => error!(
            event = "run.finish",
            status = "failed",
            error.code = e.code,
            error.message = %e.message,
            "run.finish"
        ),
    }
    result
}

fn default_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

async fn connect(settings: &Settings, authorized: bool) -> Result<TelegramMtProto, CliError> {
    let credentials = load_credentials(&default_dir()).map_err(map_core_err)?;
    let config = TelegramMtProtoConfig {
        credentials,
        session_path: settings.session.path.clone(),
    };
    if authorized {
        TelegramMtProto::connect_authorized(config).await
    } else {
        TelegramMtProto::connect(config).await
    }
    .map_err(map_core_err)
}

async fn login(settings: &Settings, phone: Option<String>, json: bool) -> Result<(), CliError> {
    let backend = connect(settings, false).await?;
    let phone = match phone.filter(|p| !p.trim().is_empty()) {
        Some(phone) => phone,
        None => StdinPrompt::ask("Enter your phone number (with country code, e.g., +1234567890): ")
            .map_err(map_core_err)?,
    };
    if phone.is_empty() {
        return Err(CliError::new("auth.failed", "phone number is empty"));
    }

    let name = backend
        .login(&phone, &StdinPrompt)
        .await
        .map_err(map_core_err)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "name": name,
                "sessionPath": backend.session_path(),
            })
        );
    } else {
        println!("\n✓ Successfully logged in as {name}");
        println!("Session saved to {}", backend.session_path().display());
    }
    Ok(())
}

async fn list(settings: &Settings, json: bool) -> Result<(), CliError> {
    let backend = connect(settings, true).await?;
    let snapshot = fetch_directory(&backend).await.map_err(map_core_err)?;
    let entries: Vec<ListingEntry> = snapshot.listing();
    backend.save_session().map_err(map_core_err)?;

    if json {
        println!(
            "{}",
            serde_json::to_string(&entries)
                .map_err(|e| CliError::new("config.invalid", e.to_string()))?
        );
        return Ok(());
    }

    println!("\n=== Available Chats ===");
    for entry in &entries {
        println!("{entry}");
    }
    println!("\nNote: Use the ID value when sending messages with the 'send' command");
    Ok(())
}

struct SendArgs {
    chat_id: i64,
    images_dir: Option<PathBuf>,
    delay: Option<u64>,
}

async fn send(
    settings: &Settings,
    args: SendArgs,
    run_id: &str,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let images_dir = args
        .images_dir
        .unwrap_or_else(|| settings.send.images_dir.clone());
    let delay_ms = args.delay.unwrap_or(settings.send.delay_ms);

    let backend = connect(settings, true).await?;
    let files = list_images(&images_dir).map_err(map_core_err)?;
    if files.is_empty() {
        return Err(map_core_err(tgdrop_core::Error::EmptyBatch)
            .with_details(serde_json::json!({ "imagesDir": images_dir })));
    }
    if !json && !events {
        println!("Found {} images to send", files.len());
    }

    let snapshot = fetch_directory(&backend).await.map_err(map_core_err)?;
    let peer = resolve(&snapshot, args.chat_id).map_err(map_core_err)?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let console = ConsoleProgressSink;
    let ndjson = NdjsonProgressSink {
        run_id: run_id.to_string(),
    };
    let display: Option<&dyn ProgressSink> = if events {
        Some(&ndjson)
    } else if json {
        None
    } else {
        Some(&console)
    };
    let tally = TallySink {
        inner: display,
        ..TallySink::default()
    };

    let res = dispatch_with(
        &backend,
        &peer,
        &files,
        &DispatchConfig { delay_ms },
        DispatchOptions {
            cancel: Some(&cancel),
            progress: Some(&tally),
        },
    )
    .await;
    // The session may have been updated even when the batch was interrupted.
    let saved = backend.save_session();
    if let Err(e) = &saved
        && !json
        && !events
    {
        eprintln!("warning: session not saved: {e}");
    }
    let res = finish_dispatch(res, saved, &tally)?;

    if json {
        println!(
            "{}",
            serde_json::to_string(&res)
                .map_err(|e| CliError::new("config.invalid", e.to_string()))?
        );
    } else if !events {
        println!(
            "\nCompleted sending {} images ({} sent, {} failed)",
            res.attempted, res.sent, res.failed
        );
    }
    Ok(())
}

fn map_core_err(e: tgdrop_core::Error) -> CliError {
    match e {
        tgdrop_core::Error::SessionMissing { path } => CliError::new(
            "session.missing",
            "not logged in, please run the 'login' command first",
        )
        .with_details(serde_json::json!({ "sessionPath": path })),
        tgdrop_core::Error::DirectoryUnavailable { message } => {
            CliError::retryable("directory.unavailable", message)
        }
        tgdrop_core::Error::TargetNotFound { target_id } => CliError::new(
            "target.not_found",
            format!("chat with ID {target_id} not found in your dialogs"),
        )
        .with_details(serde_json::json!({ "targetId": target_id })),
        tgdrop_core::Error::EmptyBatch => CliError::new("batch.empty", "no image files found"),
        tgdrop_core::Error::InvalidConfig { message } => CliError::new("config.invalid", message),
        tgdrop_core::Error::Telegram { message } => {
            CliError::retryable("telegram.unavailable", message)
        }
        tgdrop_core::Error::Auth { message } => CliError::new("auth.failed", message),
        tgdrop_core::Error::Cancelled => CliError::new("task.cancelled", "cancelled"),
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskrelay::channels::{Channel, CliChannel, TelegramChannel};
use taskrelay::config::RelayConfig;
use taskrelay::executor::{Executor, Outcome};
use taskrelay::gateway::{ChannelSink, Gateway};
use taskrelay::rules::HomeFiles;
use taskrelay::scheduler::Scheduler;
use taskrelay::workspace::Workspace;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env()?;

    eprintln!("🤖 Task Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workspace: {}", config.workspace_dir.display());
    eprintln!(
        "   Backend: {} {}",
        config.backend.program,
        config.backend.args.join(" ")
    );
    eprintln!(
        "   Timeouts: task {}s, idle worker {}s",
        config.scheduler.task_timeout.as_secs(),
        config.scheduler.idle_timeout.as_secs()
    );

    let workspace = Workspace::new(&config.workspace_dir);
    workspace.ensure_root().await?;
    let home = HomeFiles::new(&config.home_dir);

    initialize(&config, &home).await;

    // ── Channel ─────────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match &config.telegram_token {
        Some(token) => {
            let telegram = TelegramChannel::new(token.clone());
            if let Err(e) = telegram.health_check().await {
                tracing::warn!("Telegram health check failed, polling anyway: {e}");
            }
            eprintln!("   Channel: telegram");
            Arc::new(telegram)
        }
        None => {
            eprintln!("   Channel: cli (TELEGRAM_BOT_TOKEN not set)");
            eprintln!("   Type a task and press Enter. /help for commands.\n");
            Arc::new(CliChannel::new())
        }
    };

    // ── Scheduler + gateway ─────────────────────────────────────────────
    let sink = Arc::new(ChannelSink::new(
        Arc::clone(&channel),
        workspace.clone(),
        config.max_message_len,
    ));
    let scheduler = Scheduler::new(config.scheduler.clone(), config.backend.clone(), sink);
    let gateway = Gateway::new(
        scheduler.clone(),
        channel,
        workspace,
        home,
        config.max_message_len,
    );

    tracing::info!("🤖 Task relay started");
    gateway.run(shutdown_signal()).await?;

    // ── Shutdown: kill running backends, drop queued work ──────────────
    let stopped = scheduler.stop_all().await;
    if !stopped.is_empty() {
        tracing::info!(keys = stopped.len(), "Stopping outstanding tasks");
    }
    let drain = config.scheduler.kill_grace + Duration::from_secs(2);
    if !scheduler.wait_idle(drain).await {
        tracing::warn!("Some backends were still running at exit");
    }

    Ok(())
}

/// Run the backend once with INIT.md, if present, before accepting tasks.
async fn initialize(config: &RelayConfig, home: &HomeFiles) {
    let Some(prompt) = home.init_prompt().await else {
        tracing::info!(
            "No initialization file found at {}. Skipping initialization.",
            home.init_path().display()
        );
        return;
    };

    tracing::info!("Initializing with {}...", home.init_path().display());
    let executor = Executor::new(config.backend.clone(), &config.scheduler);
    let outcome = executor
        .run(&config.workspace_dir, &prompt, &CancellationToken::new())
        .await;

    match outcome {
        Outcome::Completed {
            stdout,
            exit_code: Some(0),
            ..
        } => {
            tracing::info!("Initialization successful.");
            if !stdout.is_empty() {
                tracing::info!("Initialization output: {stdout}");
            }
        }
        Outcome::Completed {
            stderr, exit_code, ..
        } => {
            tracing::error!(?exit_code, "Initialization failed");
            if !stderr.is_empty() {
                tracing::error!("Initialization error: {stderr}");
            }
        }
        other => tracing::error!(outcome = other.label(), "Initialization did not complete: {other:?}"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

//! Schedule host binary.
//!
//! Interactive mode reads protocol requests as newline-delimited JSON from
//! stdin and writes replies and status events to stdout. With `--resume`
//! (how the safety-net alarm launches it) the host runs headless and resumes
//! the persisted schedule. Whichever host owns the schedule also listens on
//! the control socket; a later invocation relays to it, and `--stop` sends
//! it a stop.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use anyhow::Context;
use clap::Parser;
use memorizer::alarm::create_alarm;
use memorizer::audio::playback::CpalPlayback;
use memorizer::config::LoggingConfig;
use memorizer::focus::LocalFocusArbiter;
use memorizer::host::contract::HostCommand;
use memorizer::host::control::{relay_control, send_control, serve_control};
use memorizer::host::router::ScheduleCommandRouter;
use memorizer::host::stdio::run_stdio_bridge;
use memorizer::schedule::JsonStateStore;
use memorizer::scheduler::{
    Collaborators, CoreSettings, HostMode, InstanceLease, InstanceLeaseConfig, LeaseDecision,
    LeaseHolder, SchedulerCore, SchedulerEvent, SchedulerHandle, SchedulerRunner,
    now_epoch_millis,
};
use memorizer::status::StatusSink;
use memorizer::status::{BroadcastSink, FanoutSink, TracingSink};
use memorizer::wake::{WakeGuard, create_wake_lock};
use memorizer::{MemorizerConfig, memorizer_dirs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How often a headless host checks whether the schedule is still active.
const HEADLESS_POLL: Duration = Duration::from_secs(5);

/// Memorizer schedule host.
#[derive(Parser)]
#[command(name = "memorizer-host", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resume the persisted schedule without a stdin protocol.
    #[arg(long, conflicts_with = "stop")]
    resume: bool,

    /// Stop the schedule, whether or not a host is running, and exit.
    #[arg(long)]
    stop: bool,

    /// Print the available output devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_devices {
        for name in CpalPlayback::list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(MemorizerConfig::default_config_path);
    let config = MemorizerConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let _log_guard = init_tracing(&config.logging);
    info!(resume = cli.resume, config = %config_path.display(), "memorizer-host starting");

    let mode = if cli.resume {
        HostMode::Headless
    } else {
        HostMode::Interactive
    };
    let socket = memorizer_dirs::control_socket();
    let mut lease = InstanceLease::new(
        uuid::Uuid::new_v4().to_string(),
        std::process::id(),
        mode,
        memorizer_dirs::lease_file(),
        InstanceLeaseConfig::default(),
    );
    if cfg!(unix) && !cli.stop {
        lease = lease.with_control_socket(socket.clone());
    }
    match lease.try_acquire_or_renew_at(now_epoch_millis())? {
        LeaseDecision::Owner { takeover } => {
            info!(instance = lease.instance_id(), takeover, "instance lease acquired");
        }
        LeaseDecision::Standby(holder) => return defer_to_owner(&cli, holder).await,
    }

    let settings = CoreSettings::from_config(&config)?;

    if cli.stop {
        let collaborators =
            build_collaborators(&config, cli.config.as_ref(), Box::new(TracingSink));
        let (events, _events_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut core = SchedulerCore::new(settings, collaborators, events);
        core.handle_at(SchedulerEvent::Stop, now_epoch_millis())?;
        tokio::task::spawn_blocking(move || drop(core)).await?;
        if let Err(e) = lease.release() {
            warn!("failed to release instance lease: {e}");
        }
        info!("schedule stopped; no host was running");
        return Ok(());
    }

    let notices = BroadcastSink::new(64);
    let collaborators = build_collaborators(
        &config,
        cli.config.as_ref(),
        Box::new(FanoutSink::new().with(TracingSink).with(notices.clone())),
    );
    let (runner, handle) = SchedulerRunner::new(settings, collaborators);
    let shutdown = CancellationToken::new();
    let scheduler = runner
        .with_tick(Duration::from_secs(
            config.schedule.countdown_interval_secs.max(1),
        ))
        .with_instance_lease(lease)
        .run(shutdown.clone());

    let router = ScheduleCommandRouter::new(handle.clone());
    let control = tokio::spawn({
        let router = router.clone();
        let notices = notices.clone();
        let shutdown = shutdown.child_token();
        async move {
            if let Err(e) = serve_control(&socket, router, notices, shutdown).await {
                warn!("control socket unavailable: {e}");
            }
        }
    });

    if cli.resume {
        tokio::select! {
            () = shutdown_signal() => info!("shutdown signal received"),
            () = until_inactive(&handle) => info!("schedule no longer active"),
        }
    } else {
        tokio::select! {
            () = shutdown_signal() => info!("shutdown signal received"),
            result = run_stdio_bridge(router, notices.subscribe()) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "stdio bridge exited with error");
                }
            }
        }
    }

    shutdown.cancel();
    if let Err(e) = control.await {
        warn!("control socket task ended abnormally: {e}");
    }
    if let Err(e) = scheduler.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    info!("memorizer-host shut down cleanly");
    Ok(())
}

/// Another live host drives the schedule; hand this invocation to it.
async fn defer_to_owner(cli: &Cli, holder: LeaseHolder) -> anyhow::Result<()> {
    info!(
        owner = %holder.instance_id,
        owner_pid = holder.pid,
        owner_mode = ?holder.mode,
        "schedule already driven by a live instance"
    );
    if cli.resume {
        return Ok(());
    }
    let Some(socket) = holder.control_socket else {
        anyhow::bail!(
            "another memorizer-host is running (pid {}) without a control socket",
            holder.pid
        );
    };

    if cli.stop {
        let reply = send_control(&socket, &HostCommand::Stop).await?;
        println!("{}", serde_json::to_string(&reply)?);
        if let Some(error) = reply.error {
            anyhow::bail!("running host refused to stop: {error}");
        }
        return Ok(());
    }

    info!(socket = %socket.display(), "relaying stdio to the running host");
    relay_control(&socket, tokio::io::stdin(), tokio::io::stdout()).await?;
    Ok(())
}

fn build_collaborators(
    config: &MemorizerConfig,
    config_path: Option<&PathBuf>,
    status: Box<dyn StatusSink>,
) -> Collaborators {
    Collaborators {
        store: Box::new(JsonStateStore::at_default_path()),
        playback: Box::new(CpalPlayback::new(&config.audio)),
        arbiter: Arc::new(LocalFocusArbiter::new()),
        alarm: create_alarm(
            &config.alarm,
            resume_command(config_path),
            memorizer_dirs::alarm_file(),
        ),
        wake: WakeGuard::new(
            create_wake_lock(config.wake.backend),
            config.wake.lease_ceiling(),
        ),
        status,
    }
}

/// Command the safety-net alarm runs to relaunch this host.
fn resume_command(config: Option<&PathBuf>) -> Vec<String> {
    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "memorizer-host".to_owned());
    let mut command = vec![exe, "--resume".to_owned()];
    if let Some(path) = config {
        command.push("--config".to_owned());
        command.push(path.to_string_lossy().into_owned());
    }
    command
}

/// Resolves once the schedule is neither playing nor waiting.
async fn until_inactive(handle: &SchedulerHandle) {
    let mut poll = tokio::time::interval(HEADLESS_POLL);
    loop {
        poll.tick().await;
        match handle.snapshot().await {
            Ok(snapshot) if snapshot.status.is_resumable() => {}
            Ok(snapshot) => {
                info!(status = ?snapshot.status, "nothing left to resume");
                return;
            }
            Err(e) => {
                warn!("scheduler unreachable: {e}");
                return;
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Stderr logging, plus a daily-rolling file when enabled.
///
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memorizer=info"))
    };
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    if !logging.file {
        tracing_subscriber::registry()
            .with(filter())
            .with(stderr_layer)
            .init();
        return None;
    }

    let log_dir = memorizer_dirs::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log directory {}: {e}", log_dir.display());
        tracing_subscriber::registry()
            .with(filter())
            .with(stderr_layer)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "memorizer-host.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter())
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

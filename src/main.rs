use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use harborview::app::{render, Dashboard};
use harborview::config::Config;
use harborview::host::{HostApi, HostClient};
use harborview::logging;
use harborview::model::{
    resolve_bindings, ActionKind, Domain, LogFilter, LogLevel, NetworkRateTracker, View, ViewState,
};
use harborview::sync::{Connector, WsConnector};

#[derive(Parser, Debug)]
#[command(name = "harborview", version, about = "Live dashboard for the containers on one Docker host")]
struct Cli {
    /// TOML config file; defaults apply when omitted.
    #[arg(long, short, env = "HARBORVIEW_CONFIG")]
    config: Option<PathBuf>,

    /// Host control service REST base, e.g. http://nas:5000/api
    #[arg(long, env = "HARBORVIEW_URL")]
    url: Option<String>,

    /// Push channel URL, e.g. ws://nas:5000/ws
    #[arg(long, env = "HARBORVIEW_WS_URL")]
    ws_url: Option<String>,

    /// Write logs here instead of stderr.
    #[arg(long, env = "HARBORVIEW_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info", env = "HARBORVIEW_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Keep a live status line until interrupted (default).
    Watch {
        /// overview, containers, services, system, or logs:<container>
        #[arg(long, default_value = "overview")]
        view: String,
        /// Poll logs periodically in a logs view.
        #[arg(long)]
        follow: bool,
        /// Poll only; do not open the push channel.
        #[arg(long)]
        no_push: bool,
    },
    /// Print containers and system metrics once.
    Status,
    /// Print managed services and the containers they are bound to.
    Services,
    /// Print the tail of a container's logs.
    Logs {
        id: String,
        #[arg(long, short = 'n')]
        lines: Option<usize>,
        /// Case-insensitive substring filter.
        #[arg(long)]
        grep: Option<String>,
        /// Minimum level: debug, info, warn, error.
        #[arg(long)]
        level: Option<String>,
    },
    /// Start, stop or restart one or more containers.
    Action {
        #[arg(value_enum)]
        action: ActionArg,
        #[arg(required = true)]
        targets: Vec<String>,
        /// Let the host run the bulk action instead of one call per target.
        #[arg(long)]
        server_side: bool,
    },
    /// Print the host's top processes.
    Processes,
    /// Check the control service and the components behind it. Exits
    /// non-zero when anything is down.
    Health,
    /// Print one container's details.
    Inspect {
        id: String,
        /// Live resource usage only.
        #[arg(long)]
        stats: bool,
        /// The container's own health check only.
        #[arg(long, conflicts_with = "stats")]
        health: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActionArg {
    Start,
    Stop,
    Restart,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Start => ActionKind::Start,
            ActionArg::Stop => ActionKind::Stop,
            ActionArg::Restart => ActionKind::Restart,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&cli.log_level, cli.log_file.as_deref());

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(url) = cli.url.clone() {
        config.host.base_url = url;
    }
    if let Some(ws_url) = cli.ws_url.clone() {
        config.host.ws_url = ws_url;
    }
    config.validate().context("validating configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .build()
        .context("creating tokio runtime")?;

    rt.block_on(run(cli.command, config))
}

async fn run(command: Option<Cmd>, config: Config) -> Result<()> {
    let client = HostClient::new(&config.host.base_url, config.request_timeout())
        .context("building HTTP client")?;
    let api: Arc<dyn HostApi> = Arc::new(client);
    let mut out = io::stdout();

    match command.unwrap_or(Cmd::Watch { view: "overview".into(), follow: false, no_push: false }) {
        Cmd::Watch { view, follow, no_push } => watch(config, api, &view, follow, no_push).await?,
        Cmd::Status => {
            let overview = api.containers_overview().await?;
            render::write_containers(&mut out, &overview.containers)?;
            let payload = api.system_metrics().await?;
            let snapshot = NetworkRateTracker::new().snapshot(payload, tokio::time::Instant::now());
            writeln!(out)?;
            render::write_system(&mut out, &snapshot)?;
        }
        Cmd::Services => {
            let mut services = config.service_catalog();
            if services.is_empty() {
                services = api.services().await?;
            }
            let containers = api.list_containers().await?;
            let bindings = resolve_bindings(&services, &containers);
            render::write_bindings(&mut out, &services, &bindings)?;
        }
        Cmd::Logs { id, lines, grep, level } => {
            let min_level = match level {
                Some(l) => match LogLevel::parse(&l) {
                    Some(parsed) => Some(parsed),
                    None => bail!("unknown log level {:?}", l),
                },
                None => None,
            };
            let filter = LogFilter { query: grep.unwrap_or_default(), min_level };
            let lines = api.container_logs(&id, lines.unwrap_or(config.logs.tail_lines)).await?;
            for line in lines.iter().filter(|l| filter.matches(l)) {
                writeln!(out, "{}", line)?;
            }
        }
        Cmd::Action { action, targets, server_side } => {
            let kind = ActionKind::from(action);
            let summary = if server_side {
                let stop_timeout = Some(Duration::from_secs(config.actions.stop_timeout_secs));
                api.bulk_action(kind, &targets, stop_timeout).await?
            } else {
                dispatch_through_engine(config, api, kind, targets).await?
            };
            render::write_summary(&mut out, &summary)?;
            if !summary.all_succeeded() {
                bail!("{} of {} targets failed", summary.total - summary.successful, summary.total);
            }
        }
        Cmd::Processes => {
            let processes = api.system_processes().await?;
            render::write_processes(&mut out, &processes)?;
        }
        Cmd::Health => {
            let health = api.health().await.context("host health check failed")?;
            render::write_health(&mut out, &health)?;
            if !health.is_healthy() {
                let down: Vec<&str> = health.unhealthy_components().map(|(name, _)| name).collect();
                if down.is_empty() {
                    bail!("host reports {:?}", health.status);
                }
                bail!("unhealthy: {}", down.join(", "));
            }
        }
        Cmd::Inspect { id, stats, health } => {
            if stats {
                let stats = api.container_stats(&id).await?;
                writeln!(out, "{}", id)?;
                render::write_stats(&mut out, &stats)?;
            } else if health {
                let check = api.container_health(&id).await?;
                let verdict = check.health_status.as_deref().unwrap_or(if check.is_healthy { "healthy" } else { "unhealthy" });
                writeln!(out, "{}: {} [{}], up {}", check.name, check.status, verdict, check.uptime.as_deref().unwrap_or("-"))?;
                if check.is_running && !check.is_healthy {
                    bail!("{} is unhealthy", check.name);
                }
            } else {
                let detail = api.container_detail(&id).await?;
                render::write_detail(&mut out, &detail)?;
            }
        }
    }
    Ok(())
}

async fn watch(config: Config, api: Arc<dyn HostApi>, view: &str, follow: bool, no_push: bool) -> Result<()> {
    let Some(view) = View::parse(view) else {
        bail!("unknown view {:?}", view);
    };
    let connector: Option<Arc<dyn Connector>> = if no_push {
        None
    } else {
        Some(Arc::new(WsConnector::new(config.host.ws_url.clone())))
    };
    let initial = ViewState { view, visible: true, live_follow: follow };
    let (mut dashboard, handle) = Dashboard::new(config, api, connector, initial);
    render::attach_status_line(&mut dashboard);

    let cancel = CancellationToken::new();
    watch_signals(cancel.clone())?;
    info!("watching; Ctrl-C to quit");
    dashboard.run(cancel).await;
    drop(handle);
    println!();
    Ok(())
}

/// Map SIGINT/SIGTERM onto `cancel`.
fn watch_signals(cancel: CancellationToken) -> Result<()> {
    let quit = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, quit.clone()).context("registering SIGINT")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, quit.clone()).context("registering SIGTERM")?;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        loop {
            tick.tick().await;
            if quit.load(Ordering::Relaxed) {
                info!("signal received; shutting down");
                cancel.cancel();
                break;
            }
        }
    });
    Ok(())
}

/// Run one dispatch through a short-lived engine. The container list is
/// fetched first so targets resolve and get their optimistic flip.
async fn dispatch_through_engine(
    config: Config,
    api: Arc<dyn HostApi>,
    kind: ActionKind,
    targets: Vec<String>,
) -> Result<harborview::model::BulkSummary> {
    let hidden = ViewState { view: View::Containers, visible: false, live_follow: false };
    let within = config.request_timeout();
    let (dashboard, handle) = Dashboard::new(config, api, None, hidden);
    let cancel = CancellationToken::new();
    let engine = tokio::spawn(dashboard.run(cancel.clone()));

    if !handle.refresh_and_wait(Domain::Containers, within).await? {
        warn!("container list not loaded in time; dispatching without it");
    }
    let result = handle.dispatch(kind, targets).await;
    handle.shutdown().await;
    if let Err(e) = engine.await {
        warn!(error = %e, "engine task ended abnormally");
    }
    Ok(result?)
}

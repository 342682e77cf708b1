//! Thin terminal rendering. Nothing in here feeds back into the store.

use std::io::{self, Write};

use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};

use crate::model::{
    format_uptime, BulkSummary, ContainerDetail, ContainerStats, ContainerSnapshot, HostHealth,
    ManagedService, NoticeLevel, ProcessInfo, ServiceBinding, SystemMetricsSnapshot,
};
use crate::store::{Change, Deferred, StoreState};

use super::Dashboard;

// --- Formatting helpers ---

/// Truncate to at most `max_len` characters (not bytes), appending "..."
/// if truncated.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else {
        let keep = max_len.saturating_sub(3);
        let truncated: String = s.chars().take(keep).collect();
        format!("{}...", truncated)
    }
}

pub fn format_bytes_rate(bytes_per_sec: f64) -> String {
    if bytes_per_sec > 1_048_576.0 {
        format!("{:.2} MB/s", bytes_per_sec / 1_048_576.0)
    } else if bytes_per_sec > 1024.0 {
        format!("{:.2} KB/s", bytes_per_sec / 1024.0)
    } else {
        format!("{:.0} B/s", bytes_per_sec)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    if bytes > 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes > 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else {
        format!("{} KB", bytes / 1024)
    }
}

pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(empty))
}

fn level_color(level: NoticeLevel) -> Color {
    match level {
        NoticeLevel::Info => Color::DarkGrey,
        NoticeLevel::Warning => Color::Yellow,
        NoticeLevel::Error => Color::Red,
    }
}

// --- Live status line ---

/// One-line summary of the store: counts, metrics, channel, staleness,
/// in-flight actions.
pub fn status_line(state: &StoreState) -> String {
    let overview = state.overview();
    let mut parts = vec![format!(
        "containers {} ({} up, {} down)",
        overview.total, overview.running, overview.stopped
    )];

    if let Some(sys) = state.system() {
        parts.push(format!(
            "cpu {:.0}% mem {:.0}% disk {:.0}% net in {} out {}",
            sys.cpu_percent,
            sys.memory_percent,
            sys.disk_percent,
            format_bytes_rate(sys.network_rx_rate),
            format_bytes_rate(sys.network_tx_rate),
        ));
    }

    parts.push(format!("push {}", state.channel()));

    let stale: Vec<&str> = state.stale_domains().map(|d| d.as_str()).collect();
    if !stale.is_empty() {
        parts.push(format!("stale: {}", stale.join(",")));
    }

    let pending = state.pending_actions().count();
    if pending > 0 {
        parts.push(format!("{} pending", pending));
    }
    let errors = state.action_errors().count();
    if errors > 0 {
        parts.push(format!("{} failed", errors));
    }
    parts.join(" | ")
}

/// Subscribe a renderer that redraws the status line after every change,
/// followed by the latest notice.
pub fn attach_status_line(dashboard: &mut Dashboard) {
    dashboard.subscribe(|change: &Change, state: &StoreState, _: &mut Deferred| {
        // Metric samples arrive in bursts of four per system update.
        if matches!(change, Change::Metrics(_)) {
            return;
        }
        if let Err(e) = draw_status_line(&mut io::stdout(), state) {
            tracing::debug!(error = %e, "status line draw failed");
        }
    });
}

fn draw_status_line(out: &mut impl Write, state: &StoreState) -> io::Result<()> {
    queue!(out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
    queue!(out, SetAttribute(Attribute::Bold), Print(status_line(state)), SetAttribute(Attribute::Reset))?;
    if let Some(notice) = state.latest_notice() {
        queue!(
            out,
            Print("  "),
            SetForegroundColor(level_color(notice.level)),
            Print(truncate_str(&notice.message, 80)),
            ResetColor
        )?;
    }
    out.flush()
}

// --- One-shot tables ---

pub fn write_containers(out: &mut impl Write, containers: &[ContainerSnapshot]) -> io::Result<()> {
    writeln!(out, "{:<14} {:<28} {:<12} {:>7} {:>10}  {}", "ID", "NAME", "STATUS", "CPU", "MEM", "UPTIME")?;
    for c in containers {
        let (cpu, mem) = match &c.stats {
            Some(s) => (format!("{:.1}%", s.cpu_percent), format_bytes(s.memory_usage_bytes())),
            None => ("-".to_string(), "-".to_string()),
        };
        let status = if c.is_running && !c.is_healthy {
            format!("{} (unhealthy)", c.status)
        } else {
            c.status.clone()
        };
        writeln!(
            out,
            "{:<14} {:<28} {:<12} {:>7} {:>10}  {}",
            truncate_str(&c.id, 12),
            truncate_str(&c.name, 28),
            truncate_str(&status, 12),
            cpu,
            mem,
            c.uptime.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

pub fn write_system(out: &mut impl Write, sys: &SystemMetricsSnapshot) -> io::Result<()> {
    writeln!(out, "{} ({}), up {}", sys.hostname, sys.platform, format_uptime(sys.uptime_secs))?;
    writeln!(out, "CPU  {} {:>5.1}%", progress_bar(sys.cpu_percent, 30), sys.cpu_percent)?;
    writeln!(out, "MEM  {} {:>5.1}%", progress_bar(sys.memory_percent, 30), sys.memory_percent)?;
    writeln!(out, "DISK {} {:>5.1}%", progress_bar(sys.disk_percent, 30), sys.disk_percent)?;
    Ok(())
}

pub fn write_bindings(
    out: &mut impl Write,
    services: &[ManagedService],
    bindings: &[ServiceBinding],
) -> io::Result<()> {
    writeln!(out, "{:<14} {:<18} {:<11} {:>6}  {:<24} {}", "KEY", "NAME", "CATEGORY", "PORT", "CONTAINER", "STATE")?;
    for svc in services {
        let binding = bindings.iter().find(|b| b.service_key == svc.key);
        let (container, state) = match binding {
            Some(b) if b.is_bound() => (
                b.container_name.clone().unwrap_or_default(),
                match (b.is_running, b.is_healthy) {
                    (true, true) => "running",
                    (true, false) => "unhealthy",
                    (false, _) => "stopped",
                },
            ),
            _ => ("-".to_string(), "missing"),
        };
        let port = svc.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{:<14} {:<18} {:<11} {:>6}  {:<24} {}{}",
            truncate_str(&svc.key, 14),
            truncate_str(&svc.name, 18),
            svc.category,
            port,
            truncate_str(&container, 24),
            state,
            if svc.vpn_required { " (vpn)" } else { "" },
        )?;
    }
    Ok(())
}

pub fn write_processes(out: &mut impl Write, processes: &[ProcessInfo]) -> io::Result<()> {
    writeln!(out, "{:>7} {:<24} {:>6} {:>6} {:>10}  {}", "PID", "NAME", "CPU%", "MEM%", "RSS", "STATUS")?;
    for p in processes {
        writeln!(
            out,
            "{:>7} {:<24} {:>6.1} {:>6.1} {:>10}  {}",
            p.pid,
            truncate_str(&p.name, 24),
            p.cpu_percent,
            p.memory_percent,
            format_bytes(p.memory_rss),
            p.status,
        )?;
    }
    Ok(())
}

pub fn write_health(out: &mut impl Write, health: &HostHealth) -> io::Result<()> {
    let verdict = if health.is_healthy() { "healthy" } else { "unhealthy" };
    write!(out, "host {}", verdict)?;
    if let Some(version) = &health.version {
        write!(out, ", version {}", version)?;
    }
    if let Some(up) = health.uptime_seconds {
        write!(out, ", up {}", format_uptime(up))?;
    }
    writeln!(out)?;
    for (name, component) in &health.services {
        let state = if component.is_healthy() { "ok" } else { "DOWN" };
        match &component.message {
            Some(message) => writeln!(out, "  {:<20} {:<5} {}", name, state, truncate_str(message, 60))?,
            None => writeln!(out, "  {:<20} {}", name, state)?,
        }
    }
    Ok(())
}

pub fn write_detail(out: &mut impl Write, detail: &ContainerDetail) -> io::Result<()> {
    let c = &detail.summary;
    writeln!(out, "{} ({})", c.name, c.id)?;
    writeln!(out, "  image     {}", c.image)?;
    let health = detail.health_status.as_deref().unwrap_or(if c.is_healthy { "healthy" } else { "unhealthy" });
    writeln!(out, "  status    {} [{}]", c.status, health)?;
    if let Some(created) = c.created {
        writeln!(out, "  created   {}", created.format("%Y-%m-%d %H:%M:%S"))?;
    }
    if let Some(started) = detail.started {
        writeln!(out, "  started   {}", started.format("%Y-%m-%d %H:%M:%S"))?;
    }
    writeln!(out, "  uptime    {}", c.uptime.as_deref().unwrap_or("-"))?;
    if let Some(policy) = &detail.restart_policy {
        writeln!(out, "  restart   {}", policy)?;
    }
    if let Some(command) = &detail.command {
        writeln!(out, "  command   {}", truncate_str(command, 60))?;
    }
    if !c.ports.is_empty() {
        writeln!(out, "  ports     {}", c.ports.join(", "))?;
    }
    if !detail.networks.is_empty() {
        writeln!(out, "  networks  {}", detail.networks.join(", "))?;
    }
    if let Some(stats) = &c.stats {
        write_stats(out, stats)?;
    }
    Ok(())
}

pub fn write_stats(out: &mut impl Write, stats: &ContainerStats) -> io::Result<()> {
    writeln!(out, "  cpu       {} {:>5.1}%", progress_bar(stats.cpu_percent, 20), stats.cpu_percent)?;
    let limit = if stats.memory_limit > 0 {
        format!(" / {}", format_bytes(stats.memory_limit))
    } else {
        String::new()
    };
    writeln!(
        out,
        "  memory    {} {:>5.1}%  {}{}",
        progress_bar(stats.memory_percent, 20),
        stats.memory_percent,
        format_bytes(stats.memory_usage_bytes()),
        limit,
    )?;
    writeln!(out, "  network   rx {}  tx {}", format_bytes(stats.network_rx), format_bytes(stats.network_tx))?;
    Ok(())
}

pub fn write_summary(out: &mut impl Write, summary: &BulkSummary) -> io::Result<()> {
    writeln!(out, "{}: {}/{} succeeded", summary.action, summary.successful, summary.total)?;
    for result in summary.failed() {
        writeln!(out, "  {} failed: {}", result.target, result.message)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, TargetOutcome};
    use crate::store::{SnapshotStore, StorePolicy};

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("ünïcödé-container", 8), "ünïcö...");
    }

    #[test]
    fn rates_pick_a_unit() {
        assert_eq!(format_bytes_rate(512.0), "512 B/s");
        assert_eq!(format_bytes_rate(2048.0), "2.00 KB/s");
        assert_eq!(format_bytes_rate(3.0 * 1_048_576.0), "3.00 MB/s");
    }

    #[test]
    fn progress_bar_clamps() {
        assert_eq!(progress_bar(50.0, 4), "[##..]");
        assert_eq!(progress_bar(150.0, 4), "[####]");
    }

    #[test]
    fn status_line_reports_counts_and_channel() {
        let mut store = SnapshotStore::new(StorePolicy::default());
        store.replace_containers(vec![ContainerSnapshot {
            id: "a".into(),
            name: "plex".into(),
            image: "plex".into(),
            status: "running".into(),
            is_running: true,
            is_healthy: true,
            created: None,
            uptime: None,
            ports: vec![],
            stats: None,
        }]);
        let line = status_line(store.state());
        assert!(line.starts_with("containers 1 (1 up, 0 down)"));
        assert!(line.contains("push disconnected"));
        assert!(!line.contains("stale"));
    }

    #[test]
    fn health_names_components_that_are_down() {
        let health: HostHealth = serde_json::from_value(serde_json::json!({
            "status": "healthy",
            "version": "1.0.0",
            "services": {
                "docker": {"healthy": false, "message": "permission denied on socket"},
                "ssh": {"healthy": true}
            }
        }))
        .unwrap();
        let mut out = Vec::new();
        write_health(&mut out, &health).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("host unhealthy, version 1.0.0"));
        assert!(text.contains("DOWN  permission denied on socket"));
        assert!(text.contains("ssh"));
    }

    #[test]
    fn stats_show_limit_only_when_known() {
        let mut stats = ContainerStats {
            cpu_percent: 12.5,
            memory_percent: 50.0,
            memory_usage: 512 * 1_048_576,
            memory_limit: 1_073_741_824 * 2,
            ..Default::default()
        };
        let mut out = Vec::new();
        write_stats(&mut out, &stats).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("12.5%"));
        assert!(text.contains("512.0 MB / 2.0 GB"));

        stats.memory_limit = 0;
        let mut out = Vec::new();
        write_stats(&mut out, &stats).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains(" / "));
    }

    #[test]
    fn summary_lists_failures() {
        let summary = BulkSummary::from_outcomes(
            ActionKind::Stop,
            vec![
                TargetOutcome { target: "a".into(), success: true, message: "ok".into() },
                TargetOutcome { target: "b".into(), success: false, message: "denied".into() },
            ],
        );
        let mut out = Vec::new();
        write_summary(&mut out, &summary).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("stop: 1/2 succeeded"));
        assert!(text.contains("b failed: denied"));
    }
}

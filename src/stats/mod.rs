//! Statistics over the probe history.
//!
//! Everything here is computed on demand from a snapshot of log entries and
//! live status. "now" is taken once per computation so that all windows of
//! one report agree.

mod charts;
mod events;

pub use charts::*;
pub use events::*;

use chrono::{DateTime, Duration as ChronoDuration, Months, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::db::LogEntry;
use crate::site::{Line, Site};
use crate::state::{LiveStatus, MonitorState};

/// Round to two decimal places, halves away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn mean(sum: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        round2(sum / count as f64)
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round2(part as f64 / total as f64 * 100.0)
    }
}

/// Reject entries that cannot be aggregated. A success without latency is
/// suspicious but kept.
pub(crate) fn validate(entry: &LogEntry) -> Result<(), String> {
    if entry.site_id.is_empty() {
        return Err("empty site id".to_string());
    }
    if let Some(latency) = entry.latency {
        if latency < 0.0 {
            return Err(format!(
                "negative latency {} for site {}",
                latency, entry.site_id
            ));
        }
    }
    if entry.success && entry.latency.is_none() {
        tracing::warn!(
            "Successful probe without latency for {} (entry {})",
            entry.site_id,
            entry.id
        );
    }
    Ok(())
}

/// Valid entries of one site, ordered by time then id.
pub(crate) fn site_entries<'a>(entries: &'a [LogEntry], site_id: &str) -> Vec<&'a LogEntry> {
    let mut out: Vec<&LogEntry> = entries
        .iter()
        .filter(|e| e.site_id == site_id)
        .filter(|e| match validate(e) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!("Skipping invalid log entry {}: {}", e.id, reason);
                false
            }
        })
        .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
    out
}

/// Running totals for one line, or for all lines together.
#[derive(Debug, Clone, Default)]
pub struct LineAggregate {
    pub total: u64,
    pub success: u64,
    latency_sum: f64,
    latency_count: u64,
    lowest: Option<f64>,
    highest: Option<f64>,
    jitter_sum: f64,
    jitter_count: u64,
    loss_sum: f64,
    loss_count: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub packets_duplicates: u64,
}

impl LineAggregate {
    fn add(&mut self, entry: &LogEntry) {
        self.total += 1;
        self.packets_sent += u64::from(entry.packets_sent);
        self.packets_recv += u64::from(entry.packets_recv);
        self.packets_duplicates += u64::from(entry.packets_duplicates);
        if let Some(loss) = entry.packet_loss {
            self.loss_sum += loss;
            self.loss_count += 1;
        }

        if !entry.success {
            return;
        }
        self.success += 1;
        if let Some(latency) = entry.latency {
            self.latency_sum += latency;
            self.latency_count += 1;
        }
        if let Some(min) = entry.min_latency {
            self.lowest = Some(self.lowest.map_or(min, |l| l.min(min)));
        }
        if let Some(max) = entry.max_latency {
            self.highest = Some(self.highest.map_or(max, |h| h.max(max)));
        }
        if let Some(jitter) = entry.jitter {
            self.jitter_sum += jitter;
            self.jitter_count += 1;
        }
    }

    pub fn uptime(&self) -> f64 {
        percent(self.success, self.total)
    }

    pub fn mean_latency(&self) -> f64 {
        mean(self.latency_sum, self.latency_count)
    }

    pub fn has_latency(&self) -> bool {
        self.latency_count > 0
    }

    /// Lowest per-probe minimum RTT.
    pub fn min_latency(&self) -> f64 {
        self.lowest.map(round2).unwrap_or(0.0)
    }

    /// Highest per-probe maximum RTT.
    pub fn max_latency(&self) -> f64 {
        self.highest.map(round2).unwrap_or(0.0)
    }

    pub fn mean_jitter(&self) -> f64 {
        mean(self.jitter_sum, self.jitter_count)
    }

    pub fn mean_packet_loss(&self) -> f64 {
        mean(self.loss_sum, self.loss_count)
    }
}

/// Aggregate over the entries of one time window.
#[derive(Debug, Clone, Default)]
pub struct TimeframeStats {
    pub overall: LineAggregate,
    pub primary: LineAggregate,
    pub secondary: LineAggregate,
    /// Average latencies of successful entries.
    latencies: Vec<f64>,
}

impl TimeframeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: &LogEntry) {
        self.overall.add(entry);
        match entry.line {
            Line::Primary => self.primary.add(entry),
            Line::Secondary => self.secondary.add(entry),
        }
        if entry.success {
            if let Some(latency) = entry.latency {
                self.latencies.push(latency);
            }
        }
    }

    pub fn line(&self, line: Line) -> &LineAggregate {
        match line {
            Line::Primary => &self.primary,
            Line::Secondary => &self.secondary,
        }
    }

    pub fn uptime(&self) -> f64 {
        self.overall.uptime()
    }

    pub fn mean_latency(&self) -> f64 {
        self.overall.mean_latency()
    }

    pub fn min_latency(&self) -> f64 {
        self.latencies.iter().copied().reduce(f64::min).map(round2).unwrap_or(0.0)
    }

    pub fn max_latency(&self) -> f64 {
        self.latencies.iter().copied().reduce(f64::max).map(round2).unwrap_or(0.0)
    }

    /// Counts of successful latencies per [`DISTRIBUTION_LABELS`] range.
    pub fn distribution(&self) -> [u64; 6] {
        let mut counts = [0u64; 6];
        for latency in &self.latencies {
            let slot = DISTRIBUTION_BOUNDS
                .iter()
                .position(|b| *latency <= *b)
                .unwrap_or(DISTRIBUTION_BOUNDS.len());
            counts[slot] += 1;
        }
        counts
    }
}

pub const DISTRIBUTION_BOUNDS: [f64; 5] = [10.0, 50.0, 100.0, 200.0, 500.0];
pub const DISTRIBUTION_LABELS: [&str; 6] =
    ["0-10ms", "10-50ms", "50-100ms", "100-200ms", "200-500ms", "500ms+"];

/// Full statistics record for one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteStatistics {
    pub site_id: String,

    pub current_latency_primary: Option<f64>,
    pub current_latency_secondary: Option<f64>,
    pub mean_latency_primary: f64,
    pub mean_latency_secondary: f64,
    pub min_latency_primary: f64,
    pub min_latency_secondary: f64,
    pub max_latency_primary: f64,
    pub max_latency_secondary: f64,
    pub jitter_primary: f64,
    pub jitter_secondary: f64,

    pub packets_received_primary: u64,
    pub packets_received_secondary: u64,
    pub total_packets_primary: u64,
    pub total_packets_secondary: u64,
    pub duplicate_packets_primary: u64,
    pub duplicate_packets_secondary: u64,
    pub packet_loss_primary: f64,
    pub packet_loss_secondary: f64,

    pub uptime_24h: f64,
    pub uptime_7d: f64,
    pub uptime_12m: f64,
    pub primary_uptime_24h: f64,
    pub secondary_uptime_24h: f64,
    pub primary_uptime_7d: f64,
    pub secondary_uptime_7d: f64,
    pub primary_uptime_12m: f64,
    pub secondary_uptime_12m: f64,

    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub success_rate: f64,
    pub total_checks: u64,

    /// 12 month uptime meets the line's target. `None` without data.
    pub sla_uptime_met_primary: Option<bool>,
    pub sla_uptime_met_secondary: Option<bool>,
    /// 12 month mean latency is within the line's limit. `None` when no
    /// limit is configured or there is no data.
    pub sla_latency_met_primary: Option<bool>,
    pub sla_latency_met_secondary: Option<bool>,
    /// 12 month uptime across all lines meets the site's combined target.
    pub sla_uptime_met_combined: Option<bool>,

    pub last_incident: String,
    pub last_incident_duration: String,
}

/// Statistics for a configured site, or `None` if the site is unknown.
pub fn calculate_site_statistics(state: &MonitorState, site_id: &str) -> Option<SiteStatistics> {
    let site = state.find_site(site_id)?;
    let entries = load_entries(state);
    let status = state.status(site_id);
    Some(compute_site_statistics(site, &entries, status.as_ref(), Utc::now()))
}

/// Full history from the store; a read failure degrades to no history.
pub(crate) fn load_entries(state: &MonitorState) -> Vec<LogEntry> {
    match state.get_all_logs() {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to read log history: {}", e);
            Vec::new()
        }
    }
}

pub fn compute_site_statistics(
    site: &Site,
    entries: &[LogEntry],
    status: Option<&LiveStatus>,
    now: DateTime<Utc>,
) -> SiteStatistics {
    let day = now - ChronoDuration::hours(24);
    let week = now - ChronoDuration::days(7);
    let year = now
        .checked_sub_months(Months::new(12))
        .unwrap_or(now - ChronoDuration::days(365));

    let mut all = TimeframeStats::new();
    let mut last_24h = TimeframeStats::new();
    let mut last_7d = TimeframeStats::new();
    let mut last_12m = TimeframeStats::new();

    let entries = site_entries(entries, &site.id);
    for entry in &entries {
        all.add(entry);
        if entry.timestamp > day {
            last_24h.add(entry);
        }
        if entry.timestamp > week {
            last_7d.add(entry);
        }
        if entry.timestamp > year {
            last_12m.add(entry);
        }
    }

    let (incident_ago, incident_duration) = match last_incident(&entries) {
        Some(incident) => (
            format_ago(now - incident.last_failure),
            format_duration(
                (incident.restored.unwrap_or(now) - incident.started)
                    .to_std()
                    .unwrap_or_default(),
            ),
        ),
        None => ("None".to_string(), "N/A".to_string()),
    };

    let sla_uptime = |line: Line| -> Option<bool> {
        let agg = last_12m.line(line);
        (agg.total > 0).then(|| agg.uptime() >= site.sla_uptime(line))
    };
    let sla_latency = |line: Line| -> Option<bool> {
        let limit = site.sla_max_latency(line)?;
        let agg = last_12m.line(line);
        agg.has_latency()
            .then(|| agg.mean_latency() <= f64::from(limit))
    };
    let dual = site.is_dual_line();

    SiteStatistics {
        site_id: site.id.clone(),

        current_latency_primary: status.and_then(|s| s.latency(Line::Primary)),
        current_latency_secondary: status.and_then(|s| s.latency(Line::Secondary)),
        mean_latency_primary: all.primary.mean_latency(),
        mean_latency_secondary: all.secondary.mean_latency(),
        min_latency_primary: all.primary.min_latency(),
        min_latency_secondary: all.secondary.min_latency(),
        max_latency_primary: all.primary.max_latency(),
        max_latency_secondary: all.secondary.max_latency(),
        jitter_primary: all.primary.mean_jitter(),
        jitter_secondary: all.secondary.mean_jitter(),

        packets_received_primary: all.primary.packets_recv,
        packets_received_secondary: all.secondary.packets_recv,
        total_packets_primary: all.primary.packets_sent,
        total_packets_secondary: all.secondary.packets_sent,
        duplicate_packets_primary: all.primary.packets_duplicates,
        duplicate_packets_secondary: all.secondary.packets_duplicates,
        packet_loss_primary: all.primary.mean_packet_loss(),
        packet_loss_secondary: all.secondary.mean_packet_loss(),

        uptime_24h: last_24h.uptime(),
        uptime_7d: last_7d.uptime(),
        uptime_12m: last_12m.uptime(),
        primary_uptime_24h: last_24h.primary.uptime(),
        secondary_uptime_24h: last_24h.secondary.uptime(),
        primary_uptime_7d: last_7d.primary.uptime(),
        secondary_uptime_7d: last_7d.secondary.uptime(),
        primary_uptime_12m: last_12m.primary.uptime(),
        secondary_uptime_12m: last_12m.secondary.uptime(),

        avg_latency: all.mean_latency(),
        min_latency: all.min_latency(),
        max_latency: all.max_latency(),
        success_rate: all.uptime(),
        total_checks: all.overall.total,

        sla_uptime_met_primary: sla_uptime(Line::Primary),
        sla_uptime_met_secondary: if dual { sla_uptime(Line::Secondary) } else { None },
        sla_latency_met_primary: sla_latency(Line::Primary),
        sla_latency_met_secondary: if dual { sla_latency(Line::Secondary) } else { None },
        sla_uptime_met_combined: (last_12m.overall.total > 0)
            .then(|| last_12m.uptime() >= site.combined_sla_uptime()),

        last_incident: incident_ago,
        last_incident_duration: incident_duration,
    }
}

/// System-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemOverview {
    pub total_sites: usize,
    pub online_sites: usize,
    pub offline_sites: usize,
    /// Dual-line sites with exactly one line up. Also counted as online.
    pub degraded_sites: usize,
    pub uptime_percentage: f64,
    pub total_checks: u64,
    pub uptime: String,
}

pub fn system_overview(state: &MonitorState) -> SystemOverview {
    let entries = load_entries(state);
    compute_overview(
        state.sites(),
        &state.status_snapshot(),
        &entries,
        state.total_checks(),
        state.uptime(),
    )
}

pub fn compute_overview(
    sites: &[Site],
    statuses: &[LiveStatus],
    entries: &[LogEntry],
    total_checks: u64,
    uptime: Duration,
) -> SystemOverview {
    let mut overview = SystemOverview {
        total_sites: sites.len(),
        total_checks,
        uptime: format_duration(uptime),
        ..Default::default()
    };

    for site in sites.iter().filter(|s| s.enabled) {
        let Some(status) = statuses.iter().find(|s| s.site_id == site.id) else {
            overview.offline_sites += 1;
            continue;
        };

        let primary = status.online(Line::Primary);
        let secondary = site.is_dual_line() && status.online(Line::Secondary);
        if site.is_dual_line() && primary != secondary {
            overview.online_sites += 1;
            overview.degraded_sites += 1;
        } else if primary {
            overview.online_sites += 1;
        } else {
            overview.offline_sites += 1;
        }
    }

    let successes = entries.iter().filter(|e| e.success).count() as u64;
    overview.uptime_percentage = percent(successes, entries.len() as u64);
    overview
}

/// Compact duration: `45s`, `12m`, `3h`, `3h 5m`, `2d`, `2d 4h`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (minutes, hours, days) = (secs / 60, secs / 3600, secs / 86_400);

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", minutes)
    } else if secs < 86_400 {
        match minutes % 60 {
            0 => format!("{}h", hours),
            m => format!("{}h {}m", hours, m),
        }
    } else {
        match hours % 24 {
            0 => format!("{}d", days),
            h => format!("{}d {}h", days, h),
        }
    }
}

/// Coarse age: `Nm ago`, `Nh ago` or `Nd ago`.
pub fn format_ago(age: ChronoDuration) -> String {
    if age < ChronoDuration::hours(1) {
        format!("{}m ago", age.num_minutes().max(0))
    } else if age < ChronoDuration::hours(24) {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}d ago", age.num_days())
    }
}

#[cfg(test)]
pub(crate) fn entry_at(
    site_id: &str,
    line: Line,
    success: bool,
    latency: Option<f64>,
    timestamp: DateTime<Utc>,
) -> LogEntry {
    let mut entry = crate::db::test_entry(site_id, line, success, latency);
    entry.timestamp = timestamp;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::test_site;

    #[test]
    fn test_round2() {
        assert_eq!(round2(85.714_285), 85.71);
        assert_eq!(round2(2.675_1), 2.68);
        assert_eq!(round2(-1.005_1), -1.01);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn test_empty_history_is_zero_valued() {
        let site = test_site("s1", Some("192.0.2.2"));
        let stats = compute_site_statistics(&site, &[], None, Utc::now());

        assert_eq!(stats.total_checks, 0);
        assert_eq!(stats.uptime_24h, 0.0);
        assert_eq!(stats.avg_latency, 0.0);
        assert_eq!(stats.min_latency, 0.0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.sla_uptime_met_primary, None);
        assert_eq!(stats.last_incident, "None");
        assert_eq!(stats.last_incident_duration, "N/A");
    }

    #[test]
    fn test_timeframes_over_thirty_days() {
        let now = Utc::now();
        let site = test_site("s1", None);

        // One probe per day for 30 days; days 2, 10 and 20 ago failed
        let entries: Vec<LogEntry> = (0..30)
            .map(|d| {
                let ok = ![2, 10, 20].contains(&d);
                entry_at(
                    "s1",
                    Line::Primary,
                    ok,
                    ok.then_some(10.0 + d as f64),
                    now - ChronoDuration::days(d) - ChronoDuration::hours(1),
                )
            })
            .collect();

        let stats = compute_site_statistics(&site, &entries, None, now);

        // 7d window holds days 0..=6: six of seven succeeded
        assert_eq!(stats.uptime_7d, 85.71);
        assert_eq!(stats.primary_uptime_7d, 85.71);
        assert_eq!(stats.uptime_24h, 100.0);
        assert_eq!(stats.uptime_12m, 90.0);
        assert_eq!(stats.success_rate, 90.0);
        assert_eq!(stats.total_checks, 30);
        assert_eq!(stats.secondary_uptime_7d, 0.0);

        assert_eq!(stats.min_latency, 10.0);
        assert_eq!(stats.max_latency, 39.0);
        // Mean of 10..=39 without 12, 20 and 30
        let expected = ((10..=39).sum::<i32>() - 12 - 20 - 30) as f64 / 27.0;
        assert_eq!(stats.avg_latency, round2(expected));

        // 99.9% target missed at 90%
        assert_eq!(stats.sla_uptime_met_primary, Some(false));
        assert_eq!(stats.sla_uptime_met_secondary, None);
        assert_eq!(stats.sla_uptime_met_combined, Some(false));
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let now = Utc::now();
        let site = test_site("s1", None);
        let entries = vec![
            entry_at("s1", Line::Primary, false, None, now - ChronoDuration::hours(24)),
            entry_at("s1", Line::Primary, true, Some(5.0), now - ChronoDuration::hours(23)),
        ];
        let stats = compute_site_statistics(&site, &entries, None, now);
        assert_eq!(stats.uptime_24h, 100.0);
        assert_eq!(stats.uptime_7d, 50.0);
    }

    #[test]
    fn test_invalid_entries_are_excluded() {
        let now = Utc::now();
        let site = test_site("s1", None);
        let mut negative = entry_at("s1", Line::Primary, true, Some(-3.0), now);
        negative.id = 7;
        let entries = vec![
            negative,
            entry_at("s1", Line::Primary, true, None, now),
            entry_at("s1", Line::Primary, true, Some(20.0), now),
            entry_at("other", Line::Primary, false, None, now),
        ];
        let stats = compute_site_statistics(&site, &entries, None, now);

        // The success without latency is counted, the negative one is not
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.success_rate, 100.0);
        assert_eq!(stats.avg_latency, 20.0);
    }

    #[test]
    fn test_per_line_details_and_sla() {
        let now = Utc::now();
        let mut site = test_site("s1", Some("192.0.2.2"));
        site.sla.primary.uptime = 50.0;
        site.sla.primary.max_latency = Some(15);
        site.sla.secondary.max_latency = Some(15);

        let mut p1 = entry_at("s1", Line::Primary, true, Some(10.0), now);
        p1.min_latency = Some(8.0);
        p1.max_latency = Some(14.0);
        p1.jitter = Some(1.0);
        let mut p2 = entry_at("s1", Line::Primary, true, Some(14.0), now);
        p2.min_latency = Some(9.0);
        p2.max_latency = Some(22.5);
        p2.jitter = Some(2.0);
        p2.packets_duplicates = 1;
        let s1 = entry_at("s1", Line::Secondary, true, Some(40.0), now);
        let s2 = entry_at("s1", Line::Secondary, false, None, now);

        let status = LiveStatus {
            site_id: "s1".to_string(),
            primary_latency: Some(14.0),
            ..Default::default()
        };
        let stats = compute_site_statistics(&site, &[p1, p2, s1, s2], Some(&status), now);

        assert_eq!(stats.current_latency_primary, Some(14.0));
        assert_eq!(stats.current_latency_secondary, None);
        assert_eq!(stats.mean_latency_primary, 12.0);
        assert_eq!(stats.min_latency_primary, 8.0);
        assert_eq!(stats.max_latency_primary, 22.5);
        assert_eq!(stats.jitter_primary, 1.5);
        assert_eq!(stats.duplicate_packets_primary, 1);
        assert_eq!(stats.total_packets_secondary, 6);
        assert_eq!(stats.packets_received_secondary, 3);
        assert_eq!(stats.packet_loss_secondary, 50.0);
        assert_eq!(stats.secondary_uptime_24h, 50.0);

        assert_eq!(stats.sla_uptime_met_primary, Some(true));
        assert_eq!(stats.sla_uptime_met_secondary, Some(false));
        assert_eq!(stats.sla_latency_met_primary, Some(true));
        assert_eq!(stats.sla_latency_met_secondary, Some(false));
    }

    #[test]
    fn test_last_incident_measured() {
        let now = Utc::now();
        let site = test_site("s1", None);
        let at = |mins: i64| now - ChronoDuration::minutes(mins);
        let entries = vec![
            entry_at("s1", Line::Primary, true, Some(1.0), at(200)),
            entry_at("s1", Line::Primary, false, None, at(180)),
            entry_at("s1", Line::Primary, false, None, at(170)),
            entry_at("s1", Line::Primary, true, Some(1.0), at(155)),
        ];
        let stats = compute_site_statistics(&site, &entries, None, now);
        assert_eq!(stats.last_incident, "2h ago");
        assert_eq!(stats.last_incident_duration, "25m");

        // Still failing: the incident runs until now
        let ongoing = vec![
            entry_at("s1", Line::Primary, true, Some(1.0), at(50)),
            entry_at("s1", Line::Primary, false, None, at(40)),
        ];
        let stats = compute_site_statistics(&site, &ongoing, None, now);
        assert_eq!(stats.last_incident, "40m ago");
        assert_eq!(stats.last_incident_duration, "40m");
    }

    #[test]
    fn test_overview_counts() {
        let mut disabled = test_site("off", None);
        disabled.enabled = false;
        let sites = vec![
            test_site("both", Some("192.0.2.2")),
            test_site("half", Some("192.0.2.2")),
            test_site("down", None),
            test_site("up", None),
            disabled,
        ];
        let status = |id: &str, p: bool, s: bool| LiveStatus {
            site_id: id.to_string(),
            primary_online: p,
            secondary_online: s,
            ..Default::default()
        };
        let statuses = vec![
            status("both", true, true),
            status("half", false, true),
            status("down", false, false),
            status("up", true, false),
            status("off", false, false),
        ];
        let now = Utc::now();
        let entries = vec![
            entry_at("both", Line::Primary, true, Some(1.0), now),
            entry_at("down", Line::Primary, false, None, now),
            entry_at("up", Line::Primary, true, Some(1.0), now),
        ];

        let overview = compute_overview(&sites, &statuses, &entries, 42, Duration::from_secs(3 * 3600 + 300));
        assert_eq!(overview.total_sites, 5);
        assert_eq!(overview.online_sites, 3);
        assert_eq!(overview.degraded_sites, 1);
        assert_eq!(overview.offline_sites, 1);
        assert_eq!(overview.uptime_percentage, 66.67);
        assert_eq!(overview.total_checks, 42);
        assert_eq!(overview.uptime, "3h 5m");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(12 * 60 + 30)), "12m");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600)), "3h");
        assert_eq!(format_duration(Duration::from_secs(3 * 3600 + 5 * 60)), "3h 5m");
        assert_eq!(format_duration(Duration::from_secs(2 * 86_400)), "2d");
        assert_eq!(format_duration(Duration::from_secs(2 * 86_400 + 4 * 3600)), "2d 4h");
    }

    #[test]
    fn test_format_ago() {
        assert_eq!(format_ago(ChronoDuration::minutes(5)), "5m ago");
        assert_eq!(format_ago(ChronoDuration::hours(3)), "3h ago");
        assert_eq!(format_ago(ChronoDuration::days(4)), "4d ago");
    }
}

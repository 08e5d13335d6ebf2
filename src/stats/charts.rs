//! Time-bucketed chart series.

use chrono::{DateTime, Datelike, Duration, DurationRound, Months, TimeZone, Utc};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

use super::{load_entries, site_entries, TimeframeStats, DISTRIBUTION_LABELS};
use crate::db::LogEntry;
use crate::site::Line;
use crate::state::MonitorState;

#[derive(Error, Debug, PartialEq)]
pub enum ChartError {
    #[error("site not found: {0}")]
    UnknownSite(String),
    #[error("unknown chart type: {0}")]
    UnknownType(String),
    #[error("unknown range: {0}")]
    UnknownRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Latency,
    Uptime,
    Sla,
    Yearly,
    Distribution,
    PacketLoss,
    Jitter,
    LatencyMinMax,
}

impl ChartType {
    fn default_range(&self) -> ChartRange {
        match self {
            ChartType::Uptime => ChartRange::Days7,
            ChartType::Sla | ChartType::Yearly => ChartRange::Months12,
            _ => ChartRange::Hours24,
        }
    }
}

impl FromStr for ChartType {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency" => Ok(ChartType::Latency),
            "uptime" => Ok(ChartType::Uptime),
            "sla" => Ok(ChartType::Sla),
            "yearly" => Ok(ChartType::Yearly),
            "distribution" => Ok(ChartType::Distribution),
            "packet_loss" => Ok(ChartType::PacketLoss),
            "jitter" => Ok(ChartType::Jitter),
            "latency_minmax" => Ok(ChartType::LatencyMinMax),
            other => Err(ChartError::UnknownType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRange {
    Hour1,
    Hours6,
    Hours24,
    Days7,
    Days30,
    Months12,
}

impl FromStr for ChartRange {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(ChartRange::Hour1),
            "6h" => Ok(ChartRange::Hours6),
            "24h" => Ok(ChartRange::Hours24),
            "7d" => Ok(ChartRange::Days7),
            "30d" => Ok(ChartRange::Days30),
            "12m" => Ok(ChartRange::Months12),
            other => Err(ChartError::UnknownRange(other.to_string())),
        }
    }
}

impl ChartRange {
    /// Start of the trailing window this range covers, ending at `now`.
    fn window_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ChartRange::Hour1 => now - Duration::hours(1),
            ChartRange::Hours6 => now - Duration::hours(6),
            ChartRange::Hours24 => now - Duration::hours(24),
            ChartRange::Days7 => now - Duration::days(7),
            ChartRange::Days30 => now - Duration::days(30),
            ChartRange::Months12 => now
                .checked_sub_months(Months::new(12))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bucket {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    label: String,
}

fn fixed_buckets(now: DateTime<Utc>, width: Duration, count: i32, label_fmt: &str) -> Vec<Bucket> {
    // Truncation to minute, hour or day always succeeds for UTC timestamps
    let current = now.duration_trunc(width).unwrap_or(now);
    (0..count)
        .rev()
        .map(|back| {
            let start = current - width * back;
            Bucket {
                start,
                end: start + width,
                label: start.format(label_fmt).to_string(),
            }
        })
        .collect()
}

fn month_buckets(now: DateTime<Utc>, label_fmt: &str) -> Vec<Bucket> {
    let first = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    (0..12u32)
        .rev()
        .map(|back| {
            let start = first - Months::new(back);
            Bucket {
                start,
                end: start + Months::new(1),
                label: start.format(label_fmt).to_string(),
            }
        })
        .collect()
}

fn buckets(range: ChartRange, now: DateTime<Utc>) -> Vec<Bucket> {
    match range {
        ChartRange::Hour1 => fixed_buckets(now, Duration::minutes(1), 60, "%H:%M"),
        ChartRange::Hours6 => fixed_buckets(now, Duration::minutes(5), 72, "%H:%M"),
        ChartRange::Hours24 => fixed_buckets(now, Duration::hours(1), 24, "%H:%M"),
        ChartRange::Days7 => fixed_buckets(now, Duration::days(1), 7, "%b %-d"),
        ChartRange::Days30 => fixed_buckets(now, Duration::days(1), 30, "%b %-d"),
        ChartRange::Months12 => month_buckets(now, "%b %Y"),
    }
}

/// Aggregate each bucket's entries. Entries outside every bucket are
/// ignored.
fn bucket_stats(buckets: &[Bucket], entries: &[&LogEntry]) -> Vec<TimeframeStats> {
    let mut stats = vec![TimeframeStats::new(); buckets.len()];
    for entry in entries {
        let idx = buckets.partition_point(|b| b.start <= entry.timestamp);
        if idx == 0 {
            continue;
        }
        if entry.timestamp < buckets[idx - 1].end {
            stats[idx - 1].add(entry);
        }
    }
    stats
}

/// One value per bucket for each line, plus an optional combined series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<Vec<f64>>,
    pub primary: Vec<f64>,
    pub secondary: Vec<f64>,
}

impl ChartSeries {
    fn build<F>(buckets: &[Bucket], stats: &[TimeframeStats], combined: bool, value: F) -> Self
    where
        F: Fn(&TimeframeStats, Option<Line>) -> f64,
    {
        Self {
            labels: buckets.iter().map(|b| b.label.clone()).collect(),
            combined: combined.then(|| stats.iter().map(|s| value(s, None)).collect()),
            primary: stats.iter().map(|s| value(s, Some(Line::Primary))).collect(),
            secondary: stats.iter().map(|s| value(s, Some(Line::Secondary))).collect(),
        }
    }
}

fn uptime_value(s: &TimeframeStats, line: Option<Line>) -> f64 {
    match line {
        Some(line) => s.line(line).uptime(),
        None => s.uptime(),
    }
}

fn latency_value(s: &TimeframeStats, line: Option<Line>) -> f64 {
    match line {
        Some(line) => s.line(line).mean_latency(),
        None => s.mean_latency(),
    }
}

fn loss_value(s: &TimeframeStats, line: Option<Line>) -> f64 {
    match line {
        Some(line) => s.line(line).mean_packet_loss(),
        None => s.overall.mean_packet_loss(),
    }
}

fn jitter_value(s: &TimeframeStats, line: Option<Line>) -> f64 {
    match line {
        Some(line) => s.line(line).mean_jitter(),
        None => s.overall.mean_jitter(),
    }
}

/// Output of a single chart request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Chart {
    Series(ChartSeries),
    MinMax { min: ChartSeries, max: ChartSeries },
}

/// Every chart of the site dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub latency: ChartSeries,
    pub uptime: ChartSeries,
    pub sla: ChartSeries,
    pub distribution: ChartSeries,
    pub yearly: ChartSeries,
    pub packet_loss: ChartSeries,
    pub jitter: ChartSeries,
    pub latency_min: ChartSeries,
    pub latency_max: ChartSeries,
}

pub fn generate_chart_data(state: &MonitorState, site_id: &str) -> Option<ChartData> {
    state.find_site(site_id)?;
    let entries = load_entries(state);
    Some(build_chart_data(&entries, site_id, Utc::now()))
}

pub fn build_chart_data(entries: &[LogEntry], site_id: &str, now: DateTime<Utc>) -> ChartData {
    let entries = site_entries(entries, site_id);
    let chart = |kind: ChartType| build_chart(&entries, kind, kind.default_range(), now);
    let series = |kind: ChartType| match chart(kind) {
        Chart::Series(s) => s,
        Chart::MinMax { min, .. } => min,
    };
    let (latency_min, latency_max) = match chart(ChartType::LatencyMinMax) {
        Chart::MinMax { min, max } => (min, max),
        Chart::Series(s) => (s.clone(), s),
    };

    ChartData {
        latency: series(ChartType::Latency),
        uptime: series(ChartType::Uptime),
        sla: series(ChartType::Sla),
        distribution: series(ChartType::Distribution),
        yearly: series(ChartType::Yearly),
        packet_loss: series(ChartType::PacketLoss),
        jitter: series(ChartType::Jitter),
        latency_min,
        latency_max,
    }
}

/// A single chart. An absent range selects the chart's usual one; SLA and
/// yearly charts always cover twelve months.
pub fn generate_chart_data_for_range(
    state: &MonitorState,
    site_id: &str,
    chart_type: &str,
    range: Option<&str>,
) -> Result<Chart, ChartError> {
    let kind: ChartType = chart_type.parse()?;
    let range = match range {
        Some(r) if !r.is_empty() => r.parse()?,
        _ => kind.default_range(),
    };
    if state.find_site(site_id).is_none() {
        return Err(ChartError::UnknownSite(site_id.to_string()));
    }

    let entries = load_entries(state);
    let entries = site_entries(&entries, site_id);
    Ok(build_chart(&entries, kind, range, Utc::now()))
}

fn build_chart(entries: &[&LogEntry], kind: ChartType, range: ChartRange, now: DateTime<Utc>) -> Chart {
    let range = match kind {
        ChartType::Sla | ChartType::Yearly => ChartRange::Months12,
        _ => range,
    };
    let mut slots = buckets(range, now);
    if kind == ChartType::Yearly {
        for b in &mut slots {
            b.label = b.start.format("%b").to_string();
        }
    }

    let stats = bucket_stats(&slots, entries);
    let series = match kind {
        ChartType::Distribution => distribution(entries, range.window_start(now), now),
        ChartType::Latency => ChartSeries::build(&slots, &stats, false, latency_value),
        ChartType::Uptime | ChartType::Yearly => ChartSeries::build(&slots, &stats, true, uptime_value),
        ChartType::Sla => ChartSeries::build(&slots, &stats, false, uptime_value),
        ChartType::PacketLoss => ChartSeries::build(&slots, &stats, false, loss_value),
        ChartType::Jitter => ChartSeries::build(&slots, &stats, false, jitter_value),
        ChartType::LatencyMinMax => {
            let min = ChartSeries::build(&slots, &stats, false, |s, line| match line {
                Some(line) => s.line(line).min_latency(),
                None => s.min_latency(),
            });
            let max = ChartSeries::build(&slots, &stats, false, |s, line| match line {
                Some(line) => s.line(line).max_latency(),
                None => s.max_latency(),
            });
            return Chart::MinMax { min, max };
        }
    };
    Chart::Series(series)
}

/// Latency histogram over `(since, now]`.
fn distribution(entries: &[&LogEntry], since: DateTime<Utc>, now: DateTime<Utc>) -> ChartSeries {
    let mut stats = TimeframeStats::new();
    let mut per_line = [TimeframeStats::new(), TimeframeStats::new()];
    for entry in entries {
        if entry.timestamp > since && entry.timestamp <= now {
            stats.add(entry);
            let idx = usize::from(entry.line == Line::Secondary);
            per_line[idx].add(entry);
        }
    }
    let as_values = |s: &TimeframeStats| s.distribution().iter().map(|c| *c as f64).collect::<Vec<_>>();

    ChartSeries {
        labels: DISTRIBUTION_LABELS.iter().map(|l| l.to_string()).collect(),
        combined: Some(as_values(&stats)),
        primary: as_values(&per_line[0]),
        secondary: as_values(&per_line[1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::test_site;
    use crate::state::test_state;
    use crate::stats::entry_at;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_parse_type_and_range() {
        assert_eq!("packet_loss".parse::<ChartType>(), Ok(ChartType::PacketLoss));
        assert_eq!("latency_minmax".parse::<ChartType>(), Ok(ChartType::LatencyMinMax));
        assert_eq!(
            "pie".parse::<ChartType>(),
            Err(ChartError::UnknownType("pie".to_string()))
        );
        assert_eq!("30d".parse::<ChartRange>(), Ok(ChartRange::Days30));
        assert!("2w".parse::<ChartRange>().is_err());
    }

    #[test]
    fn test_bucket_layout() {
        let hourly = buckets(ChartRange::Hours24, now());
        assert_eq!(hourly.len(), 24);
        assert_eq!(hourly[23].label, "12:00");
        assert_eq!(hourly[0].label, "13:00");
        assert_eq!(hourly[23].end, Utc.with_ymd_and_hms(2024, 3, 15, 13, 0, 0).unwrap());

        let five = buckets(ChartRange::Hours6, now());
        assert_eq!(five.len(), 72);
        assert_eq!(five[71].label, "12:30");

        let daily = buckets(ChartRange::Days7, now());
        assert_eq!(daily.len(), 7);
        assert_eq!(daily[0].label, "Mar 9");
        assert_eq!(daily[6].label, "Mar 15");

        let monthly = buckets(ChartRange::Months12, now());
        assert_eq!(monthly.len(), 12);
        assert_eq!(monthly[0].label, "Apr 2023");
        assert_eq!(monthly[11].label, "Mar 2024");
        assert_eq!(monthly[10].end, monthly[11].start);
    }

    #[test]
    fn test_hourly_latency_zero_filled() {
        let n = now();
        let entries = vec![
            entry_at("s1", Line::Primary, true, Some(10.0), n - Duration::minutes(20)),
            entry_at("s1", Line::Primary, true, Some(20.0), n - Duration::minutes(10)),
            entry_at("s1", Line::Secondary, true, Some(7.0), n - Duration::hours(2)),
            entry_at("s1", Line::Primary, true, Some(99.0), n - Duration::hours(30)),
        ];
        let entries = site_entries(&entries, "s1");

        let Chart::Series(series) = build_chart(&entries, ChartType::Latency, ChartRange::Hours24, n) else {
            panic!("expected a series");
        };
        assert_eq!(series.primary.len(), 24);
        assert_eq!(series.primary[23], 15.0);
        assert_eq!(series.secondary[21], 7.0);
        assert_eq!(series.primary.iter().filter(|v| **v != 0.0).count(), 1);
        assert!(series.combined.is_none());
    }

    #[test]
    fn test_uptime_and_yearly() {
        let n = now();
        let entries = vec![
            entry_at("s1", Line::Primary, true, Some(1.0), n - Duration::hours(1)),
            entry_at("s1", Line::Primary, false, None, n - Duration::hours(2)),
            entry_at("s1", Line::Secondary, true, Some(1.0), n - Duration::hours(3)),
            entry_at("s1", Line::Primary, true, Some(1.0), n - Duration::days(40)),
        ];
        let entries = site_entries(&entries, "s1");

        let Chart::Series(uptime) = build_chart(&entries, ChartType::Uptime, ChartRange::Days7, n) else {
            panic!("expected a series");
        };
        assert_eq!(uptime.combined.as_ref().unwrap()[6], 66.67);
        assert_eq!(uptime.primary[6], 50.0);
        assert_eq!(uptime.secondary[6], 100.0);
        assert_eq!(uptime.primary[0], 0.0);

        // Range is ignored for yearly charts
        let Chart::Series(yearly) = build_chart(&entries, ChartType::Yearly, ChartRange::Hour1, n) else {
            panic!("expected a series");
        };
        assert_eq!(yearly.labels.len(), 12);
        assert_eq!(yearly.labels[11], "Mar");
        assert_eq!(yearly.primary[11], 50.0);
        // 40 days back lands in February
        assert_eq!(yearly.labels[10], "Feb");
        assert_eq!(yearly.primary[10], 100.0);
        assert_eq!(yearly.primary[9], 0.0);
    }

    #[test]
    fn test_min_max_and_distribution() {
        let n = now();
        let mut a = entry_at("s1", Line::Primary, true, Some(8.0), n - Duration::minutes(5));
        a.min_latency = Some(4.0);
        a.max_latency = Some(30.0);
        let mut b = entry_at("s1", Line::Primary, true, Some(120.0), n - Duration::minutes(6));
        b.min_latency = Some(90.0);
        b.max_latency = Some(600.0);
        let c = entry_at("s1", Line::Secondary, true, Some(700.0), n - Duration::minutes(7));
        let entries = vec![a, b, c];
        let entries = site_entries(&entries, "s1");

        let Chart::MinMax { min, max } = build_chart(&entries, ChartType::LatencyMinMax, ChartRange::Hour1, n) else {
            panic!("expected min/max");
        };
        assert_eq!(min.primary[55], 0.0);
        assert_eq!(min.primary[54], 4.0);
        assert_eq!(max.primary[54], 30.0);
        assert_eq!(min.primary[53], 90.0);
        assert_eq!(max.primary[53], 600.0);
        assert_eq!(max.secondary[52], 700.0);

        let Chart::Series(dist) = build_chart(&entries, ChartType::Distribution, ChartRange::Hours24, n) else {
            panic!("expected a series");
        };
        assert_eq!(dist.labels[0], "0-10ms");
        assert_eq!(dist.combined, Some(vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0]));
        assert_eq!(dist.primary, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(dist.secondary, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_distribution_covers_trailing_range() {
        let n = now();
        let entries = vec![
            entry_at("s1", Line::Primary, true, Some(5.0), n - Duration::hours(23) - Duration::minutes(50)),
            entry_at("s1", Line::Primary, true, Some(5.0), n - Duration::hours(25)),
            entry_at("s1", Line::Secondary, true, Some(60.0), n),
        ];
        let entries = site_entries(&entries, "s1");

        let Chart::Series(dist) = build_chart(&entries, ChartType::Distribution, ChartRange::Hours24, n) else {
            panic!("expected a series");
        };
        assert_eq!(dist.primary, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(dist.secondary, vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(dist.combined, Some(vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0]));

        let Chart::Series(dist) = build_chart(&entries, ChartType::Distribution, ChartRange::Hour1, n) else {
            panic!("expected a series");
        };
        assert_eq!(dist.primary, vec![0.0; 6]);
    }

    #[test]
    fn test_empty_history_yields_zero_series() {
        let data = build_chart_data(&[], "s1", now());
        assert_eq!(data.latency.primary, vec![0.0; 24]);
        assert_eq!(data.uptime.combined, Some(vec![0.0; 7]));
        assert_eq!(data.sla.primary.len(), 12);
        assert_eq!(data.distribution.combined, Some(vec![0.0; 6]));
        assert_eq!(data.latency_max.secondary, vec![0.0; 24]);
    }

    #[test]
    fn test_range_request_errors() {
        let state = test_state(vec![test_site("s1", None)]);
        assert_eq!(
            generate_chart_data_for_range(&state, "s1", "bogus", None),
            Err(ChartError::UnknownType("bogus".to_string()))
        );
        assert_eq!(
            generate_chart_data_for_range(&state, "s1", "latency", Some("5y")),
            Err(ChartError::UnknownRange("5y".to_string()))
        );
        assert_eq!(
            generate_chart_data_for_range(&state, "ghost", "latency", None),
            Err(ChartError::UnknownSite("ghost".to_string()))
        );
        let Ok(Chart::Series(s)) = generate_chart_data_for_range(&state, "s1", "jitter", Some("6h")) else {
            panic!("expected a series");
        };
        assert_eq!(s.labels.len(), 72);
        assert!(generate_chart_data(&state, "ghost").is_none());
    }
}

//! In-process metrics, labelled by site and line.
//!
//! The pipeline and the breaker listener write here; the HTTP layer reads a
//! [`MetricsSnapshot`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::breaker::BreakerTransition;
use crate::probe::ProbeResult;
use crate::site::Line;

/// Upper bounds, in milliseconds, shared by the latency and jitter histograms.
pub const HISTOGRAM_BOUNDS_MS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

type LineKey = (String, Line);

#[derive(Debug, Clone, Default)]
struct Histogram {
    /// One slot per bound plus the overflow slot.
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        if self.counts.is_empty() {
            self.counts = vec![0; HISTOGRAM_BOUNDS_MS.len() + 1];
        }
        let slot = HISTOGRAM_BOUNDS_MS
            .iter()
            .position(|b| value <= *b)
            .unwrap_or(HISTOGRAM_BOUNDS_MS.len());
        self.counts[slot] += 1;
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Packets {
    sent: u64,
    received: u64,
    duplicates: u64,
}

#[derive(Debug, Default)]
struct Inner {
    checks: BTreeMap<(String, Line, bool), u64>,
    isolated: BTreeMap<LineKey, u64>,
    packets: BTreeMap<LineKey, Packets>,
    packet_loss: BTreeMap<LineKey, f64>,
    line_online: BTreeMap<LineKey, f64>,
    both_online: BTreeMap<String, f64>,
    breaker_state: BTreeMap<LineKey, f64>,
    breaker_trips: BTreeMap<(String, Line, &'static str), u64>,
    latency: BTreeMap<LineKey, Histogram>,
    jitter: BTreeMap<LineKey, Histogram>,
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count a probe outcome and update the per-line gauges.
    pub fn record_probe(&self, result: &ProbeResult) {
        let key = (result.site_id.clone(), result.line);
        let mut inner = self.lock();

        *inner
            .checks
            .entry((result.site_id.clone(), result.line, result.success))
            .or_default() += 1;
        if result.isolated {
            *inner.isolated.entry(key.clone()).or_default() += 1;
        }

        let packets = inner.packets.entry(key.clone()).or_default();
        packets.sent += u64::from(result.packets_sent);
        packets.received += u64::from(result.packets_recv);
        packets.duplicates += u64::from(result.packets_duplicates);

        if let Some(loss) = result.packet_loss {
            inner.packet_loss.insert(key.clone(), loss);
        }

        if result.success {
            if let Some(latency) = result.latency {
                inner.latency.entry(key.clone()).or_default().observe(latency);
            }
            if let Some(jitter) = result.jitter {
                inner.jitter.entry(key.clone()).or_default().observe(jitter);
            }
        }

        inner
            .line_online
            .insert(key, if result.success { 1.0 } else { 0.0 });
    }

    pub fn set_both_online(&self, site_id: &str, online: bool) {
        self.lock()
            .both_online
            .insert(site_id.to_string(), if online { 1.0 } else { 0.0 });
    }

    pub fn record_breaker_transition(&self, t: &BreakerTransition) {
        let mut inner = self.lock();
        inner
            .breaker_state
            .insert((t.site_id.clone(), t.line), t.to.gauge_value());
        *inner
            .breaker_trips
            .entry((t.site_id.clone(), t.line, t.to.as_str()))
            .or_default() += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();

        let line_gauges = |map: &BTreeMap<LineKey, f64>| -> Vec<LineGauge> {
            map.iter()
                .map(|((site_id, line), value)| LineGauge {
                    site_id: site_id.clone(),
                    line: *line,
                    value: *value,
                })
                .collect()
        };
        let histograms = |map: &BTreeMap<LineKey, Histogram>| -> Vec<HistogramSnapshot> {
            map.iter()
                .map(|((site_id, line), h)| HistogramSnapshot {
                    site_id: site_id.clone(),
                    line: *line,
                    buckets: HISTOGRAM_BOUNDS_MS
                        .iter()
                        .zip(h.counts.iter())
                        .scan(0u64, |acc, (bound, c)| {
                            *acc += c;
                            Some(Bucket {
                                le: *bound,
                                count: *acc,
                            })
                        })
                        .collect(),
                    sum: h.sum,
                    count: h.count,
                })
                .collect()
        };

        MetricsSnapshot {
            checks: inner
                .checks
                .iter()
                .map(|((site_id, line, success), count)| CheckCounter {
                    site_id: site_id.clone(),
                    line: *line,
                    success: *success,
                    count: *count,
                })
                .collect(),
            isolated: inner
                .isolated
                .iter()
                .map(|((site_id, line), count)| LineCounter {
                    site_id: site_id.clone(),
                    line: *line,
                    count: *count,
                })
                .collect(),
            packets: inner
                .packets
                .iter()
                .map(|((site_id, line), p)| PacketCounter {
                    site_id: site_id.clone(),
                    line: *line,
                    sent: p.sent,
                    received: p.received,
                    duplicates: p.duplicates,
                })
                .collect(),
            packet_loss: line_gauges(&inner.packet_loss),
            line_online: line_gauges(&inner.line_online),
            both_online: inner
                .both_online
                .iter()
                .map(|(site_id, value)| SiteGauge {
                    site_id: site_id.clone(),
                    value: *value,
                })
                .collect(),
            breaker_state: line_gauges(&inner.breaker_state),
            breaker_trips: inner
                .breaker_trips
                .iter()
                .map(|((site_id, line, to), count)| TripCounter {
                    site_id: site_id.clone(),
                    line: *line,
                    to: to.to_string(),
                    count: *count,
                })
                .collect(),
            latency_ms: histograms(&inner.latency),
            jitter_ms: histograms(&inner.jitter),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckCounter {
    pub site_id: String,
    pub line: Line,
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineCounter {
    pub site_id: String,
    pub line: Line,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketCounter {
    pub site_id: String,
    pub line: Line,
    pub sent: u64,
    pub received: u64,
    pub duplicates: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineGauge {
    pub site_id: String,
    pub line: Line,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteGauge {
    pub site_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripCounter {
    pub site_id: String,
    pub line: Line,
    pub to: String,
    pub count: u64,
}

/// Cumulative bucket: observations less than or equal to `le`.
#[derive(Debug, Clone, Serialize)]
pub struct Bucket {
    pub le: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub site_id: String,
    pub line: Line,
    pub buckets: Vec<Bucket>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub checks: Vec<CheckCounter>,
    pub isolated: Vec<LineCounter>,
    pub packets: Vec<PacketCounter>,
    pub packet_loss: Vec<LineGauge>,
    pub line_online: Vec<LineGauge>,
    pub both_online: Vec<SiteGauge>,
    pub breaker_state: Vec<LineGauge>,
    pub breaker_trips: Vec<TripCounter>,
    pub latency_ms: Vec<HistogramSnapshot>,
    pub jitter_ms: Vec<HistogramSnapshot>,
}

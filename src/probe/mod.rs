//! Probe module for line reachability.
//!
//! A [`Prober`] sends a round of echo requests to one address. The
//! [`ProbeExecutor`] runs it behind the line's circuit breaker and turns the
//! outcome into a [`ProbeResult`].

mod ping;

pub use ping::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::breaker::{BreakerError, BreakerRegistry};
use crate::site::Line;

/// Extra time granted to a prober past its own timeout before the executor
/// gives up on it.
const TIMEOUT_GRACE: Duration = Duration::from_millis(500);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    /// Packets went out but none came back.
    #[error("no packets received")]
    NoReply(PingStats),
}

/// Outcome of one round of echo requests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub duplicates: u32,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    /// Population standard deviation of the round-trip times.
    pub stddev_rtt: Duration,
    /// Percentage of sent packets that got no reply.
    pub packet_loss: f64,
}

impl PingStats {
    pub fn from_rtts(sent: u32, rtts: &[Duration], duplicates: u32) -> Self {
        let received = rtts.len() as u32;
        let packet_loss = if sent > 0 {
            f64::from(sent.saturating_sub(received)) / f64::from(sent) * 100.0
        } else {
            0.0
        };

        if rtts.is_empty() {
            return Self {
                sent,
                duplicates,
                packet_loss,
                ..Default::default()
            };
        }

        let secs: Vec<f64> = rtts.iter().map(Duration::as_secs_f64).collect();
        let mean = secs.iter().sum::<f64>() / secs.len() as f64;
        let variance = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / secs.len() as f64;

        Self {
            sent,
            received,
            duplicates,
            min_rtt: rtts.iter().copied().min().unwrap_or_default(),
            avg_rtt: Duration::from_secs_f64(mean),
            max_rtt: rtts.iter().copied().max().unwrap_or_default(),
            stddev_rtt: Duration::from_secs_f64(variance.sqrt()),
            packet_loss,
        }
    }
}

/// How many packets to send, how big, and how long to wait overall.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOptions {
    pub count: u32,
    /// Payload size in bytes.
    pub size: usize,
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            count: 3,
            size: 56,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Something that can ping an address.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, options: &ProbeOptions) -> Result<PingStats, ProbeError>;
}

/// One probe of one line, ready for the result pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub site_id: String,
    pub address: String,
    pub line: Line,
    pub success: bool,
    /// The breaker refused the attempt; nothing was sent.
    pub isolated: bool,
    /// Average round-trip time in milliseconds.
    pub latency: Option<f64>,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    /// Standard deviation of round-trip times in milliseconds.
    pub jitter: Option<f64>,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub packets_duplicates: u32,
    pub packet_loss: Option<f64>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn new(site_id: &str, line: Line, address: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            address: address.to_string(),
            line,
            success: false,
            isolated: false,
            latency: None,
            min_latency: None,
            max_latency: None,
            jitter: None,
            packets_sent: 0,
            packets_recv: 0,
            packets_duplicates: 0,
            packet_loss: None,
            error: String::new(),
            timestamp: Utc::now(),
        }
    }

    fn apply_stats(&mut self, stats: &PingStats) {
        self.packets_sent = stats.sent;
        self.packets_recv = stats.received;
        self.packets_duplicates = stats.duplicates;
        if stats.sent > 0 {
            self.packet_loss = Some(stats.packet_loss);
        }

        if stats.received > 0 {
            self.success = true;
            self.error.clear();
            self.latency = Some(millis(stats.avg_rtt));
            self.min_latency = Some(millis(stats.min_rtt));
            self.max_latency = Some(millis(stats.max_rtt));
            self.jitter = Some(millis(stats.stddev_rtt));
        }
    }

    fn apply_error(&mut self, err: &ProbeError) {
        if let ProbeError::NoReply(stats) = err {
            self.apply_stats(stats);
        }
        self.success = false;
        self.latency = None;
        self.error = err.to_string();
    }
}

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Runs probes for the scheduler and for manual tests.
pub struct ProbeExecutor {
    prober: Arc<dyn Prober>,
    options: ProbeOptions,
    breakers: Arc<BreakerRegistry>,
}

impl ProbeExecutor {
    pub fn new(prober: Arc<dyn Prober>, options: ProbeOptions, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            prober,
            options,
            breakers,
        }
    }

    /// Probe a line through its circuit breaker. Never fails: every outcome,
    /// including a refusal, becomes a result.
    pub async fn probe_line(&self, site_id: &str, line: Line, address: &str) -> ProbeResult {
        let mut result = ProbeResult::new(site_id, line, address);
        let breaker = self.breakers.get(site_id, line);

        match breaker.call(|| self.run(address)).await {
            Ok(stats) => result.apply_stats(&stats),
            Err(err @ BreakerError::Open { .. }) => {
                result.isolated = true;
                result.error = format!("circuit breaker open: {}", err);
                tracing::warn!("Probe of {} ({}) blocked: {}", site_id, line, err);
            }
            Err(BreakerError::Inner(err)) => {
                tracing::debug!("Probe of {} ({}) at {} failed: {}", site_id, line, address, err);
                result.apply_error(&err);
            }
        }

        result
    }

    /// Probe an address directly, ignoring the breaker.
    pub async fn probe_unguarded(&self, site_id: &str, line: Line, address: &str) -> ProbeResult {
        let mut result = ProbeResult::new(site_id, line, address);
        match self.run(address).await {
            Ok(stats) => result.apply_stats(&stats),
            Err(err) => result.apply_error(&err),
        }
        result
    }

    async fn run(&self, address: &str) -> Result<PingStats, ProbeError> {
        let limit = self.options.timeout + TIMEOUT_GRACE;
        let stats = tokio::time::timeout(limit, self.prober.probe(address, &self.options))
            .await
            .map_err(|_| ProbeError::Timeout(self.options.timeout))??;

        if stats.received == 0 {
            return Err(ProbeError::NoReply(stats));
        }
        Ok(stats)
    }
}

#[cfg(test)]
pub(crate) fn test_result(site_id: &str, line: Line, success: bool, latency: Option<f64>) -> ProbeResult {
    let mut result = ProbeResult::new(site_id, line, "192.0.2.1");
    result.success = success;
    result.latency = latency;
    result.packets_sent = 3;
    result.packets_recv = if success { 3 } else { 0 };
    result.packet_loss = Some(if success { 0.0 } else { 100.0 });
    if success {
        result.min_latency = latency;
        result.max_latency = latency;
        result.jitter = Some(0.5);
    } else {
        result.error = "no packets received".to_string();
    }
    result
}

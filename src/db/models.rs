//! Log record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::ProbeResult;
use crate::site::Line;

/// A persisted probe outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Assigned by the store on append; zero before that.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub site_id: String,
    pub site_name: String,
    pub line: Line,
    pub ip: String,
    pub success: bool,
    /// The circuit breaker refused the attempt; no packets were sent.
    #[serde(default)]
    pub isolated: bool,
    /// Average round-trip time in milliseconds.
    pub latency: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub packets_sent: u32,
    pub packets_recv: u32,
    pub packets_duplicates: u32,
    pub packet_loss: Option<f64>,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub jitter: Option<f64>,
}

impl LogEntry {
    pub fn from_probe(result: &ProbeResult, site_name: &str) -> Self {
        Self {
            id: 0,
            timestamp: result.timestamp,
            site_id: result.site_id.clone(),
            site_name: site_name.to_string(),
            line: result.line,
            ip: result.address.clone(),
            success: result.success,
            isolated: result.isolated,
            latency: result.latency,
            error: result.error.clone(),
            packets_sent: result.packets_sent,
            packets_recv: result.packets_recv,
            packets_duplicates: result.packets_duplicates,
            packet_loss: result.packet_loss,
            min_latency: result.min_latency,
            max_latency: result.max_latency,
            jitter: result.jitter,
        }
    }
}

/// Filter for log queries. Both filters are optional and combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub site_id: Option<String>,
    pub success: Option<bool>,
    /// Maximum number of entries; zero or negative means unbounded.
    pub limit: i64,
}

impl LogQuery {
    pub fn new(site_id: Option<String>, success: Option<bool>, limit: i64) -> Self {
        Self {
            site_id,
            success,
            limit,
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(site_id) = &self.site_id {
            if &entry.site_id != site_id {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        true
    }

    pub fn max_len(&self) -> Option<usize> {
        if self.limit > 0 {
            Some(self.limit as usize)
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) fn test_entry(site_id: &str, line: Line, success: bool, latency: Option<f64>) -> LogEntry {
    LogEntry {
        id: 0,
        timestamp: Utc::now(),
        site_id: site_id.to_string(),
        site_name: format!("Site {}", site_id),
        line,
        ip: "192.0.2.1".to_string(),
        success,
        isolated: false,
        latency,
        error: if success { String::new() } else { "no packets received".to_string() },
        packets_sent: 3,
        packets_recv: if success { 3 } else { 0 },
        packets_duplicates: 0,
        packet_loss: Some(if success { 0.0 } else { 100.0 }),
        min_latency: latency,
        max_latency: latency,
        jitter: latency.map(|_| 0.5),
    }
}

//! Shared monitoring state: the site list, live status per site, the log
//! store and the check counter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::db::{LogEntry, LogQuery, LogStore, StoreError};
use crate::metrics::MetricsRegistry;
use crate::probe::ProbeResult;
use crate::site::{Line, Site};

/// Latest known condition of a site's lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveStatus {
    pub site_id: String,
    pub primary_online: bool,
    pub secondary_online: bool,
    /// Every line the site has is online.
    pub both_online: bool,
    pub primary_latency: Option<f64>,
    pub secondary_latency: Option<f64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub primary_error: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secondary_error: String,
    pub last_check: Option<DateTime<Utc>>,
}

impl LiveStatus {
    pub fn new(site_id: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            ..Default::default()
        }
    }

    pub fn online(&self, line: Line) -> bool {
        match line {
            Line::Primary => self.primary_online,
            Line::Secondary => self.secondary_online,
        }
    }

    pub fn latency(&self, line: Line) -> Option<f64> {
        match line {
            Line::Primary => self.primary_latency,
            Line::Secondary => self.secondary_latency,
        }
    }

    /// Fold a probe result in and recompute the combined flag.
    pub fn apply(&mut self, result: &ProbeResult, dual_line: bool) {
        let (online, latency, error) = match result.line {
            Line::Primary => (
                &mut self.primary_online,
                &mut self.primary_latency,
                &mut self.primary_error,
            ),
            Line::Secondary => (
                &mut self.secondary_online,
                &mut self.secondary_latency,
                &mut self.secondary_error,
            ),
        };

        *online = result.success;
        if result.success {
            *latency = result.latency;
            error.clear();
        } else {
            *latency = None;
            *error = result.error.clone();
        }

        self.both_online = if dual_line {
            self.primary_online && self.secondary_online
        } else {
            self.primary_online
        };
        self.last_check = Some(result.timestamp);
    }
}

/// Everything the engine shares between tasks. Built once at startup and
/// passed around in an `Arc`.
pub struct MonitorState {
    sites: Vec<Site>,
    status: RwLock<HashMap<String, LiveStatus>>,
    store: Arc<dyn LogStore>,
    metrics: Arc<MetricsRegistry>,
    total_checks: AtomicU64,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl MonitorState {
    pub fn new(sites: Vec<Site>, store: Arc<dyn LogStore>, metrics: Arc<MetricsRegistry>) -> Self {
        let status = sites
            .iter()
            .map(|s| (s.id.clone(), LiveStatus::new(&s.id)))
            .collect();

        Self {
            sites,
            status: RwLock::new(status),
            store,
            metrics,
            total_checks: AtomicU64::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn find_site(&self, site_id: &str) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == site_id)
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::Relaxed)
    }

    pub(crate) fn increment_checks(&self) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Apply a result to the site's live status. Returns the new combined
    /// flag, or `None` for a site that is not configured.
    pub(crate) fn update_status(&self, result: &ProbeResult) -> Option<bool> {
        let dual_line = self.find_site(&result.site_id)?.is_dual_line();
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        let entry = status.get_mut(&result.site_id)?;
        entry.apply(result, dual_line);
        Some(entry.both_online)
    }

    pub fn status(&self, site_id: &str) -> Option<LiveStatus> {
        let status = self.status.read().unwrap_or_else(|e| e.into_inner());
        status.get(site_id).cloned()
    }

    /// Copy of every site's status, in site order.
    pub fn status_snapshot(&self) -> Vec<LiveStatus> {
        let status = self.status.read().unwrap_or_else(|e| e.into_inner());
        self.sites
            .iter()
            .filter_map(|s| status.get(&s.id).cloned())
            .collect()
    }

    pub fn get_filtered_logs(
        &self,
        site_id: Option<&str>,
        success: Option<bool>,
        limit: i64,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let query = LogQuery::new(site_id.map(str::to_string), success, limit);
        let logs = self.store.query(&query)?;
        tracing::debug!("Retrieved {} filtered logs", logs.len());
        Ok(logs)
    }

    pub fn get_all_logs(&self) -> Result<Vec<LogEntry>, StoreError> {
        self.store.all_entries()
    }
}

#[cfg(test)]
pub(crate) fn test_state(sites: Vec<Site>) -> Arc<MonitorState> {
    let store = Arc::new(crate::db::RingBufferStore::new(1000));
    Arc::new(MonitorState::new(sites, store, Arc::new(MetricsRegistry::new())))
}

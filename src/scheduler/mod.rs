//! Scheduler module: one probe loop per enabled site feeding the result
//! pipeline.

mod pipeline;

pub use pipeline::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::probe::{ProbeExecutor, ProbeResult};
use crate::site::{Line, Site};
use crate::state::MonitorState;

/// Outcome of a manual probe of one line.
#[derive(Debug, Clone, Serialize)]
pub struct LineTest {
    pub ip: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl From<ProbeResult> for LineTest {
    fn from(r: ProbeResult) -> Self {
        Self {
            ip: r.address,
            success: r.success,
            latency: r.latency,
            error: r.error,
            timestamp: r.timestamp,
        }
    }
}

/// Outcome of a manual probe of a site.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub site_id: String,
    pub primary: LineTest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<LineTest>,
}

pub struct Scheduler {
    state: Arc<MonitorState>,
    executor: Arc<ProbeExecutor>,
    results: mpsc::Sender<ProbeResult>,
    default_interval: Duration,
    shutdown: broadcast::Sender<()>,
}

impl Scheduler {
    pub fn new(
        state: Arc<MonitorState>,
        executor: Arc<ProbeExecutor>,
        results: mpsc::Sender<ProbeResult>,
        default_interval: Duration,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            state,
            executor,
            results,
            default_interval,
            shutdown,
        }
    }

    /// Spawn a probe loop for every enabled site.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let sites = self.state.sites();
        let mut handles = Vec::new();

        for site in sites {
            if !site.enabled {
                tracing::debug!("Scheduler: site {} disabled, skipping", site.id);
                continue;
            }

            let interval = site.probe_interval(self.default_interval);
            tracing::info!(
                "Scheduler: adding site {} ({}) every {:?}",
                site.id,
                site.name,
                interval
            );

            handles.push(tokio::spawn(run_site_loop(
                site.clone(),
                interval,
                self.executor.clone(),
                self.results.clone(),
                self.shutdown.subscribe(),
            )));
        }

        tracing::info!(
            "Scheduler started: {} of {} sites enabled",
            handles.len(),
            sites.len()
        );
        handles
    }

    /// Probe every line of a site right now, bypassing circuit breakers.
    /// Nothing is recorded. Returns `None` for an unknown site.
    pub async fn test_site(&self, site_id: &str) -> Option<TestResult> {
        let site = self.state.find_site(site_id)?;
        let exec = &self.executor;

        let primary = exec.probe_unguarded(&site.id, Line::Primary, &site.primary_ip);
        let secondary = async {
            match site.address(Line::Secondary) {
                Some(addr) => Some(exec.probe_unguarded(&site.id, Line::Secondary, addr).await),
                None => None,
            }
        };
        let (primary, secondary) = tokio::join!(primary, secondary);

        Some(TestResult {
            site_id: site.id.clone(),
            primary: primary.into(),
            secondary: secondary.map(LineTest::from),
        })
    }
}

/// Run rounds for one site until the stop signal. The first round starts
/// immediately. Probes still running at the stop signal are awaited so
/// their results reach the queue before the loop returns.
async fn run_site_loop(
    site: Site,
    interval: Duration,
    executor: Arc<ProbeExecutor>,
    tx: mpsc::Sender<ProbeResult>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!(
                    "Scheduler: stopping site {}, waiting for {} running probes",
                    site.id,
                    in_flight.len()
                );
                while in_flight.join_next().await.is_some() {}
                break;
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            _ = ticker.tick() => {
                for line in site.lines() {
                    let Some(address) = site.address(line).map(str::to_string) else {
                        continue;
                    };
                    let executor = executor.clone();
                    let tx = tx.clone();
                    let site_id = site.id.clone();

                    in_flight.spawn(async move {
                        let result = executor.probe_line(&site_id, line, &address).await;
                        if tx.send(result).await.is_err() {
                            tracing::warn!("Result pipeline closed, dropping result for {} ({})", site_id, line);
                        }
                    });
                }
            }
        }
    }
}

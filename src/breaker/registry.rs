//! Lazily created breakers, one per (site, line).

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{BreakerState, BreakerTransition, CircuitBreaker};
use crate::metrics::MetricsRegistry;
use crate::site::Line;

#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failures: u32,
}

pub struct BreakerRegistry {
    breakers: RwLock<HashMap<(String, Line), Arc<CircuitBreaker>>>,
    threshold: u32,
    reset_timeout: Duration,
    notify: mpsc::UnboundedSender<BreakerTransition>,
}

impl BreakerRegistry {
    /// Create a registry and the receiving end of its transition feed.
    pub fn new(
        threshold: u32,
        reset_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<BreakerTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Self {
            breakers: RwLock::new(HashMap::new()),
            threshold,
            reset_timeout,
            notify: tx,
        };
        (registry, rx)
    }

    /// The breaker for a site line, created on first use.
    pub fn get(&self, site_id: &str, line: Line) -> Arc<CircuitBreaker> {
        let key = (site_id.to_string(), line);
        {
            let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(b) = breakers.get(&key) {
                return b.clone();
            }
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have created it between the two locks
        if let Some(b) = breakers.get(&key) {
            return b.clone();
        }

        let breaker = Arc::new(CircuitBreaker::new(
            site_id,
            line,
            self.threshold,
            self.reset_timeout,
            Some(self.notify.clone()),
        ));
        tracing::info!(
            "Created circuit breaker {} (threshold {}, reset {:?})",
            breaker.name(),
            self.threshold,
            self.reset_timeout
        );
        breakers.insert(key, breaker.clone());
        breaker
    }

    /// State of every breaker created so far, ordered by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<BreakerSnapshot> = breakers
            .values()
            .map(|b| BreakerSnapshot {
                name: b.name().to_string(),
                state: b.state(),
                failures: b.failures(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Log transitions and mirror them into the metrics registry. Ends once every
/// breaker and the registry itself are dropped.
pub fn spawn_transition_listener(
    mut rx: mpsc::UnboundedReceiver<BreakerTransition>,
    metrics: Arc<MetricsRegistry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(t) = rx.recv().await {
            tracing::info!(
                "Circuit breaker {}/{} changed state: {} -> {}",
                t.site_id,
                t.line,
                t.from,
                t.to
            );
            metrics.record_breaker_transition(&t);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_shared() {
        let (registry, _rx) = BreakerRegistry::new(3, Duration::from_secs(60));
        let a = registry.get("s1", Line::Primary);
        let b = registry.get("s1", Line::Primary);
        let c = registry.get("s1", Line::Secondary);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let snap = registry.snapshot();
        let names: Vec<&str> = snap.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s1/primary", "s1/secondary"]);
        assert!(snap.iter().all(|s| s.state == BreakerState::Closed && s.failures == 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_creates_one_breaker() {
        let (registry, _rx) = BreakerRegistry::new(3, Duration::from_secs(60));
        let registry = Arc::new(registry);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.spawn(async move { registry.get("s1", Line::Primary) });
        }
        let mut breakers = Vec::new();
        while let Some(breaker) = tasks.join_next().await {
            breakers.push(breaker.unwrap());
        }

        assert_eq!(breakers.len(), 32);
        assert!(breakers.iter().all(|b| Arc::ptr_eq(b, &breakers[0])));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_independent() {
        let (registry, _rx) = BreakerRegistry::new(1, Duration::from_secs(60));
        let primary = registry.get("s1", Line::Primary);
        let _ = primary.call(|| async { Err::<(), _>("down") }).await;

        assert_eq!(primary.state(), BreakerState::Open);
        assert_eq!(registry.get("s1", Line::Secondary).state(), BreakerState::Closed);
        assert_eq!(registry.get("s2", Line::Primary).state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_updates_metrics() {
        let (registry, rx) = BreakerRegistry::new(1, Duration::from_secs(60));
        let metrics = Arc::new(MetricsRegistry::new());
        let listener = spawn_transition_listener(rx, metrics.clone());

        let b = registry.get("s1", Line::Primary);
        let _ = b.call(|| async { Err::<(), _>("down") }).await;

        drop(b);
        drop(registry);
        listener.await.unwrap();

        let snap = metrics.snapshot();
        let gauge = snap
            .breaker_state
            .iter()
            .find(|g| g.site_id == "s1" && g.line == Line::Primary)
            .unwrap();
        assert_eq!(gauge.value, BreakerState::Open.gauge_value());
        assert_eq!(snap.breaker_trips.len(), 1);
        assert_eq!(snap.breaker_trips[0].to, "open");
        assert_eq!(snap.breaker_trips[0].count, 1);
    }
}

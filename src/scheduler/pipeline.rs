//! Single consumer of probe results.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::db::LogEntry;
use crate::probe::ProbeResult;
use crate::state::MonitorState;

/// Applies each result to the shared state, one at a time and in the order
/// results were queued.
pub struct ResultPipeline {
    state: Arc<MonitorState>,
}

impl ResultPipeline {
    pub fn new(state: Arc<MonitorState>) -> Self {
        Self { state }
    }

    /// Consume results until `stop_rx` fires or until every sender is gone.
    /// Results already queued at the stop signal are still processed, so
    /// producers must be finished before it is sent.
    pub async fn run(self, mut rx: mpsc::Receiver<ProbeResult>, mut stop_rx: broadcast::Receiver<()>) {
        tracing::info!("Result pipeline started");

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    let mut drained = 0;
                    while let Ok(result) = rx.try_recv() {
                        self.handle(result);
                        drained += 1;
                    }
                    tracing::info!("Result pipeline stopping, drained {} queued results", drained);
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(result) => self.handle(result),
                        None => {
                            tracing::info!("Result pipeline stopping, all producers gone");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Count, record metrics, persist, then update live status.
    pub fn handle(&self, result: ProbeResult) {
        tracing::debug!(
            "Processing result for {} ({}): success={}",
            result.site_id,
            result.line,
            result.success
        );

        self.state.increment_checks();

        let metrics = self.state.metrics();
        metrics.record_probe(&result);

        let site_name = self
            .state
            .find_site(&result.site_id)
            .map(|s| s.name.as_str())
            .unwrap_or_default();
        let entry = LogEntry::from_probe(&result, site_name);
        if let Err(e) = self.state.store().append(entry) {
            tracing::error!(
                "Failed to store result for {} ({} at {}): {}",
                result.site_id,
                result.line,
                result.address,
                e
            );
        }

        if let Some(both_online) = self.state.update_status(&result) {
            metrics.set_both_online(&result.site_id, both_online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{LogQuery, LogStore, StoreError};
    use crate::metrics::MetricsRegistry;
    use crate::probe::test_result;
    use crate::site::{test_site, Line};
    use crate::state::test_state;

    struct FailingStore;

    impl LogStore for FailingStore {
        fn append(&self, _entry: LogEntry) -> Result<i64, StoreError> {
            Err(StoreError::Closed)
        }
        fn query(&self, _query: &LogQuery) -> Result<Vec<LogEntry>, StoreError> {
            Err(StoreError::Closed)
        }
        fn all_entries(&self) -> Result<Vec<LogEntry>, StoreError> {
            Err(StoreError::Closed)
        }
        fn len(&self) -> Result<usize, StoreError> {
            Err(StoreError::Closed)
        }
        fn close(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_handle_updates_everything() {
        let state = test_state(vec![test_site("s1", Some("192.0.2.2"))]);
        let pipeline = ResultPipeline::new(state.clone());

        pipeline.handle(test_result("s1", Line::Primary, true, Some(10.0)));
        pipeline.handle(test_result("s1", Line::Secondary, true, Some(20.0)));

        assert_eq!(state.total_checks(), 2);

        let logs = state.get_all_logs().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].site_name, "Site s1");
        assert_eq!(logs[1].line, Line::Secondary);

        let status = state.status("s1").unwrap();
        assert!(status.both_online);
        assert_eq!(status.primary_latency, Some(10.0));

        let snap = state.metrics().snapshot();
        assert_eq!(snap.both_online[0].value, 1.0);
        assert_eq!(snap.checks.iter().map(|c| c.count).sum::<u64>(), 2);
    }

    #[test]
    fn test_store_failure_does_not_stop_processing() {
        let site = test_site("s1", None);
        let state = Arc::new(MonitorState::new(
            vec![site],
            Arc::new(FailingStore),
            Arc::new(MetricsRegistry::new()),
        ));
        let pipeline = ResultPipeline::new(state.clone());

        pipeline.handle(test_result("s1", Line::Primary, false, None));
        pipeline.handle(test_result("s1", Line::Primary, true, Some(3.0)));

        assert_eq!(state.total_checks(), 2);
        assert!(state.status("s1").unwrap().primary_online);
    }

    #[tokio::test]
    async fn test_drains_queue_on_shutdown() {
        let state = test_state(vec![test_site("s1", None)]);
        let (tx, rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = broadcast::channel(1);

        for _ in 0..3 {
            tx.send(test_result("s1", Line::Primary, true, Some(1.0))).await.unwrap();
        }
        stop_tx.send(()).unwrap();

        ResultPipeline::new(state.clone()).run(rx, stop_rx).await;
        assert_eq!(state.total_checks(), 3);
        assert_eq!(state.store().len().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exits_when_producers_are_gone() {
        let state = test_state(vec![test_site("s1", None)]);
        let (tx, rx) = mpsc::channel(16);
        let (_stop_tx, stop_rx) = broadcast::channel(1);

        tx.send(test_result("s1", Line::Primary, false, None)).await.unwrap();
        drop(tx);

        ResultPipeline::new(state.clone()).run(rx, stop_rx).await;
        assert_eq!(state.total_checks(), 1);
        assert!(!state.status("s1").unwrap().both_online);
    }
}

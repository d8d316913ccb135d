//! Single-consumer drain loop
//!
//! One spawned task owns the claim loop for this process. Enqueuers hold a
//! [`DrainTrigger`] and poke it; pokes never block and coalesce into at most
//! one pending wake-up, so a poke during a running drain just schedules one
//! more pass. The task also wakes on a fixed interval to sweep stale jobs and
//! pick up work enqueued by other processes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::error::DocumentError;
use crate::worker::{DocumentWorker, DrainReport};

/// Default interval of the periodic sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cloneable, non-blocking wake-up for the drain task
#[derive(Debug, Clone, Default)]
pub struct DrainTrigger {
    notify: Arc<Notify>,
}

impl DrainTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a drain pass
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}

/// Owns the worker and the drain schedule
pub struct Drainer {
    worker: Arc<DocumentWorker>,
    trigger: DrainTrigger,
    sweep_interval: Duration,
}

impl Drainer {
    pub fn new(worker: Arc<DocumentWorker>) -> Self {
        Self {
            worker,
            trigger: DrainTrigger::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn trigger(&self) -> DrainTrigger {
        self.trigger.clone()
    }

    /// Drains until nothing is picked
    pub async fn run_once(&self) -> Result<DrainReport, DocumentError> {
        self.worker.drain().await
    }

    /// Starts the consumer task
    ///
    /// The first tick fires immediately, so startup sweeps stale jobs and
    /// drains before waiting for pokes.
    pub fn spawn(self) -> DrainHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let trigger = self.trigger.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.sweep_interval.as_secs(), "Document drainer started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = self.trigger.notify.notified() => {}
                    _ = ticker.tick() => {
                        if let Err(e) = self.worker.sweep_stale().await {
                            error!(error = %e, "Stale job sweep failed");
                        }
                    }
                }

                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Drain pass aborted");
                }
            }

            info!("Document drainer stopped");
        });

        DrainHandle {
            trigger,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running drainer
pub struct DrainHandle {
    trigger: DrainTrigger,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DrainHandle {
    pub fn trigger(&self) -> DrainTrigger {
        self.trigger.clone()
    }

    pub fn poke(&self) {
        self.trigger.poke();
    }

    /// Stops the loop after the current pass and waits for it
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Document drainer task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use core_kernel::{BillingEntityId, DateWindow};
    use crate::job::{JobPayload, NewDocumentJob, WorklogRow};
    use crate::ports::mock::{InMemoryDocumentStore, InMemoryJobQueue, MockAccountingGateway};
    use crate::ports::JobQueue;
    use crate::queue::DocumentJobQueue;
    use crate::renderer::HtmlWorklogRenderer;

    fn job(target: i64) -> NewDocumentJob {
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        NewDocumentJob {
            target_document_id: target,
            document_number: Some(format!("{}", 1000 + target)),
            payload: JobPayload {
                customer_name: "Acme".to_string(),
                rows: vec![WorklogRow {
                    date: day,
                    description: "Service visit".to_string(),
                    hours: dec!(1),
                    user_name: None,
                    project: None,
                }],
                period: DateWindow::single_day(day),
                billing_entity_id: BillingEntityId::new(5),
                language: Default::default(),
            },
        }
    }

    fn worker(queue: Arc<InMemoryJobQueue>, gateway: Arc<MockAccountingGateway>) -> Arc<DocumentWorker> {
        Arc::new(DocumentWorker::new(
            queue,
            Arc::new(InMemoryDocumentStore::new()),
            gateway,
            Arc::new(HtmlWorklogRenderer::new()),
        ))
    }

    async fn wait_for_done(queue: &InMemoryJobQueue, expected: u64) {
        for _ in 0..200 {
            if queue.counts().await.unwrap().done == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("jobs were not drained in time");
    }

    #[tokio::test]
    async fn test_enqueue_during_drain_reuses_running_loop() {
        let queue = Arc::new(InMemoryJobQueue::new());
        let gateway = Arc::new(MockAccountingGateway::new().with_delay(Duration::from_millis(50)));
        let handle = Drainer::new(worker(queue.clone(), gateway.clone()))
            .with_sweep_interval(Duration::from_secs(3600))
            .spawn();
        let jobs = DocumentJobQueue::new(queue.clone()).with_trigger(handle.trigger());

        jobs.enqueue_jobs(&[job(1)]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        jobs.enqueue_jobs(&[job(2)]).await.unwrap();
        for _ in 0..10 {
            handle.poke();
        }

        wait_for_done(&queue, 2).await;
        assert_eq!(gateway.max_in_flight(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_drains_existing_jobs_without_poke() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue.enqueue(&[job(3), job(4)]).await.unwrap();

        let handle = Drainer::new(worker(queue.clone(), Arc::new(MockAccountingGateway::new())))
            .with_sweep_interval(Duration::from_secs(3600))
            .spawn();

        wait_for_done(&queue, 2).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_once_reports_counts() {
        let queue = Arc::new(InMemoryJobQueue::new());
        queue.enqueue(&[job(5), job(6)]).await.unwrap();
        let drainer = Drainer::new(worker(queue.clone(), Arc::new(MockAccountingGateway::new())));

        let report = drainer.run_once().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.done, 2);

        let again = drainer.run_once().await.unwrap();
        assert_eq!(again, DrainReport::default());
    }

    #[test]
    fn test_poke_without_listener_does_not_block() {
        let trigger = DrainTrigger::new();
        for _ in 0..1000 {
            trigger.poke();
        }
    }
}

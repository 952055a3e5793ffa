//! Drives the resource-collection and health-check jobs on independent
//! fixed-interval timers until cancelled.
//!
//! Each job runs in its own task and awaits its tick body inline, so ticks of
//! the same job never overlap; a tick that outlives its period makes the timer
//! skip the missed firings. The two jobs share one backend behind a mutex.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backends::Backend;
use crate::collectors::Collector;
use crate::health::HealthChecker;

#[derive(Debug, Clone, Copy)]
pub struct Periods {
    pub collect: Duration,
    pub health_check: Duration,
}

pub struct Scheduler<B> {
    backend: Arc<Mutex<B>>,
    collector: Arc<dyn Collector>,
    checkers: Vec<HealthChecker>,
    periods: Periods,
}

impl<B: Backend + 'static> Scheduler<B> {
    pub fn new(
        backend: Arc<Mutex<B>>,
        collector: Arc<dyn Collector>,
        checkers: Vec<HealthChecker>,
        periods: Periods,
    ) -> Self {
        Self {
            backend,
            collector,
            checkers,
            periods,
        }
    }

    /// Runs both jobs until `token` is cancelled. An in-flight tick is
    /// abandoned at cancellation.
    pub async fn run(self, token: CancellationToken) {
        let resource = ResourceJob {
            collector: self.collector,
            backend: self.backend.clone(),
        };
        let health = HealthJob {
            checkers: self.checkers,
            backend: self.backend,
        };

        let resource_token = token.clone();
        let collect_period = self.periods.collect;
        let resource_task = tokio::spawn(async move {
            run_periodic("collectDockerReservedMemory", collect_period, resource_token, || {
                resource.tick()
            })
            .await
        });

        let health_period = self.periods.health_check;
        let health_task = tokio::spawn(async move {
            run_periodic("health check", health_period, token, || health.tick()).await
        });

        let (resource_result, health_result) = tokio::join!(resource_task, health_task);
        for result in [resource_result, health_result] {
            if let Err(e) = result {
                error!(error = %e, "scheduler job terminated abnormally");
            }
        }
        info!("scheduler stopped");
    }
}

struct ResourceJob<B> {
    collector: Arc<dyn Collector>,
    backend: Arc<Mutex<B>>,
}

impl<B: Backend> ResourceJob<B> {
    async fn tick(&self) {
        match self.collector.collect().await {
            Ok(metrics) if metrics.is_empty() => {
                warn!(collector = self.collector.name(), "collected no metrics");
            }
            Ok(metrics) => {
                self.backend.lock().await.send(&metrics).await;
            }
            Err(e) => {
                error!(collector = self.collector.name(), error = %e, "collection failed, skipping tick");
            }
        }
    }
}

struct HealthJob<B> {
    checkers: Vec<HealthChecker>,
    backend: Arc<Mutex<B>>,
}

impl<B: Backend> HealthJob<B> {
    async fn tick(&self) {
        let mut batch = Vec::with_capacity(self.checkers.len());
        for checker in &self.checkers {
            batch.push(checker.check().await);
        }
        self.backend.lock().await.send(&batch).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

/// Fires `tick` every `period`, first after one full period.
async fn run_periodic<F, Fut>(job: &'static str, period: Duration, token: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(job, "job has been cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        let now = Utc::now();
        info!(job, %now, "tick started");
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(job, "job has been cancelled during a tick");
                return;
            }
            outcome = AssertUnwindSafe(tick()).catch_unwind() => {
                if let Err(panic) = outcome {
                    error!(job, panic = panic_message(panic.as_ref()), "tick panicked, recovered");
                }
            }
        }
        info!(job, %now, "tick done");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{Metric, MetricPath};
    use crate::error::{CollectError, DeliveryError, ParseError};
    use crate::health::tests::ctx;
    use crate::health::{JsonFieldChecker, UrlChecker};
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::get, Router};
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Recorder(Arc<std::sync::Mutex<Vec<Vec<Metric>>>>);

    impl Recorder {
        fn batches(&self) -> Vec<Vec<Metric>> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for Recorder {
        async fn send(&mut self, metrics: &[Metric]) {
            self.0.lock().unwrap().push(metrics.to_vec());
        }

        async fn close(&mut self) -> Result<(), DeliveryError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    enum Behavior {
        PanicFirst,
        Fail,
        Ok,
    }

    struct FakeCollector {
        calls: AtomicUsize,
        behavior: Behavior,
    }

    impl FakeCollector {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    fn node_metric(node: &str, value: f64) -> Metric {
        Metric::new(
            MetricPath::new("lain.cluster.node.docker_reserved_memory").unwrap(),
            value,
            NonZeroU32::new(1).unwrap(),
        )
        .with_tag("node", node)
    }

    #[async_trait]
    impl Collector for FakeCollector {
        async fn collect(&self) -> Result<Vec<Metric>, CollectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::PanicFirst if call == 0 => panic!("malformed table"),
                Behavior::Fail => Err(CollectError::Parse(ParseError::MissingNodesLabel)),
                _ => Ok(vec![node_metric("node-a", 1.0), node_metric("node-b", 2.0)]),
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    const IDLE: Duration = Duration::from_secs(3600);

    async fn wait_for_batches(recorder: &Recorder, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.batches().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for batches");
    }

    fn start(
        recorder: &Recorder,
        collector: Arc<dyn Collector>,
        checkers: Vec<HealthChecker>,
        periods: Periods,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let scheduler = Scheduler::new(
            Arc::new(Mutex::new(recorder.clone())),
            collector,
            checkers,
            periods,
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(token.clone()));
        (token, handle)
    }

    #[tokio::test]
    async fn test_health_tick_sends_one_batch_per_round() {
        let app = Router::new()
            .route("/up", get(|| async { "OK" }))
            .route("/down", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/health", get(|| async { r#"{"health": "true"}"# }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let path = |p: &str| MetricPath::new(p).unwrap();
        let checkers = vec![
            HealthChecker::Url(UrlChecker::new(path("up.health"), &format!("{base}/up"), ctx()).unwrap()),
            HealthChecker::Url(UrlChecker::new(path("down.health"), &format!("{base}/down"), ctx()).unwrap()),
            HealthChecker::JsonField(
                JsonFieldChecker::new(path("etcd.health"), &format!("{base}/health"), "health", ctx()).unwrap(),
            ),
        ];

        let recorder = Recorder::default();
        let (token, handle) = start(
            &recorder,
            FakeCollector::new(Behavior::Ok),
            checkers,
            Periods {
                collect: IDLE,
                health_check: Duration::from_millis(30),
            },
        );
        wait_for_batches(&recorder, 2).await;
        token.cancel();
        handle.await.unwrap();

        let batches = recorder.batches();
        assert!(batches.iter().all(|b| b.len() == 3));
        let values: Vec<f64> = batches[0].iter().map(|m| m.value).collect();
        assert_eq!(values, vec![1.0, 0.0, 1.0]);
        let paths: Vec<&str> = batches[0].iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["up.health", "down.health", "etcd.health"]);
    }

    #[tokio::test]
    async fn test_resource_job_recovers_from_panic() {
        let collector = FakeCollector::new(Behavior::PanicFirst);
        let recorder = Recorder::default();
        let (token, handle) = start(
            &recorder,
            collector.clone(),
            vec![],
            Periods {
                collect: Duration::from_millis(20),
                health_check: IDLE,
            },
        );
        wait_for_batches(&recorder, 1).await;
        token.cancel();
        handle.await.unwrap();

        assert!(collector.calls.load(Ordering::SeqCst) >= 2);
        let batch = &recorder.batches()[0];
        let nodes: Vec<&str> = batch.iter().map(|m| m.tags["node"].as_str()).collect();
        assert_eq!(nodes, vec!["node-a", "node-b"]);
    }

    #[tokio::test]
    async fn test_failed_collection_skips_tick() {
        let collector = FakeCollector::new(Behavior::Fail);
        let recorder = Recorder::default();
        let (token, handle) = start(
            &recorder,
            collector.clone(),
            vec![],
            Periods {
                collect: Duration::from_millis(10),
                health_check: IDLE,
            },
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while collector.calls.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        token.cancel();
        handle.await.unwrap();

        assert!(recorder.batches().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_both_jobs() {
        let recorder = Recorder::default();
        let (token, handle) = start(
            &recorder,
            FakeCollector::new(Behavior::Ok),
            vec![],
            Periods {
                collect: Duration::from_millis(15),
                health_check: Duration::from_millis(15),
            },
        );
        wait_for_batches(&recorder, 4).await;

        token.cancel();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();

        let sent = recorder.batches().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(recorder.batches().len(), sent);
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let collector = FakeCollector::new(Behavior::Ok);
        let recorder = Recorder::default();
        let (token, handle) = start(
            &recorder,
            collector.clone(),
            vec![],
            Periods {
                collect: Duration::from_millis(50),
                health_check: Duration::from_millis(50),
            },
        );
        token.cancel();
        handle.await.unwrap();

        assert_eq!(collector.calls.load(Ordering::SeqCst), 0);
        assert!(recorder.batches().is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic>");
    }
}

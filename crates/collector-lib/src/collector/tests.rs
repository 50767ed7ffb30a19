//! Orchestration scenarios against an in-memory container runtime

use super::*;
use crate::models::{ContainerDescriptor, RawStats};
use crate::runtime::StatsStream;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::timeout;
use tokio_stream::StreamExt;

/// How the fake stats stream of a container behaves
#[derive(Debug, Clone, Copy)]
enum StreamPlan {
    /// `n` ticks, then the stream ends
    Finite(usize),
    /// `n` ticks, then the stream stays open
    Endless(usize),
}

struct FakeRuntime {
    running: Mutex<Vec<String>>,
    containers: Mutex<HashMap<String, (ContainerDescriptor, StreamPlan)>>,
    inspected: Mutex<Vec<String>>,
    streamed: Mutex<Vec<String>>,
    fail_listing: AtomicBool,
    inspect_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeRuntime {
    fn new() -> Self {
        Self {
            running: Mutex::new(Vec::new()),
            containers: Mutex::new(HashMap::new()),
            inspected: Mutex::new(Vec::new()),
            streamed: Mutex::new(Vec::new()),
            fail_listing: AtomicBool::new(false),
            inspect_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_inspect_delay(mut self, delay: Duration) -> Self {
        self.inspect_delay = delay;
        self
    }

    fn add(&self, id: &str, labels: &[(&str, &str)], plan: StreamPlan) {
        let descriptor = ContainerDescriptor {
            id: id.to_string(),
            name: format!("/{id}"),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            env: Vec::new(),
        };
        self.containers
            .lock()
            .unwrap()
            .insert(id.to_string(), (descriptor, plan));
        self.running.lock().unwrap().push(id.to_string());
    }

    /// Listed as running but gone by the time it is inspected
    fn add_vanished(&self, id: &str) {
        self.running.lock().unwrap().push(id.to_string());
    }

    /// Drop `id` from the running list, keeping its descriptor
    fn stop(&self, id: &str) {
        self.running.lock().unwrap().retain(|running| running != id);
    }

    fn streams_of(&self, id: &str) -> usize {
        self.streamed
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| *seen == id)
            .count()
    }

    fn relist(&self, id: &str) {
        self.running.lock().unwrap().push(id.to_string());
    }

    fn inspections_of(&self, id: &str) -> usize {
        self.inspected
            .lock()
            .unwrap()
            .iter()
            .filter(|seen| *seen == id)
            .count()
    }
}

fn tick(n: usize) -> Result<RawStats, RuntimeError> {
    Ok(RawStats {
        read: Utc.timestamp_opt(1_500_000_000 + n as i64, 0).unwrap(),
        ..Default::default()
    })
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_running(&self) -> Result<Vec<String>, RuntimeError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(RuntimeError::Unreachable("daemon gone".to_string()));
        }
        Ok(self.running.lock().unwrap().clone())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.inspect_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.inspected.lock().unwrap().push(id.to_string());
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .map(|(descriptor, _)| descriptor.clone())
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn stream_stats(&self, id: &str) -> Result<StatsStream, RuntimeError> {
        self.streamed.lock().unwrap().push(id.to_string());
        let plan = self
            .containers
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, plan)| *plan)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;

        let stream: StatsStream = match plan {
            StreamPlan::Finite(n) => Box::pin(tokio_stream::iter((0..n).map(tick))),
            StreamPlan::Endless(n) => Box::pin(
                tokio_stream::iter((0..n).map(tick)).chain(tokio_stream::pending()),
            ),
        };
        Ok(stream)
    }
}

fn collector(runtime: &Arc<FakeRuntime>, interval: i64) -> (Collector, mpsc::Receiver<Sample>) {
    let (tx, rx) = mpsc::channel(64);
    let collector = Collector::new(
        runtime.clone(),
        IdentityConfig::default(),
        interval,
        tx,
        StructuredLogger::new("test-host"),
    )
    .unwrap();
    (collector, rx)
}

async fn recv_samples(rx: &mut mpsc::Receiver<Sample>, n: usize) -> Vec<Sample> {
    let mut samples = Vec::with_capacity(n);
    for _ in 0..n {
        let sample = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a sample")
            .expect("sample channel closed");
        samples.push(sample);
    }
    samples
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[test]
fn test_collector_rejects_invalid_interval() {
    let runtime = Arc::new(FakeRuntime::new());
    let (tx, _rx) = mpsc::channel(1);

    let result = Collector::new(
        runtime,
        IdentityConfig::default(),
        0,
        tx,
        StructuredLogger::new("test-host"),
    );

    assert!(matches!(result, Err(ConfigError::InvalidInterval(0))));
}

#[tokio::test]
async fn test_run_rejects_zero_concurrency() {
    let runtime = Arc::new(FakeRuntime::new());
    let (collector, _rx) = collector(&runtime, 1);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let err = collector.run(0, shutdown_rx).await.unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Config(ConfigError::InvalidConcurrency(0))
    ));
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.fail_listing.store(true, Ordering::SeqCst);
    let (collector, _rx) = collector(&runtime, 1);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let err = collector.run(2, shutdown_rx).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Unreachable(_)));
}

#[tokio::test]
async fn test_monitors_labelled_containers_and_skips_the_rest() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "/prod/web")], StreamPlan::Finite(3));
    runtime.add("sidecar", &[], StreamPlan::Finite(3));

    let (collector, mut rx) = collector(&runtime, 1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(2, shutdown_rx));

    let samples = recv_samples(&mut rx, 3).await;
    for sample in &samples {
        assert_eq!(sample.container_id, "web");
        assert_eq!(sample.tags["app"], "web");
        assert_eq!(sample.tags["group"], "/prod");
        assert_eq!(sample.tags["task"], "default");
    }

    eventually(|| runtime.inspections_of("sidecar") == 1).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(*runtime.streamed.lock().unwrap(), vec!["web".to_string()]);
}

#[tokio::test]
async fn test_monitors_decimate_their_streams() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Finite(7));

    let (collector, mut rx) = collector(&runtime, 3);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(1, shutdown_rx));

    let samples = recv_samples(&mut rx, 3).await;
    let seconds: Vec<_> = samples
        .iter()
        .map(|s| s.measurement_time.timestamp() - 1_500_000_000)
        .collect();
    assert_eq!(seconds, vec![0, 3, 6]);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_attempts_respect_concurrency_budget() {
    let runtime = Arc::new(FakeRuntime::new().with_inspect_delay(Duration::from_millis(30)));
    for i in 0..6 {
        runtime.add(
            &format!("c{i}"),
            &[("app_id", "web")],
            StreamPlan::Finite(1),
        );
    }

    let (collector, mut rx) = collector(&runtime, 1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(2, shutdown_rx));

    recv_samples(&mut rx, 6).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runtime.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_start_does_not_affect_other_monitors() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_vanished("gone");
    runtime.add("web", &[("app_id", "web")], StreamPlan::Finite(2));

    let (collector, mut rx) = collector(&runtime, 1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(1, shutdown_rx));

    let samples = recv_samples(&mut rx, 2).await;
    assert!(samples.iter().all(|s| s.container_id == "web"));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(runtime.inspections_of("gone"), 1);
}

#[tokio::test]
async fn test_shutdown_stops_open_monitors() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Endless(2));

    let (collector, mut rx) = collector(&runtime, 1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(1, shutdown_rx));

    recv_samples(&mut rx, 2).await;
    shutdown_tx.send(()).unwrap();

    timeout(Duration::from_secs(1), handle)
        .await
        .expect("collector did not stop")
        .unwrap()
        .unwrap();

    // every sender is gone once the forwarding tasks are torn down
    let closed = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_rescan_picks_up_new_containers_only() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Endless(1));
    runtime.add("plain", &[], StreamPlan::Endless(1));

    let (collector, mut rx) = collector(&runtime, 1);
    let collector = collector.with_rescan_interval(Duration::from_millis(20));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(2, shutdown_rx));

    let first = recv_samples(&mut rx, 1).await;
    assert_eq!(first[0].container_id, "web");

    runtime.add("api", &[("app_id", "api")], StreamPlan::Endless(1));
    let second = recv_samples(&mut rx, 1).await;
    assert_eq!(second[0].container_id, "api");

    // let a few more rescans happen
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runtime.inspections_of("web"), 1);
    assert_eq!(runtime.inspections_of("plain"), 1);
    assert_eq!(runtime.inspections_of("api"), 1);
}

#[tokio::test]
async fn test_rescan_does_not_reattach_ended_monitor() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Finite(1));

    let (collector, mut rx) = collector(&runtime, 1);
    let collector = collector.with_rescan_interval(Duration::from_millis(20));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(1, shutdown_rx));

    recv_samples(&mut rx, 1).await;

    // web stays listed as running after its stream ended
    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(runtime.inspections_of("web"), 1);
    assert_eq!(runtime.streams_of("web"), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_container_listed_again_after_leaving_is_monitored() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Finite(1));

    let (collector, mut rx) = collector(&runtime, 1);
    let collector = collector.with_rescan_interval(Duration::from_millis(20));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(1, shutdown_rx));

    recv_samples(&mut rx, 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(runtime.streams_of("web"), 1);

    // a rescan while web is absent forgets it
    runtime.stop("web");
    tokio::time::sleep(Duration::from_millis(60)).await;
    runtime.relist("web");

    let again = recv_samples(&mut rx, 1).await;
    assert_eq!(again[0].container_id, "web");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(runtime.inspections_of("web"), 2);
}

#[tokio::test]
async fn test_health_tracks_readiness_and_active_monitors() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.add("web", &[("app_id", "web")], StreamPlan::Finite(1));
    runtime.add("db", &[("app_id", "db")], StreamPlan::Endless(1));

    let health = HealthRegistry::new();
    let (collector, mut rx) = collector(&runtime, 1);
    let collector = collector.with_health(health.clone());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(collector.run(2, shutdown_rx));

    recv_samples(&mut rx, 2).await;

    // the finite stream ends and its monitor leaves the active set
    let mut settled = false;
    for _ in 0..200 {
        let ready = health.readiness().await.ready;
        if ready && health.health().await.active_monitors == 1 {
            settled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(settled, "collector never reported one active monitor");

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert_eq!(health.health().await.active_monitors, 0);
}

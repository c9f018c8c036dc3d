//! Sensor monitor supervisor.
//!
//! A test profile may ask for platform sensors to be sampled while the test
//! runs. [`MonitorSupervisor::start`] launches one sampling worker per valid
//! declaration before the test starts, and [`MonitorSupervisor::drain`] stops
//! them all afterwards and turns the collected samples into a single
//! ancillary value.

pub mod channel;
pub mod sensor;

use crate::config::{ChannelKind, MonitorConfig, ValidationConfig};
use crate::normalize::parse_numeric;
use crate::rules::SensorMonitorRule;
pub use channel::{FileChannel, MemoryChannel, SampleChannel};
pub use sensor::{
    parse_samples, reduce_samples, MonitorValue, ReportMode, SensorId, SensorSource,
    ELAPSED_TIME_SENSOR,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sampling intervals below this are rejected.
pub const MIN_POLLING_INTERVAL_SECS: f64 = 0.5;

/// Errors scoped to a single sensor's monitoring attempt.
#[derive(Debug)]
pub enum MonitorError {
    /// No async runtime is available to host the sampling worker.
    NoRuntime { sensor: String },
    /// The sample channel could not be created.
    Channel {
        sensor: String,
        source: std::io::Error,
    },
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::NoRuntime { sensor } => {
                write!(f, "cannot monitor {sensor}: no async runtime available")
            }
            MonitorError::Channel { sensor, source } => {
                write!(f, "cannot monitor {sensor}: sample channel: {source}")
            }
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::NoRuntime { .. } => None,
            MonitorError::Channel { source, .. } => Some(source),
        }
    }
}

/// Outcome of [`MonitorSupervisor::start`].
#[derive(Debug, Default)]
pub struct MonitorStart {
    /// Number of sensors now being monitored, the elapsed-time sensor included.
    pub launched: usize,
    /// Declarations that were valid but could not be launched.
    pub failures: Vec<MonitorError>,
}

/// Handle to a launched sampling worker.
struct Worker {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
    channel: Arc<dyn SampleChannel>,
    mode: ReportMode,
}

enum TaskKind {
    ElapsedTime { started: Instant },
    Sampler(Worker),
}

struct SensorTask {
    sensor: String,
    kind: TaskKind,
}

pub struct MonitorSupervisor {
    source: Arc<dyn SensorSource>,
    /// Supported-sensor catalog, fetched on first use and kept for the run.
    supported: Option<HashSet<SensorId>>,
    tasks: Vec<SensorTask>,
    channel_kind: ChannelKind,
    drain_timeout: Duration,
    minimal_test_time: Duration,
}

impl MonitorSupervisor {
    pub fn new(
        source: Arc<dyn SensorSource>,
        monitor: &MonitorConfig,
        validation: &ValidationConfig,
    ) -> Self {
        Self {
            source,
            supported: None,
            tasks: Vec::new(),
            channel_kind: monitor.channel,
            drain_timeout: Duration::from_millis(monitor.drain_timeout_ms),
            minimal_test_time: minimal_test_time(validation),
        }
    }

    /// Number of sensors currently being monitored.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Launch monitoring for every valid declaration, in declaration order.
    ///
    /// Malformed declarations (unknown or unsupported sensor, polling interval
    /// below [`MIN_POLLING_INTERVAL_SECS`], unknown report mode) are skipped
    /// silently. Anything left over from a previous start is shut down first.
    pub fn start(&mut self, monitors: &[SensorMonitorRule], install_dir: &Path) -> MonitorStart {
        if !self.tasks.is_empty() {
            tracing::warn!(
                stale = self.tasks.len(),
                "discarding sensor monitors that were never drained"
            );
            self.shutdown();
        }

        let mut outcome = MonitorStart::default();
        for rule in monitors {
            let Some(sensor) = rule.sensor.as_deref().map(str::trim) else {
                continue;
            };

            if sensor == ELAPSED_TIME_SENSOR {
                self.tasks.push(SensorTask {
                    sensor: sensor.to_string(),
                    kind: TaskKind::ElapsedTime {
                        started: Instant::now(),
                    },
                });
                continue;
            }

            let Some(id) = SensorId::parse(sensor) else {
                tracing::debug!(sensor, "skipping malformed sensor id");
                continue;
            };
            if !self.is_supported(&id) {
                tracing::debug!(sensor, "skipping unsupported sensor");
                continue;
            }
            let Some(interval) = rule
                .polling_frequency
                .as_deref()
                .and_then(parse_numeric)
                .filter(|secs| *secs >= MIN_POLLING_INTERVAL_SECS)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            else {
                tracing::debug!(sensor, "skipping sensor with invalid polling frequency");
                continue;
            };
            let Some(mode) = rule.report.as_deref().and_then(ReportMode::parse) else {
                tracing::debug!(sensor, "skipping sensor with invalid report mode");
                continue;
            };

            match self.launch(id, interval, mode, install_dir) {
                Ok(worker) => {
                    tracing::info!(
                        sensor,
                        interval_secs = interval.as_secs_f64(),
                        ?mode,
                        "sensor monitor started"
                    );
                    self.tasks.push(SensorTask {
                        sensor: sensor.to_string(),
                        kind: TaskKind::Sampler(worker),
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "sensor monitor not started");
                    outcome.failures.push(e);
                }
            }
        }

        outcome.launched = self.tasks.len();
        outcome
    }

    /// Stop every monitor and return the first non-empty value in declaration
    /// order.
    ///
    /// All monitors are stopped and their channels removed whether or not they
    /// produce the winning value. Values after the first are logged and
    /// dropped.
    pub async fn drain(&mut self) -> Option<MonitorValue> {
        let mut winner = None;
        for task in std::mem::take(&mut self.tasks) {
            let value = match task.kind {
                TaskKind::ElapsedTime { started } => {
                    elapsed_value(started.elapsed(), self.minimal_test_time)
                }
                TaskKind::Sampler(worker) => {
                    drain_worker(&task.sensor, worker, self.drain_timeout).await
                }
            };

            let Some(value) = value else {
                tracing::debug!(sensor = %task.sensor, "sensor monitor produced no value");
                continue;
            };
            if winner.is_none() {
                tracing::info!(sensor = %task.sensor, value = %value, "sensor monitor result");
                winner = Some(value);
            } else {
                tracing::debug!(sensor = %task.sensor, value = %value, "discarding additional sensor result");
            }
        }
        winner
    }

    fn is_supported(&mut self, id: &SensorId) -> bool {
        let source = &self.source;
        self.supported
            .get_or_insert_with(|| source.supported_sensors().into_iter().collect())
            .contains(id)
    }

    fn launch(
        &self,
        id: SensorId,
        interval: Duration,
        mode: ReportMode,
        install_dir: &Path,
    ) -> Result<Worker, MonitorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime {
            sensor: id.to_string(),
        })?;

        let channel: Arc<dyn SampleChannel> = match self.channel_kind {
            ChannelKind::Memory => Arc::new(MemoryChannel::new()),
            ChannelKind::File => Arc::new(FileChannel::create_in(install_dir).map_err(|e| {
                MonitorError::Channel {
                    sensor: id.to_string(),
                    source: e,
                }
            })?),
        };

        let (cancel, cancelled) = watch::channel(false);
        let handle = runtime.spawn(sample_loop(
            Arc::clone(&self.source),
            id,
            Arc::clone(&channel),
            interval,
            cancelled,
        ));

        Ok(Worker {
            handle,
            cancel,
            channel,
            mode,
        })
    }

    /// Cancel every outstanding worker and remove its channel without reading it.
    fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            if let TaskKind::Sampler(worker) = task.kind {
                let _ = worker.cancel.send(true);
                worker.handle.abort();
                let _ = worker.channel.remove();
            }
        }
    }
}

impl Drop for MonitorSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Minimum test duration from config. Values that do not fit a `Duration`
/// fall back to the default.
fn minimal_test_time(validation: &ValidationConfig) -> Duration {
    let secs = validation.minimal_test_time_secs.max(0.0);
    Duration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        let fallback = ValidationConfig::default().minimal_test_time_secs;
        tracing::warn!(
            minimal_test_time_secs = secs,
            fallback,
            "minimal test time out of range, using default"
        );
        Duration::from_secs_f64(fallback)
    })
}

/// Elapsed test time in seconds, or `None` when the test ran for less than
/// `minimum`.
pub fn elapsed_value(elapsed: Duration, minimum: Duration) -> Option<MonitorValue> {
    if elapsed < minimum {
        return None;
    }
    Some(MonitorValue::Number(elapsed.as_secs_f64()))
}

async fn drain_worker(sensor: &str, worker: Worker, timeout: Duration) -> Option<MonitorValue> {
    let Worker {
        mut handle,
        cancel,
        channel,
        mode,
    } = worker;

    let _ = cancel.send(true);
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(sensor, error = %e, "sensor worker failed"),
        Err(_) => {
            tracing::warn!(sensor, "sensor worker did not stop in time, aborting");
            handle.abort();
        }
    }

    let contents = channel.read();
    if let Err(e) = channel.remove() {
        tracing::debug!(sensor, error = %e, "failed to remove sample channel");
    }
    let contents = match contents {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(sensor, error = %e, "failed to read sample channel");
            return None;
        }
    };

    let samples = parse_samples(&contents);
    tracing::debug!(sensor, samples = samples.len(), "sensor monitor drained");
    reduce_samples(&samples, mode)
}

/// Worker body: sample, republish the whole buffer, sleep, until cancelled or
/// the channel disappears.
///
/// Sensor reads and channel writes may block, so each step runs on the
/// blocking pool.
async fn sample_loop(
    source: Arc<dyn SensorSource>,
    sensor: SensorId,
    channel: Arc<dyn SampleChannel>,
    interval: Duration,
    mut cancelled: watch::Receiver<bool>,
) {
    let mut samples = Vec::new();
    loop {
        if *cancelled.borrow() || !channel.is_open() {
            break;
        }

        let step = {
            let source = Arc::clone(&source);
            let channel = Arc::clone(&channel);
            let sensor = sensor.clone();
            tokio::task::spawn_blocking(move || {
                if let Some(value) = source.read(&sensor) {
                    samples.push(value);
                }
                let published = channel.publish(&samples);
                (samples, published)
            })
        };
        samples = match step.await {
            Ok((samples, Ok(()))) => samples,
            Ok((samples, Err(e))) => {
                tracing::debug!(
                    sensor = %sensor,
                    samples = samples.len(),
                    error = %e,
                    "sample channel closed"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(sensor = %sensor, error = %e, "sensor read failed");
                return;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancelled.changed() => break,
        }
    }
    tracing::debug!(sensor = %sensor, samples = samples.len(), "sensor worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed reading per sensor and counts catalog queries.
    struct FixedSource {
        readings: HashMap<SensorId, Option<f64>>,
        catalog_queries: AtomicUsize,
    }

    impl FixedSource {
        fn new(readings: &[(&str, Option<f64>)]) -> Arc<Self> {
            Arc::new(Self {
                readings: readings
                    .iter()
                    .map(|(id, v)| (SensorId::parse(id).unwrap(), *v))
                    .collect(),
                catalog_queries: AtomicUsize::new(0),
            })
        }
    }

    impl SensorSource for FixedSource {
        fn supported_sensors(&self) -> Vec<SensorId> {
            self.catalog_queries.fetch_add(1, Ordering::SeqCst);
            self.readings.keys().cloned().collect()
        }

        fn read(&self, sensor: &SensorId) -> Option<f64> {
            self.readings.get(sensor).copied().flatten()
        }
    }

    fn rule(sensor: &str, polling: &str, report: &str) -> SensorMonitorRule {
        SensorMonitorRule {
            sensor: Some(sensor.to_string()),
            polling_frequency: Some(polling.to_string()),
            report: Some(report.to_string()),
        }
    }

    fn supervisor(source: Arc<FixedSource>, channel: ChannelKind) -> MonitorSupervisor {
        let monitor = MonitorConfig {
            channel,
            drain_timeout_ms: 2000,
        };
        MonitorSupervisor::new(source, &monitor, &ValidationConfig::default())
    }

    #[test]
    fn test_elapsed_value_below_minimum() {
        let minimum = Duration::from_secs(3);
        assert_eq!(elapsed_value(Duration::from_secs(1), minimum), None);
        assert_eq!(
            elapsed_value(Duration::from_secs(5), minimum),
            Some(MonitorValue::Number(5.0))
        );
    }

    #[tokio::test]
    async fn test_short_elapsed_time_is_discarded() {
        let mut sup = supervisor(FixedSource::new(&[]), ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(&[rule("sys.time", "", "")], dir.path());
        assert_eq!(outcome.launched, 1);
        assert_eq!(sup.drain().await, None);
    }

    #[tokio::test]
    async fn test_invalid_declarations_are_skipped() {
        let source = FixedSource::new(&[("cpu.temp", Some(50.0))]);
        let mut sup = supervisor(source, ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        let monitors = [
            rule("cpu.temp", "0.2", "AVG"),
            rule("cpu.temp", "1", "MEDIAN"),
            rule("gpu.temp", "1", "AVG"),
            rule("cpu", "1", "AVG"),
            rule("cpu.temp", "fast", "AVG"),
        ];
        let outcome = sup.start(&monitors, dir.path());
        assert_eq!(outcome.launched, 0);
        assert!(outcome.failures.is_empty());
        assert_eq!(sup.drain().await, None);
    }

    #[tokio::test]
    async fn test_supported_sensors_queried_once() {
        let source = FixedSource::new(&[("cpu.temp", Some(50.0))]);
        let mut sup = supervisor(Arc::clone(&source), ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        sup.start(
            &[rule("cpu.temp", "1", "AVG"), rule("gpu.temp", "1", "AVG")],
            dir.path(),
        );
        sup.drain().await;
        sup.start(&[rule("cpu.temp", "1", "MAX")], dir.path());
        sup.drain().await;
        assert_eq!(source.catalog_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_reduces_samples() {
        let source = FixedSource::new(&[("cpu.temp", Some(42.0))]);
        let mut sup = supervisor(source, ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(&[rule("cpu.temp", "0.5", "AVG")], dir.path());
        assert_eq!(outcome.launched, 1);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(sup.drain().await, Some(MonitorValue::Number(42.0)));
        assert_eq!(sup.active(), 0);
    }

    #[tokio::test]
    async fn test_first_value_wins_and_all_channels_removed() {
        let source = FixedSource::new(&[
            ("cpu.temp", None),
            ("cpu.freq", Some(10.0)),
            ("gpu.temp", Some(20.0)),
        ]);
        let mut sup = supervisor(source, ChannelKind::File);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(
            &[
                rule("cpu.temp", "0.5", "MAX"),
                rule("cpu.freq", "0.5", "MAX"),
                rule("gpu.temp", "0.5", "MAX"),
            ],
            dir.path(),
        );
        assert_eq!(outcome.launched, 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sup.drain().await, Some(MonitorValue::Number(10.0)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_no_runtime_is_scoped_to_sensor() {
        let source = FixedSource::new(&[("cpu.temp", Some(1.0))]);
        let mut sup = supervisor(source, ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(
            &[rule("cpu.temp", "1", "AVG"), rule("sys.time", "", "")],
            dir.path(),
        );
        assert_eq!(outcome.launched, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            &outcome.failures[0],
            MonitorError::NoRuntime { sensor } if sensor == "cpu.temp"
        ));
    }

    #[tokio::test]
    async fn test_oversized_polling_interval_is_skipped() {
        let source = FixedSource::new(&[("cpu.temp", Some(50.0))]);
        let mut sup = supervisor(source, ChannelKind::Memory);
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(
            &[rule("cpu.temp", "1e300", "AVG"), rule("cpu.temp", "inf", "AVG")],
            dir.path(),
        );
        assert_eq!(outcome.launched, 0);
        assert!(outcome.failures.is_empty());
        assert_eq!(sup.drain().await, None);
    }

    #[test]
    fn test_out_of_range_minimal_test_time_uses_default() {
        let monitor = MonitorConfig::default();
        let validation = ValidationConfig {
            minimal_test_time_secs: f64::INFINITY,
        };
        let sup = MonitorSupervisor::new(FixedSource::new(&[]), &monitor, &validation);
        let default_secs = ValidationConfig::default().minimal_test_time_secs;
        assert_eq!(sup.minimal_test_time, Duration::from_secs_f64(default_secs));

        let validation = ValidationConfig {
            minimal_test_time_secs: 1e300,
        };
        let sup = MonitorSupervisor::new(FixedSource::new(&[]), &monitor, &validation);
        assert_eq!(sup.minimal_test_time, Duration::from_secs_f64(default_secs));
    }

    /// Blocks the calling thread on every read.
    struct SlowSource;

    impl SensorSource for SlowSource {
        fn supported_sensors(&self) -> Vec<SensorId> {
            vec![SensorId::new("cpu", "temp")]
        }

        fn read(&self, _sensor: &SensorId) -> Option<f64> {
            std::thread::sleep(Duration::from_millis(300));
            Some(7.0)
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_sensor_read_does_not_stall_runtime() {
        let monitor = MonitorConfig {
            channel: ChannelKind::Memory,
            drain_timeout_ms: 2000,
        };
        let mut sup = MonitorSupervisor::new(
            Arc::new(SlowSource),
            &monitor,
            &ValidationConfig::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let outcome = sup.start(&[rule("cpu.temp", "0.5", "MAX")], dir.path());
        assert_eq!(outcome.launched, 1);

        // A timer on the single runtime thread must still fire promptly while
        // the worker is inside a read.
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_millis(250));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(sup.drain().await, Some(MonitorValue::Number(7.0)));
    }

    #[tokio::test]
    async fn test_worker_stops_when_channel_removed() {
        let source = FixedSource::new(&[("cpu.temp", Some(1.0))]);
        let channel: Arc<dyn SampleChannel> = Arc::new(MemoryChannel::new());
        let (_cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(sample_loop(
            source,
            SensorId::new("cpu", "temp"),
            Arc::clone(&channel),
            Duration::from_millis(10),
            cancelled,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        channel.remove().unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should exit once its channel is gone")
            .unwrap();
    }
}

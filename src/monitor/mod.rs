//! Monitor: schedules probe cycles, folds them into reports and publishes
//! each report to subscribers.

mod broker;
mod mailbox;

pub use broker::*;

use crate::config::{ConfigError, MonitorConfig};
use crate::path::{PathObserver, PathStatus};
use crate::probe::{run_cycle, ProbeCycleResult, Prober};
use crate::report::Report;
use crate::window::SlidingWindow;

use mailbox::Mailbox;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Monitor error types.
#[derive(Error, Debug, PartialEq)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,
    #[error("invalid monitor configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// An event feeding the consumption loop.
#[derive(Debug, Clone)]
pub(crate) enum Update {
    Path(PathStatus),
    Probe(ProbeCycleResult),
}

/// Window and latest report, owned by the consumption loop alone.
pub(crate) struct MonitorState {
    window: SlidingWindow,
    report: Option<Arc<Report>>,
}

impl MonitorState {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window: SlidingWindow::new(window),
            report: None,
        }
    }

    /// Fold one update into the state and return the rebuilt report.
    pub(crate) fn apply(&mut self, update: Update) -> Arc<Report> {
        let report = match update {
            Update::Path(status) => match &self.report {
                Some(prev) => prev.with_path(Utc::now(), status),
                None => Report::empty(Utc::now(), status),
            },
            Update::Probe(result) => {
                let (path_status, timestamp) = match &self.report {
                    Some(prev) => (prev.path_status, result.timestamp.max(prev.timestamp)),
                    None => (PathStatus::default(), result.timestamp),
                };
                self.window.push(result);
                match self.window.latest() {
                    Some(latest) => {
                        Report::from_window(timestamp, path_status, latest, &self.window)
                    }
                    None => Report::empty(timestamp, path_status),
                }
            }
        };

        let report = Arc::new(report);
        self.report = Some(report.clone());
        report
    }
}

/// Connectivity monitor.
///
/// Runs a path observer and a periodic probe ticker, merges their events
/// through a newest-wins mailbox and publishes a fresh [`Report`] for each
/// consumed event.
pub struct Monitor<P: Prober, O: PathObserver> {
    config: Arc<MonitorConfig>,
    prober: Arc<P>,
    observer: Arc<O>,
    running: AtomicBool,
    report: RwLock<Option<Arc<Report>>>,
    broker: Broker,
}

impl<P: Prober, O: PathObserver> Monitor<P, O> {
    pub fn new(config: MonitorConfig, prober: P, observer: O) -> Self {
        let broker = Broker::new();
        broker.open();

        Self {
            config: Arc::new(config),
            prober: Arc::new(prober),
            observer: Arc::new(observer),
            running: AtomicBool::new(false),
            report: RwLock::new(None),
            broker,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Latest report, if any update has been processed.
    pub fn report(&self) -> Option<Arc<Report>> {
        self.report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to reports published from now on.
    ///
    /// A subscription taken before the first run follows that run. Once the
    /// monitor has stopped, new subscriptions are already complete.
    pub fn subscribe(&self) -> Subscription {
        self.broker.subscribe()
    }

    /// Run the monitor until `cancel` fires or the returned future is dropped.
    ///
    /// Fails immediately if the monitor is already running; the existing
    /// run is not affected. An invalid configuration is rejected before
    /// anything starts.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), MonitorError> {
        self.config.validate()?;

        // subscribers that see `is_running` must find the broker open
        let admitted = self.broker.open_if(|| {
            let won = self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok();
            if won {
                *self.report.write().unwrap_or_else(PoisonError::into_inner) = None;
            }
            won
        });
        if !admitted {
            return Err(MonitorError::AlreadyRunning);
        }

        tracing::info!(
            "Monitor: starting with {} UDP and {} HTTP targets, interval {:?}, window {}",
            self.config.udp_targets.len(),
            self.config.http_targets.len(),
            self.config.interval,
            self.config.window
        );

        let mailbox = Arc::new(Mailbox::new());
        let producers = cancel.child_token();

        let path_task = tokio::spawn(run_path_watch(
            self.observer.clone(),
            mailbox.clone(),
            producers.clone(),
        ));
        let probe_task = tokio::spawn(run_probe_ticker(
            self.prober.clone(),
            self.config.clone(),
            mailbox.clone(),
            producers.clone(),
        ));

        let _guard = RunGuard {
            running: &self.running,
            broker: &self.broker,
            producers,
            tasks: [path_task, probe_task],
        };

        let mut state = MonitorState::new(self.config.window);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = mailbox.recv() => {
                    let report = state.apply(update);
                    *self.report.write().unwrap_or_else(PoisonError::into_inner) =
                        Some(report.clone());
                    let delivered = self.broker.publish(report.clone());
                    tracing::debug!(
                        "Monitor: published report ({:?}, {:?}) to {} subscribers",
                        report.path_status,
                        report.quality(),
                        delivered
                    );
                }
            }
        }

        Ok(())
    }
}

/// Tears a run down however `start` exits.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    broker: &'a Broker,
    producers: CancellationToken,
    tasks: [JoinHandle<()>; 2],
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.producers.cancel();
        for task in &self.tasks {
            task.abort();
        }
        let running = self.running;
        self.broker.close_then(|| running.store(false, Ordering::Release));
        tracing::info!("Monitor: stopped");
    }
}

/// Forward path-status transitions into the mailbox.
async fn run_path_watch<O: PathObserver>(
    observer: Arc<O>,
    mailbox: Arc<Mailbox<Update>>,
    cancel: CancellationToken,
) {
    let mut statuses = observer.watch();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            status = statuses.recv() => {
                let Some(status) = status else {
                    tracing::warn!("Monitor: path observer stopped reporting");
                    break;
                };
                if let Some(dropped) = mailbox.push(Update::Path(status)) {
                    tracing::warn!(
                        "Monitor: update superseded before processing: {}",
                        kind(&dropped)
                    );
                }
            }
        }
    }
}

/// Fire a probe cycle immediately and then every `interval`.
///
/// Cycles run on their own tasks so a slow cycle never delays the next tick.
/// Cycles still in flight when cancelled are abandoned.
async fn run_probe_ticker<P: Prober>(
    prober: Arc<P>,
    config: Arc<MonitorConfig>,
    mailbox: Arc<Mailbox<Update>>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut cycles = JoinSet::new();
    let mut first = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined {
                    tracing::error!("Monitor: probe cycle task failed: {}", e);
                }
            }
            _ = interval.tick() => {
                let slack = if first { Duration::ZERO } else { tick_slack(config.tolerance) };
                first = false;

                let prober = prober.clone();
                let config = config.clone();
                let mailbox = mailbox.clone();

                cycles.spawn(async move {
                    tokio::time::sleep(slack).await;
                    let result = run_cycle(prober.as_ref(), &config).await;
                    if let Some(dropped) = mailbox.push(Update::Probe(result)) {
                        tracing::warn!(
                            "Monitor: update superseded before processing: {}",
                            kind(&dropped)
                        );
                    }
                });
            }
        }
    }

    cycles.abort_all();
}

/// Random delay in `[0, tolerance)`.
fn tick_slack(tolerance: Duration) -> Duration {
    let millis = tolerance.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random::<u64>() % millis)
}

fn kind(update: &Update) -> &'static str {
    match update {
        Update::Path(_) => "path",
        Update::Probe(_) => "probe",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Protocol, Sample};
    use crate::report::Quality;
    use chrono::{DateTime, Duration as ChronoDuration};
    use tokio::sync::mpsc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn cycle_at(timestamp: DateTime<Utc>, udp: Option<u64>, http: Option<u64>) -> ProbeCycleResult {
        let sample = |protocol, target: &str, v: Option<u64>| match v {
            Some(v) => Sample::success(protocol, target, ms(v)),
            None => Sample::failure(protocol, target),
        };
        ProbeCycleResult {
            timestamp,
            udp_samples: vec![sample(Protocol::Udp, "1.1.1.1", udp)],
            http_samples: vec![sample(Protocol::Http, "http://check", http)],
        }
    }

    fn cycle(udp: Option<u64>, http: Option<u64>) -> Update {
        Update::Probe(cycle_at(Utc::now(), udp, http))
    }

    /// Every probe succeeds after `delay`.
    struct FixedProber {
        delay: Duration,
    }

    impl Prober for FixedProber {
        async fn probe_udp(&self, host: &str) -> Sample {
            tokio::time::sleep(self.delay).await;
            Sample::success(Protocol::Udp, host, self.delay)
        }

        async fn probe_http(&self, url: &str) -> Sample {
            tokio::time::sleep(self.delay).await;
            Sample::success(Protocol::Http, url, self.delay)
        }
    }

    /// Reports a fixed status once and then stays silent.
    struct FixedObserver(PathStatus);

    impl PathObserver for FixedObserver {
        fn watch(&self) -> mpsc::Receiver<PathStatus> {
            let (tx, rx) = mpsc::channel(1);
            let status = self.0;
            tokio::spawn(async move {
                let _ = tx.send(status).await;
                tx.closed().await;
            });
            rx
        }
    }

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(1),
            tolerance: Duration::ZERO,
            udp_targets: vec!["1.1.1.1".into()],
            http_targets: vec!["http://check".into()],
            window: 3,
        }
    }

    fn monitor_with(config: MonitorConfig) -> Arc<Monitor<FixedProber, FixedObserver>> {
        Arc::new(Monitor::new(
            config,
            FixedProber { delay: ms(10) },
            FixedObserver(PathStatus::Satisfied),
        ))
    }

    fn test_monitor() -> Arc<Monitor<FixedProber, FixedObserver>> {
        monitor_with(test_config())
    }

    async fn wait_running(monitor: &Monitor<FixedProber, FixedObserver>) {
        while !monitor.is_running() {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_path_update_without_samples() {
        let mut state = MonitorState::new(3);
        let report = state.apply(Update::Path(PathStatus::Satisfied));

        assert_eq!(report.path_status, PathStatus::Satisfied);
        assert!(report.dns_samples.is_empty());
        assert_eq!(report.rate(), 0.0);
        assert_eq!(report.quality(), Quality::Disconnected);
    }

    #[test]
    fn test_probe_before_path_status() {
        let mut state = MonitorState::new(3);
        let report = state.apply(cycle(Some(5), Some(5)));

        assert_eq!(report.path_status, PathStatus::RequiresConnection);
        assert_eq!(report.http_samples.len(), 1);
        assert_eq!(report.quality(), Quality::Disconnected);
    }

    #[test]
    fn test_path_update_keeps_samples() {
        let mut state = MonitorState::new(3);
        state.apply(cycle(Some(5), Some(5)));
        state.apply(cycle(Some(9), Some(15)));
        let before = state.apply(Update::Path(PathStatus::Satisfied));
        let after = state.apply(Update::Path(PathStatus::Unsatisfied));

        assert_eq!(after.path_status, PathStatus::Unsatisfied);
        assert_eq!(after.http_samples, before.http_samples);
        assert_eq!(after.dns_jitter, before.dns_jitter);
        assert_eq!(after.http_jitter, before.http_jitter);
        assert_eq!(after.window_len(), 2);
    }

    #[test]
    fn test_probe_timestamp_never_goes_back() {
        let mut state = MonitorState::new(3);
        let first = state.apply(Update::Path(PathStatus::Satisfied));

        let stale = first.timestamp - ChronoDuration::seconds(30);
        let report = state.apply(Update::Probe(cycle_at(stale, Some(5), Some(5))));
        assert_eq!(report.timestamp, first.timestamp);
        assert_eq!(report.path_status, PathStatus::Satisfied);

        let fresh = first.timestamp + ChronoDuration::seconds(30);
        let report = state.apply(Update::Probe(cycle_at(fresh, Some(5), Some(5))));
        assert_eq!(report.timestamp, fresh);
    }

    #[test]
    fn test_evicted_cycle_leaves_statistics() {
        let mut state = MonitorState::new(2);
        state.apply(Update::Path(PathStatus::Satisfied));
        state.apply(cycle(None, Some(500)));
        state.apply(cycle(Some(10), Some(10)));
        let report = state.apply(cycle(Some(10), Some(10)));

        // the 500ms sample and the failed probe are gone
        assert_eq!(report.window_len(), 2);
        assert_eq!(report.http_jitter, Duration::ZERO);
        assert_eq!(report.rate(), 1.0);
        assert!((report.all().unwrap().mean.as_secs_f64() - 0.010).abs() < 1e-6);
        assert_eq!(report.quality(), Quality::Excellent);
    }

    #[test]
    fn test_three_cycle_session() {
        let mut state = MonitorState::new(3);
        state.apply(Update::Path(PathStatus::Satisfied));
        state.apply(cycle(Some(20), Some(30)));
        state.apply(cycle(None, Some(40)));
        let report = state.apply(cycle(Some(25), Some(35)));

        assert!((report.rate() - 5.0 / 6.0).abs() < 1e-9);
        assert!((report.http_jitter.as_secs_f64() - 0.005).abs() < 1e-6);
        assert_eq!(report.quality(), Quality::Poor);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_reports() {
        let monitor = test_monitor();
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        wait_running(&monitor).await;
        let mut sub = monitor.subscribe();

        let mut probe_reports = 0;
        while probe_reports < 3 {
            let report = tokio::time::timeout(Duration::from_secs(10), sub.recv())
                .await
                .unwrap()
                .unwrap();
            if !report.http_samples.is_empty() {
                probe_reports += 1;
            }
        }

        let current = monitor.report().unwrap();
        assert!(current.window_len() <= 3);

        cancel.cancel();
        tokio_test::assert_ok!(run.await.unwrap());
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_before_start_follows_run() {
        let monitor = test_monitor();
        let mut sub = monitor.subscribe();

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        let report = tokio::time::timeout(Duration::from_secs(10), sub.recv()).await;
        assert!(report.unwrap().is_some());

        cancel.cancel();
        run.await.unwrap().unwrap();
        while sub.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected() {
        let monitor = test_monitor();
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        wait_running(&monitor).await;
        let mut sub = monitor.subscribe();

        let second = monitor.start(CancellationToken::new()).await;
        assert_eq!(second, Err(MonitorError::AlreadyRunning));

        // first run still publishes
        assert!(monitor.is_running());
        let report = tokio::time::timeout(Duration::from_secs(10), sub.recv()).await;
        assert!(report.unwrap().is_some());

        cancel.cancel();
        tokio_test::assert_ok!(run.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_completes_subscribers() {
        let monitor = test_monitor();
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        wait_running(&monitor).await;
        let mut a = monitor.subscribe();
        let mut b = monitor.subscribe();

        cancel.cancel();
        run.await.unwrap().unwrap();

        // drain anything published before the stop, then the stream ends
        while a.recv().await.is_some() {}
        while b.recv().await.is_some() {}
        assert!(!monitor.is_running());

        let mut late = monitor.subscribe();
        assert!(late.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_run_stops_monitor() {
        let monitor = test_monitor();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.start(CancellationToken::new()).await }
        });

        wait_running(&monitor).await;
        let mut sub = monitor.subscribe();

        run.abort();
        let _ = run.await;

        assert!(!monitor.is_running());
        while sub.recv().await.is_some() {}

        // a fresh run can start afterwards
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(monitor.start(cancel).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_identical_sequence() {
        let monitor = test_monitor();
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        wait_running(&monitor).await;
        let mut a = monitor.subscribe();
        let mut b = monitor.subscribe();

        let mut seen_a = Vec::new();
        for _ in 0..4 {
            let report = tokio::time::timeout(Duration::from_secs(10), a.recv())
                .await
                .unwrap()
                .unwrap();
            seen_a.push(report);
        }
        // b stops listening midway
        for expected in &seen_a[..2] {
            let report = b.recv().await.unwrap();
            assert!(Arc::ptr_eq(&report, expected));
        }
        b.unsubscribe();

        let report = tokio::time::timeout(Duration::from_secs(10), a.recv()).await.unwrap();
        assert!(report.is_some());

        cancel.cancel();
        run.await.unwrap().unwrap();
    }

    #[test]
    fn test_tick_slack_within_tolerance() {
        assert_eq!(tick_slack(Duration::ZERO), Duration::ZERO);
        assert_eq!(tick_slack(Duration::from_micros(500)), Duration::ZERO);

        let tolerance = ms(250);
        for _ in 0..1000 {
            assert!(tick_slack(tolerance) < tolerance);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() {
        let monitor = monitor_with(MonitorConfig {
            interval: Duration::ZERO,
            ..test_config()
        });
        let mut sub = monitor.subscribe();

        let result = monitor.start(CancellationToken::new()).await;
        assert_eq!(result, Err(MonitorError::InvalidConfig(ConfigError::ZeroInterval)));
        assert!(!monitor.is_running());
        assert!(monitor.report().is_none());

        let report = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await;
        assert!(report.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cycle_runs_at_start() {
        let interval = Duration::from_secs(60);
        let monitor = monitor_with(MonitorConfig {
            interval,
            tolerance: Duration::from_secs(30),
            ..test_config()
        });
        let mut sub = monitor.subscribe();

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let monitor = monitor.clone();
            let cancel = cancel.clone();
            async move { monitor.start(cancel).await }
        });

        // no tolerance slack on the first tick and no wait for a full interval
        let first_probe = tokio::time::timeout(ms(100), async {
            loop {
                let report = sub.recv().await.unwrap();
                if !report.http_samples.is_empty() {
                    return report;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(first_probe.window_len(), 1);

        cancel.cancel();
        tokio_test::assert_ok!(run.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_running_monitor_accepts_subscribers_after_restart() {
        let monitor = test_monitor();

        for _ in 0..5 {
            let cancel = CancellationToken::new();
            let run = tokio::spawn({
                let monitor = monitor.clone();
                let cancel = cancel.clone();
                async move { monitor.start(cancel).await }
            });

            wait_running(&monitor).await;
            let mut sub = monitor.subscribe();
            let report = tokio::time::timeout(Duration::from_secs(5), sub.recv()).await;
            assert!(report.unwrap().is_some());

            cancel.cancel();
            run.await.unwrap().unwrap();
            assert!(!monitor.is_running());
        }
    }
}

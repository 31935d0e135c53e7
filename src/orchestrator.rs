use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::candle::{Candle, load_candles_from_csv, resample};
use crate::config::EngineConfig;
use crate::history::RollingHistory;
use crate::live::{ActiveConfig, LiveEngine, LiveSignal};
use crate::walkforward::{OptimizationReport, OptimizeError, WalkForwardOptimizer};

/// Source of bulk history, reloaded at startup and on every calendar recalibration.
pub trait DataProvider: Send + Sync {
    fn load_history(&self) -> Result<Vec<Candle>>;
}

/// Reads M1 candles from a CSV file and resamples them to the engine timeframe.
#[derive(Clone, Debug)]
pub struct CsvDataProvider {
    path: PathBuf,
    timeframe_minutes: u32,
}

impl CsvDataProvider {
    pub fn new(path: impl Into<PathBuf>, timeframe_minutes: u32) -> Self {
        Self {
            path: path.into(),
            timeframe_minutes,
        }
    }
}

impl DataProvider for CsvDataProvider {
    fn load_history(&self) -> Result<Vec<Candle>> {
        let m1 = load_candles_from_csv(&self.path)?;
        let candles = resample(&m1, self.timeframe_minutes);
        info!(
            path = %self.path.display(),
            raw = m1.len(),
            resampled = candles.len(),
            timeframe = self.timeframe_minutes,
            "loaded history"
        );
        Ok(candles)
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct OptimizationJob {
    id: u64,
    history: Vec<Candle>,
}

/// What the background worker did with one submitted snapshot.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: u64,
    pub result: Result<OptimizationReport, OptimizeError>,
    /// Version of the active configuration after a swap, if one happened.
    pub swapped_version: Option<u64>,
}

fn run_worker(
    optimizer: WalkForwardOptimizer,
    active: ActiveConfig,
    jobs: Receiver<OptimizationJob>,
    reports: Sender<JobReport>,
) {
    while let Ok(job) = jobs.recv() {
        debug!(job = job.id, candles = job.history.len(), "optimization started");
        let result = optimizer.run(&job.history);
        let mut swapped_version = None;
        match &result {
            Ok(report) => match report.outcome.accepted() {
                Some(params) => {
                    let version = active.store(*params);
                    info!(
                        job = job.id,
                        version,
                        ratio = report.holdout_ratio.unwrap_or_default(),
                        "accepted parameters swapped into live engine"
                    );
                    swapped_version = Some(version);
                }
                None => info!(job = job.id, "{}; keeping active configuration", report.outcome),
            },
            Err(e) => warn!(
                job = job.id,
                "optimization cycle failed: {e}; keeping active configuration"
            ),
        }
        let report = JobReport {
            job_id: job.id,
            result,
            swapped_version,
        };
        if reports.send(report).is_err() {
            break;
        }
    }
    debug!("optimization worker stopped");
}

/// Owns the rolling history and the live engine, feeds snapshots to a single
/// background walk-forward worker and recalibrates on a calendar schedule.
pub struct Orchestrator {
    cfg: EngineConfig,
    history: RollingHistory,
    live: LiveEngine,
    active: ActiveConfig,
    provider: Arc<dyn DataProvider>,
    clock: Arc<dyn Clock>,
    jobs: Option<SyncSender<OptimizationJob>>,
    reports: Receiver<JobReport>,
    backlog: VecDeque<JobReport>,
    worker: Option<JoinHandle<()>>,
    next_job: u64,
    candles_since_trigger: usize,
    last_recalibration: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        cfg: EngineConfig,
        optimizer: WalkForwardOptimizer,
        provider: Arc<dyn DataProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let active = ActiveConfig::new(cfg.default_params);
        // one job may wait while another runs
        let (job_tx, job_rx) = mpsc::sync_channel(1);
        let (report_tx, report_rx) = mpsc::channel();
        let worker_config = active.clone();
        let worker = thread::Builder::new()
            .name("walk-forward".into())
            .spawn(move || run_worker(optimizer, worker_config, job_rx, report_tx))
            .context("failed to spawn optimization worker")?;

        let last_recalibration = clock.now();
        Ok(Self {
            history: RollingHistory::new(cfg.history_size),
            live: LiveEngine::new(active.clone()),
            active,
            provider,
            clock,
            jobs: Some(job_tx),
            reports: report_rx,
            backlog: VecDeque::new(),
            worker: Some(worker),
            next_job: 0,
            candles_since_trigger: 0,
            last_recalibration,
            cfg,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn active_config(&self) -> &ActiveConfig {
        &self.active
    }

    pub fn history(&self) -> &RollingHistory {
        &self.history
    }

    pub fn candles_since_trigger(&self) -> usize {
        self.candles_since_trigger
    }

    /// Reloads history from the provider, then runs one optimization and waits for it.
    pub fn initialize(&mut self) -> Result<JobReport> {
        let candles = self
            .provider
            .load_history()
            .context("failed to load history")?;
        self.history.reset(&candles);
        self.candles_since_trigger = 0;
        self.last_recalibration = self.clock.now();
        info!(candles = self.history.len(), "history seeded");

        let id = self.next_id();
        self.sender()?
            .send(OptimizationJob {
                id,
                history: self.history.snapshot(),
            })
            .map_err(|_| anyhow!("optimization worker is gone"))?;
        self.wait_for(id)
    }

    /// Foreground path for one closed candle. Optimization runs elsewhere; only a
    /// due calendar recalibration blocks here.
    pub fn on_candle(&mut self, candle: Candle) -> LiveSignal {
        let prev = self.history.last().copied().unwrap_or(candle);
        let signal = self.live.on_candle(&candle, &prev);
        self.history.push(candle);

        self.candles_since_trigger += 1;
        if self.candles_since_trigger >= self.cfg.optimization_interval {
            self.candles_since_trigger = 0;
            self.trigger();
        }

        if self.recalibration_due() {
            info!(
                days = self.cfg.recalibration_days,
                "calendar recalibration due; reloading history"
            );
            match self.initialize() {
                Ok(report) => self.backlog.push_back(report),
                Err(e) => {
                    warn!("recalibration failed: {e:#}; continuing with current history");
                    self.last_recalibration = self.clock.now();
                }
            }
        }
        signal
    }

    /// Hands the current history to the worker unless a job is already waiting.
    /// Returns whether the snapshot was queued.
    pub fn trigger(&mut self) -> bool {
        let Some(jobs) = self.jobs.as_ref() else {
            return false;
        };
        let job = OptimizationJob {
            id: self.next_job + 1,
            history: self.history.snapshot(),
        };
        match jobs.try_send(job) {
            Ok(()) => {
                self.next_job += 1;
                debug!(job = self.next_job, "optimization queued");
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("optimization already pending; trigger dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("optimization worker is gone; trigger dropped");
                false
            }
        }
    }

    /// Reports finished since the last call, oldest first.
    pub fn poll_reports(&mut self) -> Vec<JobReport> {
        let mut out: Vec<JobReport> = self.backlog.drain(..).collect();
        out.extend(self.reports.try_iter());
        out
    }

    pub fn recv_report_timeout(&mut self, timeout: Duration) -> Option<JobReport> {
        self.backlog
            .pop_front()
            .or_else(|| self.reports.recv_timeout(timeout).ok())
    }

    fn recalibration_due(&self) -> bool {
        let period = TimeDelta::days(i64::from(self.cfg.recalibration_days));
        self.clock.now() - self.last_recalibration >= period
    }

    fn next_id(&mut self) -> u64 {
        self.next_job += 1;
        self.next_job
    }

    fn sender(&self) -> Result<&SyncSender<OptimizationJob>> {
        self.jobs
            .as_ref()
            .ok_or_else(|| anyhow!("orchestrator is shut down"))
    }

    fn wait_for(&mut self, id: u64) -> Result<JobReport> {
        loop {
            let report = self
                .reports
                .recv()
                .map_err(|_| anyhow!("optimization worker stopped before job {id} finished"))?;
            if report.job_id == id {
                return Ok(report);
            }
            self.backlog.push_back(report);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("optimization worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::device::{ComputeDevice, CpuDevice};
    use crate::dispatch::Dispatcher;
    use crate::sampler::ParameterSampler;
    use crate::walkforward::{RejectReason, WalkForwardOutcome};

    struct FlatProvider {
        len: usize,
        loads: Mutex<usize>,
    }

    impl DataProvider for FlatProvider {
        fn load_history(&self) -> Result<Vec<Candle>> {
            *self.loads.lock().unwrap() += 1;
            Ok((0..self.len as i64)
                .map(|i| Candle::flat(i * 900, 1.1))
                .collect())
        }
    }

    struct FakeClock(Mutex<DateTime<Utc>>);

    impl FakeClock {
        fn advance(&self, by: TimeDelta) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn orchestrator(
        cfg: EngineConfig,
        provider: Arc<FlatProvider>,
        clock: Arc<FakeClock>,
    ) -> Orchestrator {
        let dev: Arc<dyn ComputeDevice> = Arc::new(CpuDevice::new("t", 1).unwrap());
        let optimizer = WalkForwardOptimizer::new(
            ParameterSampler::new(cfg.sample_count, cfg.seed, cfg.risk_fraction),
            Dispatcher::new(vec![dev]),
            cfg.train_ratio,
            cfg.min_history,
        );
        Orchestrator::new(cfg, optimizer, provider, clock).unwrap()
    }

    fn small_config() -> EngineConfig {
        EngineConfig {
            history_size: 1200,
            optimization_interval: 10,
            sample_count: 8,
            ..EngineConfig::default()
        }
    }

    fn clock() -> Arc<FakeClock> {
        Arc::new(FakeClock(Mutex::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )))
    }

    #[test]
    fn initialize_seeds_history_and_keeps_default_on_rejection() {
        let provider = Arc::new(FlatProvider {
            len: 1500,
            loads: Mutex::new(0),
        });
        let mut orch = orchestrator(small_config(), provider, clock());
        let report = orch.initialize().unwrap();
        assert_eq!(orch.history().len(), 1200);
        let outcome = report.result.unwrap().outcome;
        assert_eq!(
            outcome,
            WalkForwardOutcome::Rejected(RejectReason::NoValidCandidate)
        );
        assert_eq!(report.swapped_version, None);
        assert_eq!(orch.active_config().version(), 0);
        assert_eq!(*orch.active_config().load(), orch.config().default_params);
    }

    #[test]
    fn triggers_every_interval_and_history_stays_bounded() {
        let provider = Arc::new(FlatProvider {
            len: 1200,
            loads: Mutex::new(0),
        });
        let mut orch = orchestrator(small_config(), provider, clock());
        orch.initialize().unwrap();

        for i in 0..25 {
            orch.on_candle(Candle::flat(1200 * 900 + i * 900, 1.1));
        }
        assert_eq!(orch.history().len(), 1200);
        assert_eq!(orch.candles_since_trigger(), 5);

        let mut reports = Vec::new();
        while let Some(r) = orch.recv_report_timeout(Duration::from_secs(5)) {
            reports.push(r);
            if reports.len() == 2 {
                break;
            }
        }
        assert!(!reports.is_empty());
        for r in &reports {
            assert!(r.job_id > 1);
            assert_eq!(r.swapped_version, None);
        }
    }

    #[test]
    fn insufficient_history_is_reported_not_fatal() {
        let provider = Arc::new(FlatProvider {
            len: 50,
            loads: Mutex::new(0),
        });
        let mut orch = orchestrator(small_config(), provider, clock());
        let report = orch.initialize().unwrap();
        assert!(matches!(
            report.result,
            Err(OptimizeError::InsufficientHistory { have: 50, .. })
        ));
        let out = orch.on_candle(Candle::flat(50 * 900, 1.1));
        assert!(out.latency < Duration::from_secs(1));
        assert_eq!(orch.history().len(), 51);
    }

    #[test]
    fn calendar_recalibration_reloads_history() {
        let provider = Arc::new(FlatProvider {
            len: 500,
            loads: Mutex::new(0),
        });
        let clock = clock();
        let cfg = EngineConfig {
            optimization_interval: 1_000,
            ..small_config()
        };
        let mut orch = orchestrator(cfg, Arc::clone(&provider), Arc::clone(&clock));
        orch.initialize().unwrap();
        assert_eq!(*provider.loads.lock().unwrap(), 1);

        orch.on_candle(Candle::flat(500 * 900, 1.1));
        assert_eq!(*provider.loads.lock().unwrap(), 1);
        assert_eq!(orch.history().len(), 501);

        clock.advance(TimeDelta::days(7));
        orch.on_candle(Candle::flat(501 * 900, 1.1));
        assert_eq!(*provider.loads.lock().unwrap(), 2);
        assert_eq!(orch.history().len(), 500);
        assert_eq!(orch.candles_since_trigger(), 0);

        let reports = orch.poll_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job_id, 2);
    }
}

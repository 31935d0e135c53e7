use std::sync::Arc;

use chrono::{DateTime, Utc};
use portfolio_optimizer::device::{ComputeDevice, CpuDevice, DeviceError};
use portfolio_optimizer::indicators::KernelBar;
use portfolio_optimizer::kernel::{FORCED_NET_PROFIT, KILL_SWITCH_DRAWDOWN};
use portfolio_optimizer::orchestrator::{Clock, JobReport};
use portfolio_optimizer::params::{FIELD_NAMES, ParameterVector, ScalperParams};
use portfolio_optimizer::sampler::ParamDomain;
use portfolio_optimizer::walkforward::{MIN_HOLDOUT_RATIO, RejectReason};
use portfolio_optimizer::{
    Candle, DataProvider, Dispatcher, EngineConfig, Orchestrator, ParameterSampler,
    SimulationResult, WalkForwardOptimizer, WalkForwardOutcome, simulate,
};

const DAY: i64 = 86_400;

fn bar(close: f64, hour: u32) -> KernelBar {
    KernelBar {
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        atr: 1.0,
        hour,
    }
}

fn scalper(period: f64, take_profit: f64, stop_loss: f64) -> ParameterVector {
    let d = ParameterVector::default();
    ParameterVector::new(
        ScalperParams {
            rsi_period: period,
            oversold: 30.0,
            overbought: 70.0,
            take_profit,
            stop_loss,
        },
        *d.breakout(),
        *d.pullback(),
        d.risk_fraction(),
    )
    .unwrap()
}

fn cpu(name: &str) -> Arc<dyn ComputeDevice> {
    Arc::new(CpuDevice::new(name, 2).unwrap())
}

fn optimizer(samples: usize, devices: Vec<Arc<dyn ComputeDevice>>) -> WalkForwardOptimizer {
    WalkForwardOptimizer::new(
        ParameterSampler::new(samples, 42, 0.02),
        Dispatcher::new(devices),
        0.7,
        400,
    )
}

struct StaticHistory(Vec<Candle>);

impl DataProvider for StaticHistory {
    fn load_history(&self) -> anyhow::Result<Vec<Candle>> {
        Ok(self.0.clone())
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }
}

/// Reports the same result for every vector, standing in for a device whose
/// training numbers disagree with the kernel.
struct ScriptedDevice(SimulationResult);

impl ComputeDevice for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute(
        &self,
        _bars: &[KernelBar],
        population: &[ParameterVector],
    ) -> Result<Vec<SimulationResult>, DeviceError> {
        Ok(vec![self.0; population.len()])
    }
}

fn orchestrator_on(optimizer: WalkForwardOptimizer, history: Vec<Candle>) -> Orchestrator {
    Orchestrator::new(
        EngineConfig::default(),
        optimizer,
        Arc::new(StaticHistory(history)),
        Arc::new(FixedClock),
    )
    .unwrap()
}

fn orchestrator(samples: usize, history: Vec<Candle>) -> Orchestrator {
    orchestrator_on(optimizer(samples, vec![cpu("a"), cpu("b")]), history)
}

fn assert_default_kept(orch: &Orchestrator, job: &JobReport) {
    assert_eq!(job.swapped_version, None);
    assert_eq!(orch.active_config().version(), 0);
    assert_eq!(
        *orch.active_config().load(),
        EngineConfig::default().default_params
    );
}

/// Candles whose hours only open the entry gate on engineered bars: slow declines
/// at 02:00, a small up-close at 10:00 that crosses the oscillator up through
/// oversold, then a 21:00 bar whose wick reaches every possible target (a win)
/// or every possible stop (a loss). Closes are the same either way.
struct CycleSeries {
    candles: Vec<Candle>,
    close: f64,
    day: i64,
    second: i64,
}

impl CycleSeries {
    fn new() -> Self {
        Self {
            candles: Vec::new(),
            close: 100.0,
            day: 0,
            second: 0,
        }
    }

    fn decline(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.close -= 0.01;
            let ts = self.day * DAY + 2 * 3600 + self.second;
            self.second += 1;
            let c = self.close;
            self.candles.push(Candle::new(ts, c, c + 0.5, c - 0.5, c));
        }
        self
    }

    fn cycle(&mut self, win: bool) {
        self.decline(30);
        self.close += 0.1;
        let c = self.close;
        let base = self.day * DAY;
        self.candles
            .push(Candle::new(base + 10 * 3600, c, c + 0.5, c - 0.5, c));
        let (high, low) = if win { (c + 20.0, c - 0.5) } else { (c + 0.5, c - 20.0) };
        self.candles
            .push(Candle::new(base + 21 * 3600, c, high, low, c));
        self.day += 1;
        self.second = 0;
    }

    fn wins(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.cycle(true);
        }
        self
    }

    fn losses(&mut self, n: usize) -> &mut Self {
        for _ in 0..n {
            self.cycle(false);
        }
        self
    }

    /// The 2340 candles that put 25 winning trades in the training segment.
    fn training() -> Self {
        let mut s = Self::new();
        s.decline(210).wins(25).decline(1330);
        s
    }

    /// 25 winning trades in the first 70% and 25 in the last 30%.
    fn balanced() -> Vec<Candle> {
        let mut s = Self::training();
        s.decline(210).wins(25);
        s.candles
    }
}

#[test]
fn flat_series_is_rejected_and_configuration_is_unchanged() {
    let candles: Vec<Candle> = (0..1000).map(|i| Candle::flat(i * 900, 1.2345)).collect();
    let mut orch = orchestrator(64, candles);
    let before = *orch.active_config().load();

    let report = orch.initialize().unwrap();
    let report = report.result.unwrap();
    assert_eq!(report.train_len, 700);
    assert_eq!(report.test_len, 300);
    assert_eq!(report.valid_candidates, 0);
    assert_eq!(
        report.outcome,
        WalkForwardOutcome::Rejected(RejectReason::NoValidCandidate)
    );
    assert_eq!(report.outcome.to_string(), "rejected: no valid candidate");
    assert_eq!(orch.active_config().version(), 0);
    assert_eq!(*orch.active_config().load(), before);
    assert_eq!(before, EngineConfig::default().default_params);
}

#[test]
fn single_oscillator_cross_hits_its_target() {
    let mut bars = Vec::new();
    let mut close = 100.0;
    for _ in 0..250 {
        bars.push(bar(close, 2));
        close -= 0.01;
    }
    let entry = close + 0.1;
    bars.push(bar(entry, 10));
    let params = scalper(5.0, 3.0, 2.0);
    // target = entry + atr * take_profit
    bars.push(bar(entry + 3.0, 21));

    let r = simulate(&bars, &params);
    assert_eq!(r.trade_count, 1);
    assert_eq!(r.win_count, 1);

    // size = 50 * 0.02 / (1.0 * 2.0 * 10), pnl = 3.0 * 10 * size
    let size = 50.0 * 0.02 / 20.0;
    let expected = 3.0 * 10.0 * size;
    assert!((r.net_profit - expected).abs() < 1e-9, "net {}", r.net_profit);
    assert!((r.gross_profit - expected).abs() < 1e-9);
    assert_eq!(r.max_drawdown, 0.0);
    assert!(!r.account_blown);
}

#[test]
fn kill_switch_stops_the_replay() {
    let mut bars = Vec::new();
    let mut close = 100.0;
    for _ in 0..210 {
        bars.push(bar(close, 2));
        close -= 0.01;
    }
    for _ in 0..20 {
        for _ in 0..30 {
            close -= 0.01;
            bars.push(bar(close, 2));
        }
        close += 0.1;
        let entry = close;
        bars.push(bar(entry, 10));
        // low = entry - 2.0 breaches stop = entry - 1.0
        close = entry - 1.5;
        bars.push(bar(close, 21));
    }

    // each loss costs 2% of balance; 0.98^12 is the first to cross a 10 unit drawdown
    let r = simulate(&bars, &scalper(5.0, 3.0, 1.0));
    assert_eq!(r.trade_count, 12);
    assert_eq!(r.win_count, 0);
    assert_eq!(r.max_drawdown, KILL_SWITCH_DRAWDOWN);
    assert_eq!(r.net_profit, FORCED_NET_PROFIT);
    assert!(r.account_blown);

    let truncated = simulate(&bars[..210 + 11 * 32], &scalper(5.0, 3.0, 1.0));
    assert_eq!(truncated.trade_count, 11);
    assert!(!truncated.account_blown);
    assert!(truncated.max_drawdown < KILL_SWITCH_DRAWDOWN);
}

#[test]
fn balanced_history_is_accepted_and_swapped_in() {
    let history = CycleSeries::balanced();
    assert_eq!(history.len(), 3350);

    let mut orch = orchestrator(32, history);
    let job = orch.initialize().unwrap();
    let report = job.result.unwrap();
    assert_eq!(report.train_len + report.test_len, 3350);

    // both segments see 25 identical wins from the same starting balance
    let train = report.train.unwrap();
    let test = report.test.unwrap();
    assert_eq!(train.result.trade_count, 25);
    assert_eq!(train.result.win_count, 25);
    assert_eq!(test.result.trade_count, 25);
    assert_eq!(test.result.win_count, 25);
    assert!((test.result.net_profit - train.result.net_profit).abs() < 1e-6);
    assert!((report.holdout_ratio.unwrap() - 1.0).abs() < 1e-6);

    let winner = *report.outcome.accepted().unwrap();
    assert_eq!(winner, train.params);
    assert_eq!(job.swapped_version, Some(1));
    assert_eq!(orch.active_config().version(), 1);
    assert_eq!(*orch.active_config().load(), winner);
}

#[test]
fn holdout_without_trades_is_rejected() {
    let mut s = CycleSeries::training();
    s.decline(1010);
    assert_eq!(s.candles.len(), 3350);

    let mut orch = orchestrator(32, s.candles);
    let job = orch.initialize().unwrap();
    let report = job.result.as_ref().unwrap();
    let train = report.train.unwrap();
    assert_eq!(train.result.trade_count, 25);
    assert!(!train.is_rejected());
    assert_eq!(report.test.unwrap().result.trade_count, 0);
    assert!(report.test.unwrap().is_rejected());
    assert_eq!(report.holdout_ratio, None);
    assert_eq!(
        report.outcome,
        WalkForwardOutcome::Rejected(RejectReason::HoldoutRejected)
    );
    assert_default_kept(&orch, &job);
}

#[test]
fn holdout_collapse_is_rejected_as_overfit() {
    // ten stop-outs then ten wins: a valid holdout far below the loss-free training run
    let mut s = CycleSeries::training();
    s.decline(370).losses(10).wins(10);
    assert_eq!(s.candles.len(), 3350);

    let mut orch = orchestrator(32, s.candles);
    let job = orch.initialize().unwrap();
    let report = job.result.as_ref().unwrap();
    let test = report.test.unwrap();
    assert_eq!(test.result.trade_count, 20);
    assert_eq!(test.result.win_count, 10);
    assert!(!test.is_rejected());
    assert!(test.result.max_drawdown < KILL_SWITCH_DRAWDOWN);

    let WalkForwardOutcome::Rejected(RejectReason::Overfit { ratio }) = report.outcome else {
        panic!("expected overfit, got {}", report.outcome);
    };
    assert!(ratio < MIN_HOLDOUT_RATIO, "ratio {ratio}");
    assert_eq!(report.holdout_ratio, Some(ratio));
    assert_eq!(ratio, test.fitness / report.train.unwrap().fitness);
    assert_default_kept(&orch, &job);
}

#[test]
fn losing_training_winner_is_rejected() {
    // every candidate reports a valid but losing training run
    let losing = SimulationResult {
        net_profit: -4.0,
        trade_count: 25,
        win_count: 5,
        max_drawdown: 5.0,
        gross_profit: 4.0,
        gross_loss: 8.0,
        account_blown: false,
    };
    let scripted: Arc<dyn ComputeDevice> = Arc::new(ScriptedDevice(losing));
    // pinned to the default vector, which trades every holdout cycle
    let pinned = FIELD_NAMES
        .iter()
        .zip(ParameterVector::default().to_array())
        .map(|(&name, v)| ParamDomain {
            name,
            values: vec![v],
        })
        .collect();
    let optimizer = WalkForwardOptimizer::new(
        ParameterSampler::with_domains(pinned, 16, 42, 0.02),
        Dispatcher::new(vec![scripted]),
        0.7,
        400,
    );
    let mut orch = orchestrator_on(optimizer, CycleSeries::balanced());
    let job = orch.initialize().unwrap();
    let report = job.result.as_ref().unwrap();

    let train = report.train.unwrap();
    assert!(train.fitness <= 0.0);
    assert!(!train.is_rejected());
    assert_eq!(report.valid_candidates, 16);
    assert_eq!(train.params, ParameterVector::default());
    let test = report.test.unwrap();
    assert_eq!(test.result.trade_count, 25);
    assert!(!test.is_rejected());
    assert_eq!(
        report.outcome,
        WalkForwardOutcome::Rejected(RejectReason::NonPositiveTraining)
    );
    assert_default_kept(&orch, &job);
}

#[test]
fn rerunning_on_frozen_history_is_idempotent() {
    let history = CycleSeries::balanced();
    let dual = optimizer(48, vec![cpu("a"), cpu("b")]);
    let first = dual.run(&history).unwrap();
    let second = dual.run(&history).unwrap();
    assert_eq!(first.outcome, second.outcome);
    assert_eq!(first.train, second.train);

    let single = optimizer(48, vec![cpu("solo")]).run(&history).unwrap();
    assert_eq!(single.outcome, first.outcome);
    assert_eq!(single.train, first.train);

    let flat: Vec<Candle> = (0..1000).map(|i| Candle::flat(i * 900, 1.0)).collect();
    let a = dual.run(&flat).unwrap();
    let b = dual.run(&flat).unwrap();
    assert_eq!(a.outcome, b.outcome);
}

#[test]
fn live_path_runs_on_every_candle_and_triggers_stay_in_the_background() {
    let history = CycleSeries::balanced();
    let mut orch = orchestrator(16, history[..3000].to_vec());
    orch.initialize().unwrap();
    let version = orch.active_config().version();

    for c in &history[3000..] {
        let out = orch.on_candle(*c);
        assert!((0.0..=100.0).contains(&out.oscillator));
    }
    assert_eq!(orch.history().len(), 3350);
    assert_eq!(orch.candles_since_trigger(), 350 % 100);
    assert!(orch.active_config().version() >= version);
}

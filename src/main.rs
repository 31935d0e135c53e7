use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portfolio_optimizer::orchestrator::JobReport;
use portfolio_optimizer::{
    Candle, CpuDeviceProvider, CsvDataProvider, DataProvider, EngineConfig, Orchestrator,
    SystemClock, WalkForwardOptimizer,
};

#[derive(Parser, Debug)]
#[command(about = "Walk-forward parameter search for a three-strategy portfolio")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one walk-forward cycle over a CSV history and write a JSON report.
    Optimize {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "optimization_report.json")]
        out: PathBuf,
        #[arg(long)]
        samples: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Seed the orchestrator with the head of a CSV and stream the rest through the live path.
    Replay {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 0.8)]
        seed_fraction: f64,
        #[arg(long)]
        samples: Option<usize>,
    },
}

struct FrozenHistory(Vec<Candle>);

impl DataProvider for FrozenHistory {
    fn load_history(&self) -> Result<Vec<Candle>> {
        Ok(self.0.clone())
    }
}

fn load_config(
    path: Option<&Path>,
    samples: Option<usize>,
    seed: Option<u64>,
) -> Result<EngineConfig> {
    let mut cfg = match path {
        Some(p) => EngineConfig::from_json_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(n) = samples {
        cfg.sample_count = n;
    }
    if let Some(s) = seed {
        cfg.seed = s;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn devices(cfg: &EngineConfig) -> CpuDeviceProvider {
    CpuDeviceProvider::new(cfg.device_count, cfg.threads_per_device)
}

fn fmt_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn optimize(data: &Path, cfg: &EngineConfig, out: &Path) -> Result<()> {
    let mut candles = CsvDataProvider::new(data, cfg.timeframe_minutes).load_history()?;
    if candles.is_empty() {
        bail!("no candles parsed from {}", data.display());
    }
    let skip = candles.len().saturating_sub(cfg.history_size);
    candles.drain(..skip);

    println!("data={}", data.display());
    println!(
        "candles={} from={} to={} timeframe={}m samples={} seed={}",
        candles.len(),
        fmt_ts(candles[0].ts),
        fmt_ts(candles[candles.len() - 1].ts),
        cfg.timeframe_minutes,
        cfg.sample_count,
        cfg.seed
    );

    let optimizer = WalkForwardOptimizer::from_config(cfg, &devices(cfg));
    let report = optimizer.run(&candles)?;

    let payload = json!({
        "generated_at_utc": Utc::now().to_rfc3339(),
        "data_file": data,
        "config": cfg,
        "report": report,
    });
    fs::write(out, serde_json::to_string_pretty(&payload)?)
        .with_context(|| format!("failed to write {}", out.display()))?;

    println!("\nSaved report: {}", out.display());
    println!(
        "outcome={} valid={}/{} train={} test={} elapsed={}ms",
        report.outcome,
        report.valid_candidates,
        report.population,
        report.train_len,
        report.test_len,
        report.elapsed_ms
    );
    if let (Some(train), Some(test)) = (report.train, report.test) {
        println!(
            "train fitness={:.2} net={:.2} trades={} | test fitness={:.2} net={:.2} trades={}",
            train.fitness,
            train.result.net_profit,
            train.result.trade_count,
            test.fitness,
            test.result.net_profit,
            test.result.trade_count
        );
    }
    Ok(())
}

fn print_report(r: &JobReport) {
    match &r.result {
        Ok(report) => println!(
            "# job {} {} (valid {}/{}, {}ms)",
            r.job_id, report.outcome, report.valid_candidates, report.population, report.elapsed_ms
        ),
        Err(e) => println!("# job {} failed: {e}", r.job_id),
    }
}

fn replay(data: &Path, cfg: EngineConfig, seed_fraction: f64) -> Result<()> {
    if !(seed_fraction > 0.0 && seed_fraction < 1.0) {
        bail!("--seed-fraction must be in (0, 1)");
    }
    let candles = CsvDataProvider::new(data, cfg.timeframe_minutes).load_history()?;
    let cut = (candles.len() as f64 * seed_fraction) as usize;
    if cut == 0 || cut >= candles.len() {
        bail!("{} candles is too few to replay", candles.len());
    }
    let (seed, stream) = candles.split_at(cut);
    info!(seed = seed.len(), stream = stream.len(), "replay split");

    let optimizer = WalkForwardOptimizer::from_config(&cfg, &devices(&cfg));
    let provider = Arc::new(FrozenHistory(seed.to_vec()));
    let mut orch = Orchestrator::new(cfg, optimizer, provider, Arc::new(SystemClock))?;
    print_report(&orch.initialize()?);

    for c in stream {
        let out = orch.on_candle(*c);
        println!(
            "{} close={:.5} signal={} rsi={:.2} latency={}us",
            fmt_ts(c.ts),
            c.close,
            out.label(),
            out.oscillator,
            out.latency.as_micros()
        );
        for r in orch.poll_reports() {
            print_report(&r);
        }
    }

    println!(
        "\nReplayed {} candles, configuration swaps={}",
        stream.len(),
        orch.active_config().version()
    );
    println!(
        "active={}",
        serde_json::to_string(&*orch.active_config().load())?
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("portfolio_optimizer=info")),
        )
        .init();

    match Args::parse().command {
        Command::Optimize {
            data,
            config,
            out,
            samples,
            seed,
        } => {
            let cfg = load_config(config.as_deref(), samples, seed)?;
            optimize(&data, &cfg, &out)
        }
        Command::Replay {
            data,
            config,
            seed_fraction,
            samples,
        } => {
            let cfg = load_config(config.as_deref(), samples, None)?;
            replay(&data, cfg, seed_fraction)
        }
    }
}

pub mod candle;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod fitness;
pub mod history;
pub mod indicators;
pub mod kernel;
pub mod live;
pub mod orchestrator;
pub mod params;
pub mod sampler;
pub mod walkforward;

pub use candle::Candle;
pub use config::EngineConfig;
pub use device::{ComputeDevice, CpuDevice, CpuDeviceProvider, DeviceProvider};
pub use dispatch::Dispatcher;
pub use kernel::{SimulationResult, simulate};
pub use live::{ActiveConfig, LiveEngine, LiveSignal};
pub use orchestrator::{CsvDataProvider, DataProvider, Orchestrator, SystemClock};
pub use params::ParameterVector;
pub use sampler::ParameterSampler;
pub use walkforward::{OptimizationReport, WalkForwardOptimizer, WalkForwardOutcome};

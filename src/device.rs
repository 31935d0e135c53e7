use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::indicators::KernelBar;
use crate::kernel::{SimulationResult, simulate};
use crate::params::ParameterVector;

#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("device {device} failed to initialize: {reason}")]
    Init { device: String, reason: String },
    #[error("device {device} failed during execution: {reason}")]
    Execution { device: String, reason: String },
    #[error("device {device} returned {got} results for {expected} vectors")]
    ResultSize {
        device: String,
        expected: usize,
        got: usize,
    },
}

/// One independent compute unit able to run the simulation kernel over a population.
pub trait ComputeDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Acquire whatever the device needs for a dispatch cycle.
    fn prepare(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn execute(
        &self,
        bars: &[KernelBar],
        population: &[ParameterVector],
    ) -> Result<Vec<SimulationResult>, DeviceError>;

    fn release(&self) {}
}

pub trait DeviceProvider: Send + Sync {
    fn enumerate(&self) -> Vec<Arc<dyn ComputeDevice>>;
}

/// A device backed by its own rayon thread pool.
pub struct CpuDevice {
    name: String,
    pool: rayon::ThreadPool,
}

impl CpuDevice {
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, DeviceError> {
        let name = name.into();
        let pool_name = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("{pool_name}-{i}"))
            .build()
            .map_err(|e| DeviceError::Init {
                device: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { name, pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl ComputeDevice for CpuDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(
        &self,
        bars: &[KernelBar],
        population: &[ParameterVector],
    ) -> Result<Vec<SimulationResult>, DeviceError> {
        Ok(self.pool.install(|| {
            population
                .par_iter()
                .map(|params| simulate(bars, params))
                .collect()
        }))
    }
}

#[derive(Clone, Debug)]
pub struct CpuDeviceProvider {
    device_count: usize,
    threads_per_device: usize,
}

impl CpuDeviceProvider {
    /// `threads_per_device == 0` splits the machine's parallelism evenly.
    pub fn new(device_count: usize, threads_per_device: usize) -> Self {
        Self {
            device_count,
            threads_per_device,
        }
    }

    fn threads(&self) -> usize {
        if self.threads_per_device > 0 {
            return self.threads_per_device;
        }
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / self.device_count.max(1)).max(1)
    }
}

impl DeviceProvider for CpuDeviceProvider {
    fn enumerate(&self) -> Vec<Arc<dyn ComputeDevice>> {
        let threads = self.threads();
        let mut out: Vec<Arc<dyn ComputeDevice>> = Vec::with_capacity(self.device_count);
        for i in 0..self.device_count {
            match CpuDevice::new(format!("cpu{i}"), threads) {
                Ok(dev) => {
                    info!(device = dev.name(), threads = dev.threads(), "found compute device");
                    out.push(Arc::new(dev));
                }
                Err(e) => warn!("skipping device: {e}"),
            }
        }
        if out.is_empty() {
            warn!("no compute devices available");
        }
        out
    }
}

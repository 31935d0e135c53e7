use std::ops::Range;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

use crate::device::{ComputeDevice, DeviceError, DeviceProvider};
use crate::indicators::KernelBar;
use crate::kernel::SimulationResult;
use crate::params::ParameterVector;

#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("no optimizer available: {failed} device(s) failed, none left to run the population")]
    NoDeviceAvailable { failed: usize },
}

/// Splits a population across every device, runs the partitions concurrently and
/// merges the results back in population order. A failed partition is re-run on
/// the surviving devices.
pub struct Dispatcher {
    devices: Vec<Arc<dyn ComputeDevice>>,
}

impl Dispatcher {
    pub fn new(devices: Vec<Arc<dyn ComputeDevice>>) -> Self {
        Self { devices }
    }

    pub fn from_provider(provider: &dyn DeviceProvider) -> Self {
        Self::new(provider.enumerate())
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn run(
        &self,
        bars: &[KernelBar],
        population: &[ParameterVector],
    ) -> Result<Vec<SimulationResult>, DispatchError> {
        let mut ready: Vec<Arc<dyn ComputeDevice>> = Vec::with_capacity(self.devices.len());
        let mut failed = 0;
        for dev in &self.devices {
            match dev.prepare() {
                Ok(()) => ready.push(Arc::clone(dev)),
                Err(e) => {
                    warn!("{e}; continuing without it");
                    failed += 1;
                }
            }
        }

        let result = run_partitioned(&ready, bars, population, failed);
        for dev in &ready {
            dev.release();
        }
        result
    }
}

fn run_partitioned(
    devices: &[Arc<dyn ComputeDevice>],
    bars: &[KernelBar],
    population: &[ParameterVector],
    failed_so_far: usize,
) -> Result<Vec<SimulationResult>, DispatchError> {
    if devices.is_empty() {
        return Err(DispatchError::NoDeviceAvailable {
            failed: failed_so_far,
        });
    }
    if population.is_empty() {
        return Ok(Vec::new());
    }

    let ranges = partition(population.len(), devices.len());
    debug!(
        devices = devices.len(),
        population = population.len(),
        "dispatching partitions"
    );

    let outcomes: Vec<Result<Vec<SimulationResult>, DeviceError>> = thread::scope(|s| {
        let handles: Vec<_> = devices
            .iter()
            .zip(ranges.iter().cloned())
            .map(|(dev, range)| {
                s.spawn(move || -> Result<Vec<SimulationResult>, DeviceError> {
                    let slice = &population[range];
                    let out = dev.execute(bars, slice)?;
                    if out.len() != slice.len() {
                        return Err(DeviceError::ResultSize {
                            device: dev.name().to_string(),
                            expected: slice.len(),
                            got: out.len(),
                        });
                    }
                    Ok(out)
                })
            })
            .collect();

        handles
            .into_iter()
            .zip(devices)
            .map(|(h, dev)| {
                h.join().unwrap_or_else(|_| {
                    Err(DeviceError::Execution {
                        device: dev.name().to_string(),
                        reason: "worker panicked".to_string(),
                    })
                })
            })
            .collect()
    });

    let survivors: Vec<Arc<dyn ComputeDevice>> = devices
        .iter()
        .zip(&outcomes)
        .filter(|(_, o)| o.is_ok())
        .map(|(d, _)| Arc::clone(d))
        .collect();
    let failed_now = failed_so_far + devices.len() - survivors.len();

    let mut merged = Vec::with_capacity(population.len());
    for (range, outcome) in ranges.into_iter().zip(outcomes) {
        match outcome {
            Ok(results) => merged.extend(results),
            Err(e) => {
                warn!("{e}; re-running {} vectors on remaining devices", range.len());
                merged.extend(run_partitioned(
                    &survivors,
                    bars,
                    &population[range],
                    failed_now,
                )?);
            }
        }
    }
    Ok(merged)
}

/// Even contiguous split; the first `len % parts` ranges get one extra element.
fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let r = start..start + size;
            start += size;
            r
        })
        .collect()
}

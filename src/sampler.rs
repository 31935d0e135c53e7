use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use thiserror::Error;
use tracing::info;

use crate::params::{FIELD_COUNT, FIELD_NAMES, ParamError, ParameterVector};

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("domain for {0} is empty")]
    EmptyDomain(&'static str),
    #[error(transparent)]
    Param(#[from] ParamError),
}

#[derive(Clone, Debug)]
pub struct ParamDomain {
    pub name: &'static str,
    pub values: Vec<f64>,
}

impl ParamDomain {
    fn new(name: &'static str, values: &[f64]) -> Self {
        Self {
            name,
            values: values.to_vec(),
        }
    }

    pub fn contains(&self, v: f64) -> bool {
        self.values.contains(&v)
    }
}

pub fn default_domains() -> Vec<ParamDomain> {
    let n = &FIELD_NAMES;
    vec![
        ParamDomain::new(n[0], &[5.0, 7.0, 9.0, 10.0, 12.0, 14.0]),
        ParamDomain::new(n[1], &[20.0, 25.0, 30.0, 35.0, 40.0]),
        ParamDomain::new(n[2], &[60.0, 65.0, 70.0, 75.0, 80.0]),
        ParamDomain::new(n[3], &[1.5, 2.0, 2.5, 3.0, 4.0, 5.0]),
        ParamDomain::new(n[4], &[1.0, 1.5, 2.0, 2.5, 3.0]),
        ParamDomain::new(n[5], &[10.0, 15.0, 20.0, 25.0, 30.0]),
        ParamDomain::new(n[6], &[1.5, 1.8, 2.0, 2.2, 2.5]),
        ParamDomain::new(n[7], &[200.0, 400.0, 600.0, 800.0, 1000.0]),
        ParamDomain::new(n[8], &[2.0, 4.0, 6.0, 8.0, 10.0]),
        ParamDomain::new(n[9], &[1.0, 1.5, 2.0, 2.5, 3.0]),
        ParamDomain::new(n[10], &[20.0, 25.0, 30.0, 34.0, 40.0, 50.0]),
        ParamDomain::new(n[11], &[100.0, 120.0, 144.0, 180.0, 200.0]),
        ParamDomain::new(n[12], &[30.0, 35.0, 40.0, 45.0, 50.0]),
        ParamDomain::new(n[13], &[2.0, 3.0, 4.0, 5.0, 6.0]),
        ParamDomain::new(n[14], &[1.0, 1.5, 2.0, 2.5, 3.0]),
    ]
}

/// Seeded random sampling of the 15-field cross product. Every field is drawn
/// independently from its own domain.
#[derive(Clone, Debug)]
pub struct ParameterSampler {
    domains: Vec<ParamDomain>,
    sample_count: usize,
    seed: u64,
    risk_fraction: f64,
}

impl ParameterSampler {
    pub fn new(sample_count: usize, seed: u64, risk_fraction: f64) -> Self {
        Self::with_domains(default_domains(), sample_count, seed, risk_fraction)
    }

    pub fn with_domains(
        domains: Vec<ParamDomain>,
        sample_count: usize,
        seed: u64,
        risk_fraction: f64,
    ) -> Self {
        debug_assert_eq!(domains.len(), FIELD_COUNT);
        Self {
            domains,
            sample_count,
            seed,
            risk_fraction,
        }
    }

    pub fn domains(&self) -> &[ParamDomain] {
        &self.domains
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn space_size(&self) -> f64 {
        self.domains.iter().map(|d| d.values.len() as f64).product()
    }

    pub fn sample(&self) -> Result<Vec<ParameterVector>, SamplerError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut population = Vec::with_capacity(self.sample_count);

        for _ in 0..self.sample_count {
            let mut fields = [0.0; FIELD_COUNT];
            for (slot, domain) in fields.iter_mut().zip(&self.domains) {
                *slot = *domain
                    .values
                    .choose(&mut rng)
                    .ok_or(SamplerError::EmptyDomain(domain.name))?;
            }
            population.push(ParameterVector::from_array(fields, self.risk_fraction)?);
        }

        info!(
            samples = population.len(),
            space = self.space_size(),
            seed = self.seed,
            "sampled parameter population"
        );
        Ok(population)
    }
}

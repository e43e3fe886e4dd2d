//! Synthetic runs and recorded datasets
//!
//! This module provides:
//! - [Dataset], the in-memory batch layout the scheduler replays: one row per period holding the
//!   timestamp, the true state, the control input and the measurement
//! - [simulate], which generates a dataset by propagating a process model from an initial state
//!   and observing it through a measurement model, optionally injecting Gaussian noise into the
//!   recorded inputs and measurements
//!
//! Loading datasets from disk is left to the caller.

use crate::dynamics::ProcessModel;
use crate::error::{EstimationError, Result};
use crate::measurements::MeasurementModel;
use crate::{InputVector, Measurement, StateVector, TruthSample};

use nalgebra::DVector;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// One recorded period
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetRow {
    pub timestamp: f64,
    pub truth: StateVector,
    pub input: DVector<f64>,
    pub measurement: DVector<f64>,
}
impl DatasetRow {
    pub fn input_vector(&self) -> InputVector {
        InputVector {
            timestamp: self.timestamp,
            values: self.input.clone(),
        }
    }
    pub fn measurement_sample(&self) -> Measurement {
        Measurement {
            timestamp: self.timestamp,
            values: self.measurement.clone(),
        }
    }
    pub fn truth_sample(&self) -> TruthSample {
        TruthSample {
            timestamp: self.timestamp,
            state: self.truth.clone(),
        }
    }
}

/// An ordered batch of recorded rows
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<DatasetRow>,
}
impl Dataset {
    pub fn new(rows: Vec<DatasetRow>) -> Self {
        Dataset { rows }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, DatasetRow> {
        self.rows.iter()
    }
    /// Tick period implied by the recording: last timestamp divided by the number of rows
    pub fn derived_dt(&self) -> Option<f64> {
        let last = self.rows.last()?;
        let dt = last.timestamp / self.rows.len() as f64;
        (dt.is_finite() && dt > 0.0).then_some(dt)
    }
    pub fn truth_history(&self) -> Vec<StateVector> {
        self.rows.iter().map(|row| row.truth.clone()).collect()
    }
}

/// Standard deviations of the Gaussian noise injected into recorded inputs and measurements.
///
/// An empty list means no noise on that stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoiseLevels {
    #[serde(default)]
    pub input_std: Vec<f64>,
    #[serde(default)]
    pub measurement_std: Vec<f64>,
}
impl NoiseLevels {
    pub fn none() -> Self {
        Self::default()
    }
    pub fn is_noise_free(&self) -> bool {
        self.input_std.iter().chain(&self.measurement_std).all(|s| *s == 0.0)
    }
    /// Check the noise levels against the input and measurement dimensions
    pub fn check(&self, input_dimension: usize, measurement_dimension: usize) -> Result<()> {
        for (name, values, dimension) in [
            ("input_std", &self.input_std, input_dimension),
            ("measurement_std", &self.measurement_std, measurement_dimension),
        ] {
            if !values.is_empty() && values.len() != dimension {
                return Err(EstimationError::Configuration(format!(
                    "{name} has {} entries, expected {dimension}",
                    values.len()
                )));
            }
            if values.iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(EstimationError::Configuration(format!(
                    "{name} entries must be finite and non-negative"
                )));
            }
        }
        Ok(())
    }
}

fn noise_sources(std_devs: &[f64]) -> Result<Vec<Normal<f64>>> {
    std_devs
        .iter()
        .map(|s| {
            Normal::new(0.0, *s).map_err(|e| {
                EstimationError::Configuration(format!("invalid noise level {s}: {e}"))
            })
        })
        .collect()
}

fn perturb(values: &mut DVector<f64>, sources: &[Normal<f64>], rng: &mut StdRng) {
    for (value, source) in values.iter_mut().zip(sources) {
        *value += source.sample(rng);
    }
}

/// `steps` copies of one constant input
pub fn constant_inputs(input: &DVector<f64>, steps: usize) -> Vec<DVector<f64>> {
    vec![input.clone(); steps]
}

/// Generate a dataset of `inputs.len()` rows, one every `dt` seconds starting at t = 0.
///
/// Row `i` holds the true state $x_i$ (with $x_0$ = `initial_state` and
/// $x_{i+1} = g(x_i, u_i)$ under the clean input), the recorded input $u_i$ and the recorded
/// measurement $h(x_i)$, the last two with Gaussian noise added when `noise` asks for it. The same
/// `seed` always reproduces the same dataset.
pub fn simulate(
    process: &dyn ProcessModel,
    measurement: &dyn MeasurementModel,
    initial_state: &StateVector,
    inputs: &[DVector<f64>],
    dt: f64,
    noise: &NoiseLevels,
    seed: u64,
) -> Result<Dataset> {
    if initial_state.len() != process.state_dimension() {
        return Err(EstimationError::Configuration(format!(
            "initial state has {} elements, the process model expects {}",
            initial_state.len(),
            process.state_dimension()
        )));
    }
    if let Some(bad) = inputs.iter().find(|u| u.len() != process.input_dimension()) {
        return Err(EstimationError::Configuration(format!(
            "scenario input has {} elements, the process model expects {}",
            bad.len(),
            process.input_dimension()
        )));
    }
    noise.check(process.input_dimension(), measurement.dimension())?;
    let input_noise = noise_sources(&noise.input_std)?;
    let measurement_noise = noise_sources(&noise.measurement_std)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut rows = Vec::with_capacity(inputs.len());
    let mut state = initial_state.clone();
    for (i, input) in inputs.iter().enumerate() {
        let mut recorded_input = input.clone();
        perturb(&mut recorded_input, &input_noise, &mut rng);
        let mut recorded_measurement = measurement.expected_measurement(&state);
        perturb(&mut recorded_measurement, &measurement_noise, &mut rng);
        let next = process.propagate(&state, input, dt);
        rows.push(DatasetRow {
            timestamp: i as f64 * dt,
            truth: state,
            input: recorded_input,
            measurement: recorded_measurement,
        });
        state = next;
    }
    let noise_label = if noise.is_noise_free() {
        "noise free"
    } else {
        "with injected noise"
    };
    log::debug!(
        "simulated {} rows over {:.3} s ({noise_label})",
        rows.len(),
        rows.last().map_or(0.0, |row| row.timestamp)
    );
    Ok(Dataset::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Landmark;
    use crate::dynamics::{DifferentialDrive, QuadrotorDynamics};
    use crate::measurements::LandmarkRangeBearing;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn noise_free_run_follows_the_model() {
        let process = DifferentialDrive::default();
        let measurement = LandmarkRangeBearing::for_differential_drive(Landmark::planar(0.5, 0.5));
        let inputs = constant_inputs(&DVector::from_vec(vec![5.0, 6.0]), 10);
        let data = simulate(
            &process,
            &measurement,
            &DVector::zeros(6),
            &inputs,
            0.1,
            &NoiseLevels::none(),
            1,
        )
        .unwrap();
        assert_eq!(data.len(), 10);
        assert_eq!(data.rows[0].truth, DVector::zeros(6));
        let expected = process.propagate(&data.rows[3].truth, &inputs[3], 0.1);
        assert_eq!(data.rows[4].truth, expected);
        assert_eq!(data.rows[4].input, inputs[4]);
        assert_eq!(
            data.rows[4].measurement,
            measurement.expected_measurement(&data.rows[4].truth)
        );
        assert_approx_eq!(data.rows[9].timestamp, 0.9, 1e-12);
        assert_approx_eq!(data.derived_dt().unwrap(), 0.09, 1e-12);
    }
    #[test]
    fn noise_is_reproducible() {
        let process = QuadrotorDynamics::default();
        let measurement = LandmarkRangeBearing::for_quadrotor(Landmark::new(0.0, 5.0, 5.0));
        let inputs = constant_inputs(&DVector::from_vec(vec![process.hover_thrust(), 0.0]), 20);
        let noise = NoiseLevels {
            input_std: vec![0.1, 0.001],
            measurement_std: vec![0.05, 0.01],
        };
        assert!(!noise.is_noise_free());
        assert!(NoiseLevels::none().is_noise_free());
        let run = |seed| {
            simulate(
                &process,
                &measurement,
                &DVector::zeros(6),
                &inputs,
                0.05,
                &noise,
                seed,
            )
            .unwrap()
        };
        let first = run(3);
        assert_eq!(first, run(3));
        assert_ne!(first, run(4));
        // truth is propagated with the clean input
        assert!(first.rows[5].truth.norm() < 1e-9);
        assert_ne!(first.rows[5].input, inputs[5]);
    }
    #[test]
    fn bad_scenarios_are_rejected() {
        let process = QuadrotorDynamics::default();
        let measurement = LandmarkRangeBearing::for_quadrotor(Landmark::new(0.0, 5.0, 5.0));
        let inputs = constant_inputs(&DVector::zeros(2), 3);
        let bad_noise = NoiseLevels {
            input_std: vec![0.1],
            measurement_std: vec![],
        };
        assert!(
            simulate(&process, &measurement, &DVector::zeros(6), &inputs, 0.1, &bad_noise, 0)
                .is_err()
        );
        let negative = NoiseLevels {
            input_std: vec![],
            measurement_std: vec![-1.0, 0.0],
        };
        assert!(negative.check(2, 2).is_err());
        assert!(
            simulate(
                &process,
                &measurement,
                &DVector::zeros(5),
                &inputs,
                0.1,
                &NoiseLevels::none(),
                0
            )
            .is_err()
        );
    }
    #[test]
    fn empty_dataset_has_no_dt() {
        assert!(Dataset::default().derived_dt().is_none());
    }
}

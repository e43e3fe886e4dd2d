//! Run configuration
//!
//! A [RunConfig] bundles everything a single estimation run needs: the vehicle and its physical
//! constants, the measurement model, the estimator selection, the tick period and the noise
//! matrices for the filters. A [SimulationConfig] adds a synthetic [ScenarioConfig] on top of it so
//! that a complete run can be described in one file.
//!
//! Configurations serialize to and from JSON, YAML or TOML; [RunConfig::from_file] and
//! [RunConfig::to_file] choose the format by file extension.
//!
//! ```yaml
//! vehicle:
//!   kind: quadrotor
//!   mass: 0.92
//! measurement:
//!   kind: range_bearing
//!   landmark: [0.0, 5.0, 5.0]
//! estimator: extended_kalman_filter
//! dt: 0.1
//! filter:
//!   measurement_offset: 1
//! ```
//!
//! Every value is checked by [RunConfig::validate] before a run starts, so a mismatched noise
//! diagonal or an unknown estimator name surfaces as [EstimationError::Configuration] at setup
//! rather than at tick time.

use crate::Landmark;
use crate::dynamics::{DifferentialDrive, ProcessModel, QuadrotorDynamics};
use crate::error::{EstimationError, Result};
use crate::estimator::EstimatorKind;
use crate::measurements::{LandmarkRangeBearing, MeasurementModel, PositionReadout};
use crate::sim::NoiseLevels;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Vehicle type together with its physical constants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleConfig {
    Quadrotor(QuadrotorDynamics),
    DifferentialDrive(DifferentialDrive),
}
impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleConfig::Quadrotor(QuadrotorDynamics::default())
    }
}
impl VehicleConfig {
    pub fn process_model(&self) -> Arc<dyn ProcessModel> {
        match self {
            VehicleConfig::Quadrotor(model) => Arc::new(*model),
            VehicleConfig::DifferentialDrive(model) => Arc::new(*model),
        }
    }
    pub fn state_dimension(&self) -> usize {
        match self {
            VehicleConfig::Quadrotor(_) => QuadrotorDynamics::STATE_DIMENSION,
            VehicleConfig::DifferentialDrive(_) => DifferentialDrive::STATE_DIMENSION,
        }
    }
    pub fn input_dimension(&self) -> usize {
        match self {
            VehicleConfig::Quadrotor(_) => QuadrotorDynamics::INPUT_DIMENSION,
            VehicleConfig::DifferentialDrive(_) => DifferentialDrive::INPUT_DIMENSION,
        }
    }
    /// Landmark used when the measurement section does not name one
    pub fn default_landmark(&self) -> Landmark {
        match self {
            VehicleConfig::Quadrotor(_) => Landmark::new(0.0, 5.0, 5.0),
            VehicleConfig::DifferentialDrive(_) => Landmark::planar(0.5, 0.5),
        }
    }
    /// Input used for linearization when none is configured: hover thrust for the quadrotor,
    /// stationary wheels for the ground robot.
    pub fn default_nominal_input(&self) -> DVector<f64> {
        match self {
            VehicleConfig::Quadrotor(model) => {
                DVector::from_vec(vec![model.hover_thrust(), 0.0])
            }
            VehicleConfig::DifferentialDrive(_) => {
                DVector::zeros(DifferentialDrive::INPUT_DIMENSION)
            }
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            VehicleConfig::Quadrotor(_) => "quadrotor",
            VehicleConfig::DifferentialDrive(_) => "differential_drive",
        }
    }
}

/// Measurement model selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasurementConfig {
    /// Range to a landmark plus bearing; the vehicle default landmark is used when omitted
    RangeBearing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        landmark: Option<Landmark>,
    },
    /// Direct read-out of the planar position
    Position,
}
impl Default for MeasurementConfig {
    fn default() -> Self {
        MeasurementConfig::RangeBearing { landmark: None }
    }
}
impl MeasurementConfig {
    pub fn measurement_model(&self, vehicle: &VehicleConfig) -> Arc<dyn MeasurementModel> {
        match (self, vehicle) {
            (MeasurementConfig::RangeBearing { landmark }, VehicleConfig::Quadrotor(_)) => {
                Arc::new(LandmarkRangeBearing::for_quadrotor(
                    landmark.unwrap_or_else(|| vehicle.default_landmark()),
                ))
            }
            (MeasurementConfig::RangeBearing { landmark }, VehicleConfig::DifferentialDrive(_)) => {
                Arc::new(LandmarkRangeBearing::for_differential_drive(
                    landmark.unwrap_or_else(|| vehicle.default_landmark()),
                ))
            }
            (MeasurementConfig::Position, VehicleConfig::Quadrotor(_)) => {
                Arc::new(PositionReadout::for_quadrotor())
            }
            (MeasurementConfig::Position, VehicleConfig::DifferentialDrive(_)) => {
                Arc::new(PositionReadout::for_differential_drive())
            }
        }
    }
    pub fn dimension(&self) -> usize {
        2
    }
}

fn default_measurement_offset() -> usize {
    1
}

/// Noise matrices, alignment and linearization point for the Kalman filters.
///
/// Matrices are given as diagonals. Absent diagonals default to identity matrices of the
/// appropriate size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Diagonal of the process noise covariance Q
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_noise: Option<Vec<f64>>,
    /// Diagonal of the measurement noise covariance R
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_noise: Option<Vec<f64>>,
    /// Diagonal of the initial state covariance P₀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_covariance: Option<Vec<f64>>,
    /// Tick `k` fuses measurement `k - 1 + measurement_offset`
    #[serde(default = "default_measurement_offset")]
    pub measurement_offset: usize,
    /// Linearization state for the Kalman filter; the initial state (or zero) when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_state: Option<Vec<f64>>,
    /// Linearization input for the Kalman filter; the vehicle default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nominal_input: Option<Vec<f64>>,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            process_noise: None,
            measurement_noise: None,
            initial_covariance: None,
            measurement_offset: default_measurement_offset(),
            nominal_state: None,
            nominal_input: None,
        }
    }
}
impl FilterConfig {
    pub fn process_noise_matrix(&self, state_dimension: usize) -> Result<DMatrix<f64>> {
        diagonal_matrix("process_noise", self.process_noise.as_deref(), state_dimension)
    }
    pub fn measurement_noise_matrix(&self, measurement_dimension: usize) -> Result<DMatrix<f64>> {
        diagonal_matrix(
            "measurement_noise",
            self.measurement_noise.as_deref(),
            measurement_dimension,
        )
    }
    pub fn initial_covariance_matrix(&self, state_dimension: usize) -> Result<DMatrix<f64>> {
        diagonal_matrix(
            "initial_covariance",
            self.initial_covariance.as_deref(),
            state_dimension,
        )
    }
}

fn diagonal_matrix(name: &str, diagonal: Option<&[f64]>, dimension: usize) -> Result<DMatrix<f64>> {
    match diagonal {
        None => Ok(DMatrix::identity(dimension, dimension)),
        Some(values) => {
            if values.len() != dimension {
                return Err(EstimationError::Configuration(format!(
                    "{name} has {} diagonal entries, expected {dimension}",
                    values.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(EstimationError::Configuration(format!(
                    "{name} entries must be finite and non-negative"
                )));
            }
            Ok(DMatrix::from_diagonal(&DVector::from_column_slice(values)))
        }
    }
}

fn vector_of(name: &str, values: &[f64], dimension: usize) -> Result<DVector<f64>> {
    if values.len() != dimension {
        return Err(EstimationError::Configuration(format!(
            "{name} has {} elements, expected {dimension}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::Configuration(format!(
            "{name} entries must be finite"
        )));
    }
    Ok(DVector::from_column_slice(values))
}

/// Configuration bundle for one estimation run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub vehicle: VehicleConfig,
    #[serde(default)]
    pub measurement: MeasurementConfig,
    /// Estimator name, one of `oracle_observer`, `dead_reckoning`, `kalman_filter`,
    /// `extended_kalman_filter`
    pub estimator: String,
    /// Tick period in seconds; derived from the recorded data in batch mode when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde(default)]
    pub filter: FilterConfig,
    /// Initial state for the model-based estimators; the first ground-truth sample when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Vec<f64>>,
}
impl Default for RunConfig {
    fn default() -> Self {
        RunConfig::new(
            VehicleConfig::default(),
            MeasurementConfig::default(),
            EstimatorKind::ExtendedKalmanFilter,
        )
    }
}
impl RunConfig {
    pub fn new(
        vehicle: VehicleConfig,
        measurement: MeasurementConfig,
        estimator: EstimatorKind,
    ) -> Self {
        RunConfig {
            vehicle,
            measurement,
            estimator: estimator.to_string(),
            dt: None,
            filter: FilterConfig::default(),
            initial_state: None,
        }
    }
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }
    pub fn with_initial_state(mut self, state: Vec<f64>) -> Self {
        self.initial_state = Some(state);
        self
    }
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }
    pub fn estimator_kind(&self) -> Result<EstimatorKind> {
        self.estimator.parse()
    }
    pub fn process_model(&self) -> Arc<dyn ProcessModel> {
        self.vehicle.process_model()
    }
    pub fn measurement_model(&self) -> Arc<dyn MeasurementModel> {
        self.measurement.measurement_model(&self.vehicle)
    }
    pub fn initial_state(&self) -> Result<Option<DVector<f64>>> {
        self.initial_state
            .as_deref()
            .map(|values| vector_of("initial_state", values, self.vehicle.state_dimension()))
            .transpose()
    }
    /// Linearization state: configured nominal state, else the initial state, else zero
    pub fn nominal_state(&self) -> Result<DVector<f64>> {
        let n = self.vehicle.state_dimension();
        match &self.filter.nominal_state {
            Some(values) => vector_of("nominal_state", values, n),
            None => Ok(self.initial_state()?.unwrap_or_else(|| DVector::zeros(n))),
        }
    }
    pub fn nominal_input(&self) -> Result<DVector<f64>> {
        match &self.filter.nominal_input {
            Some(values) => vector_of("nominal_input", values, self.vehicle.input_dimension()),
            None => Ok(self.vehicle.default_nominal_input()),
        }
    }
    /// Check every value against the selected models
    pub fn validate(&self) -> Result<()> {
        let kind = self.estimator_kind()?;
        if let Some(dt) = self.dt
            && (!dt.is_finite() || dt <= 0.0)
        {
            return Err(EstimationError::Configuration(format!(
                "dt must be a positive number of seconds, got {dt}"
            )));
        }
        self.initial_state()?;
        if kind.is_filter() {
            let n = self.vehicle.state_dimension();
            self.filter.process_noise_matrix(n)?;
            self.filter
                .measurement_noise_matrix(self.measurement.dimension())?;
            self.filter.initial_covariance_matrix(n)?;
            if self.filter.measurement_offset > 1 {
                return Err(EstimationError::Configuration(format!(
                    "measurement_offset must be 0 or 1, got {}",
                    self.filter.measurement_offset
                )));
            }
            if kind == EstimatorKind::KalmanFilter {
                self.nominal_state()?;
                self.nominal_input()?;
            }
        }
        Ok(())
    }
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(self, path)
    }
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_yaml(self, path)
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_yaml(path)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_toml(self, path)
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_toml(path)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_by_extension(self, path.as_ref())
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_by_extension(path.as_ref())
    }
}

fn default_steps() -> usize {
    100
}
fn default_seed() -> u64 {
    42
}

/// A synthetic run: constant input held for `steps` ticks, with optional Gaussian noise
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_steps")]
    pub steps: usize,
    /// Constant control input; the vehicle's nominal input when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Vec<f64>>,
    #[serde(default)]
    pub noise: NoiseLevels,
    #[serde(default = "default_seed")]
    pub seed: u64,
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            steps: default_steps(),
            input: None,
            noise: NoiseLevels::default(),
            seed: default_seed(),
        }
    }
}

/// A run configuration plus the synthetic scenario that feeds it
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub run: RunConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
}
impl SimulationConfig {
    /// Constant scenario input, checked against the vehicle
    pub fn scenario_input(&self) -> Result<DVector<f64>> {
        match &self.scenario.input {
            Some(values) => vector_of("scenario.input", values, self.run.vehicle.input_dimension()),
            None => Ok(self.run.vehicle.default_nominal_input()),
        }
    }
    pub fn validate(&self) -> Result<()> {
        self.run.validate()?;
        if self.run.dt.is_none() {
            return Err(EstimationError::Configuration(
                "a simulated run needs an explicit dt".to_string(),
            ));
        }
        self.scenario_input()?;
        self.scenario
            .noise
            .check(self.run.vehicle.input_dimension(), self.run.measurement.dimension())
    }
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_by_extension(self, path.as_ref())
    }
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_by_extension(path.as_ref())
    }
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}
fn write_yaml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let mut file = File::create(path)?;
    let s = serde_yaml::to_string(value)?;
    file.write_all(s.as_bytes())?;
    Ok(())
}
fn read_yaml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_yaml::from_reader(file)?)
}
fn write_toml<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<()> {
    let mut file = File::create(path)?;
    let s = toml::to_string(value)?;
    file.write_all(s.as_bytes())?;
    Ok(())
}
fn read_toml<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let mut s = String::new();
    let mut file = File::open(path)?;
    file.read_to_string(&mut s)?;
    Ok(toml::from_str(&s)?)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
fn unsupported_extension() -> EstimationError {
    EstimationError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        "unsupported file extension",
    ))
}
fn write_by_extension<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    match extension_of(path).as_deref() {
        Some("json") => write_json(value, path),
        Some("yaml") | Some("yml") => write_yaml(value, path),
        Some("toml") => write_toml(value, path),
        _ => Err(unsupported_extension()),
    }
}
fn read_by_extension<T: DeserializeOwned>(path: &Path) -> Result<T> {
    match extension_of(path).as_deref() {
        Some("json") => read_json(path),
        Some("yaml") | Some("yml") => read_yaml(path),
        Some("toml") => read_toml(path),
        _ => Err(unsupported_extension()),
    }
}

//! Run diagnostics: tick latency and accuracy
//!
//! [TickTimer] keeps the wall-clock cost of every `tick()` call in order, and
//! [mean_squared_error] scores an estimate history against ground truth once a batch run is over.
//! Both feed the [RunReport] returned by the scheduler.

use crate::StateVector;
use crate::error::{EstimationError, Result};

use std::fmt::{self, Display};
use std::time::{Duration, Instant};

/// Ordered wall-clock durations of estimator ticks
#[derive(Clone, Debug, Default)]
pub struct TickTimer {
    samples: Vec<Duration>,
}
impl TickTimer {
    pub fn new() -> Self {
        Self::default()
    }
    /// Run `f`, recording how long it took
    pub fn time<T, F: FnOnce() -> T>(&mut self, f: F) -> T {
        let start = Instant::now();
        let out = f();
        self.samples.push(start.elapsed());
        out
    }
    pub fn record(&mut self, duration: Duration) {
        self.samples.push(duration);
    }
    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn total(&self) -> Duration {
        self.samples.iter().sum()
    }
    /// Mean tick duration, `None` before the first tick
    pub fn average(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok()?;
        if count == 0 {
            return None;
        }
        Some(self.total() / count)
    }
    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }
}

/// Mean over all elements of the squared differences between two index-aligned state histories.
///
/// ```rust
/// use roboest::diagnostics::mean_squared_error;
/// use nalgebra::DVector;
///
/// let truth = vec![DVector::from_vec(vec![0.0, 0.0]), DVector::from_vec(vec![1.0, 1.0])];
/// let estimates = vec![DVector::from_vec(vec![1.0, 0.0]), DVector::from_vec(vec![1.0, 3.0])];
/// assert_eq!(mean_squared_error(&truth, &estimates).unwrap(), 1.25);
/// ```
///
/// Histories of unequal length, mismatched state dimensions or empty histories are a
/// [EstimationError::Precondition] error.
pub fn mean_squared_error(truth: &[StateVector], estimates: &[StateVector]) -> Result<f64> {
    if truth.len() != estimates.len() {
        return Err(EstimationError::Precondition(format!(
            "cannot score {} estimates against {} truth samples",
            estimates.len(),
            truth.len()
        )));
    }
    if truth.is_empty() {
        return Err(EstimationError::Precondition(
            "cannot score an empty history".to_string(),
        ));
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for (index, (x, x_hat)) in truth.iter().zip(estimates).enumerate() {
        if x.len() != x_hat.len() {
            return Err(EstimationError::Precondition(format!(
                "sample {index}: truth has {} states, estimate has {}",
                x.len(),
                x_hat.len()
            )));
        }
        sum += (x - x_hat).norm_squared();
        count += x.len();
    }
    if count == 0 {
        return Err(EstimationError::Precondition(
            "cannot score zero-dimensional states".to_string(),
        ));
    }
    Ok(sum / count as f64)
}

/// Summary of one estimation run
#[derive(Clone, Debug)]
pub struct RunReport {
    pub estimator: String,
    /// Tick period used for the run
    pub dt: f64,
    pub estimates: Vec<StateVector>,
    pub tick_times: TickTimer,
    /// Mean squared error against ground truth, when truth was available
    pub mse: Option<f64>,
    /// Ticks that produced no estimate for lack of data
    pub skipped_ticks: usize,
    /// Ticks that failed with an error
    pub failed_ticks: usize,
}
impl RunReport {
    pub fn new(estimator: &str, dt: f64) -> Self {
        RunReport {
            estimator: estimator.to_string(),
            dt,
            estimates: Vec::new(),
            tick_times: TickTimer::new(),
            mse: None,
            skipped_ticks: 0,
            failed_ticks: 0,
        }
    }
    /// Score the estimates against the matching prefix of a truth history
    pub fn score(&mut self, truth: &[StateVector]) -> Result<f64> {
        let n = self.estimates.len();
        if truth.len() < n {
            return Err(EstimationError::Precondition(format!(
                "{n} estimates but only {} truth samples",
                truth.len()
            )));
        }
        let mse = mean_squared_error(&truth[..n], &self.estimates)?;
        self.mse = Some(mse);
        Ok(mse)
    }
    pub fn log_summary(&self) {
        log::info!("{self}");
    }
}
impl Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} estimates (dt = {:.4} s, {} skipped, {} failed ticks)",
            self.estimator,
            self.estimates.len(),
            self.dt,
            self.skipped_ticks,
            self.failed_ticks
        )?;
        if let Some(average) = self.tick_times.average() {
            write!(f, ", average update runtime {:.6} s", average.as_secs_f64())?;
        }
        if let Some(mse) = self.mse {
            write!(f, ", mean squared error {mse:.6}")?;
        }
        Ok(())
    }
}

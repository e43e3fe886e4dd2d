//! Tick scheduling for batch replays and live runs
//!
//! A batch run replays a recorded [Dataset] row by row on the calling thread: append the row to the
//! buffers, tick once. It never looks at the wall clock, so the same dataset and configuration
//! always produce the same estimates.
//!
//! An online run hands tick control to a single consumer thread driven by a periodic timer of
//! period `dt`. Producers push samples through [SampleSender] handles; before every tick the
//! consumer drains the queues into the buffers it owns. A tick whose data has not arrived yet is a
//! no-op, and ticks never overlap.

use crate::StateVector;
use crate::buffer::Buffers;
use crate::config::RunConfig;
use crate::diagnostics::RunReport;
use crate::error::{EstimationError, Result};
use crate::estimator::{Estimator, build_estimator, check_dt};
use crate::sim::Dataset;
use crate::stream::{self, SampleReceiver, SampleSender};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded, tick};
use crossbeam::select;

/// Tick period for a batch run: the configured `dt`, else the one implied by the dataset.
pub fn resolve_dt(config_dt: Option<f64>, dataset: &Dataset) -> Result<f64> {
    match config_dt {
        Some(dt) => {
            check_dt(dt)?;
            Ok(dt)
        }
        None => dataset.derived_dt().ok_or_else(|| {
            EstimationError::Configuration(
                "no dt configured and none can be derived from the dataset".to_string(),
            )
        }),
    }
}

/// Build the configured estimator and replay `dataset` through it.
pub fn run_batch(config: &RunConfig, dataset: &Dataset) -> Result<RunReport> {
    let dt = resolve_dt(config.dt, dataset)?;
    let mut estimator = build_estimator(config, dt)?;
    log::info!(
        "batch run of {} over {} rows (dt = {dt})",
        estimator.name(),
        dataset.len()
    );
    replay(estimator.as_mut(), dataset, dt)
}

/// Replay `dataset` through an already built estimator, one tick per row.
///
/// Ticks that fail are counted and the run carries on; the estimator retries the same step on the
/// next tick. The report is scored against the dataset's truth when the estimator produced
/// anything.
pub fn replay(estimator: &mut dyn Estimator, dataset: &Dataset, dt: f64) -> Result<RunReport> {
    let mut buffers = Buffers::with_capacity(dataset.len());
    let mut report = RunReport::new(estimator.name(), dt);
    for (i, row) in dataset.iter().enumerate() {
        buffers.inputs.append(row.input_vector())?;
        buffers.measurements.append(row.measurement_sample())?;
        buffers.truth.append(row.truth_sample())?;
        let outcome = report.tick_times.time(|| estimator.tick(&buffers));
        record_outcome(&mut report, outcome, i);
    }
    report.estimates = estimator.history().to_vec();
    if !report.estimates.is_empty() {
        report.score(&dataset.truth_history())?;
    }
    report.log_summary();
    Ok(report)
}

fn record_outcome(report: &mut RunReport, outcome: Result<Option<StateVector>>, tick: usize) {
    match outcome {
        Ok(Some(_)) => {}
        Ok(None) => {
            report.skipped_ticks += 1;
            log::debug!("tick {tick}: waiting for data");
        }
        Err(e) => {
            report.failed_ticks += 1;
            log::warn!("tick {tick} failed: {e}");
        }
    }
}

/// A live run on a background consumer thread.
///
/// Dropping the scheduler stops the thread and discards everything it collected; call
/// [OnlineScheduler::stop] to get the report instead.
pub struct OnlineScheduler {
    sender: SampleSender,
    running: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<RunReport>>,
}
impl OnlineScheduler {
    /// Build the configured estimator and start ticking it every `config.dt` seconds.
    ///
    /// `capacity` bounds each producer queue.
    pub fn start(config: &RunConfig, capacity: usize) -> Result<Self> {
        let dt = config.dt.ok_or_else(|| {
            EstimationError::Configuration("an online run needs an explicit dt".to_string())
        })?;
        let estimator = build_estimator(config, dt)?;
        Self::start_with(estimator, dt, capacity)
    }
    /// Start ticking an already built estimator every `dt` seconds.
    pub fn start_with(estimator: Box<dyn Estimator>, dt: f64, capacity: usize) -> Result<Self> {
        check_dt(dt)?;
        if capacity == 0 {
            return Err(EstimationError::Configuration(
                "producer queues need a capacity of at least one sample".to_string(),
            ));
        }
        let (sender, receiver) = stream::channel(capacity);
        let (stop_tx, stop_rx) = bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let consumer = Consumer {
            estimator,
            receiver,
            stop_rx,
            dt,
            running: running.clone(),
        };
        let handle = thread::Builder::new()
            .name("estimator-ticks".to_string())
            .spawn(move || consumer.run())?;
        Ok(OnlineScheduler {
            sender,
            running,
            stop_tx,
            handle: Some(handle),
        })
    }
    /// A new producer handle
    pub fn sender(&self) -> SampleSender {
        self.sender.clone()
    }
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
    /// Stop the timer, join the consumer and return what it collected. The buffers are discarded.
    pub fn stop(mut self) -> Result<RunReport> {
        let handle = self.handle.take().ok_or_else(|| {
            EstimationError::Scheduler("consumer thread already joined".to_string())
        })?;
        let _ = self.stop_tx.try_send(());
        let report = handle
            .join()
            .map_err(|_| EstimationError::Scheduler("consumer thread panicked".to_string()))?;
        report.log_summary();
        Ok(report)
    }
}
impl Drop for OnlineScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
    }
}

struct Consumer {
    estimator: Box<dyn Estimator>,
    receiver: SampleReceiver,
    stop_rx: Receiver<()>,
    dt: f64,
    running: Arc<AtomicBool>,
}
impl Consumer {
    fn run(mut self) -> RunReport {
        let ticker = tick(Duration::from_secs_f64(self.dt));
        let mut buffers = Buffers::new();
        let mut report = RunReport::new(self.estimator.name(), self.dt);
        let mut ticks = 0usize;
        log::info!(
            "online run of {} started (dt = {})",
            self.estimator.name(),
            self.dt
        );
        loop {
            select! {
                recv(self.stop_rx) -> _ => break,
                recv(ticker) -> _ => {
                    self.receiver.drain_into(&mut buffers);
                    let estimator = &mut self.estimator;
                    let outcome = report.tick_times.time(|| estimator.tick(&buffers));
                    record_outcome(&mut report, outcome, ticks);
                    ticks += 1;
                }
            }
        }
        self.running.store(false, Ordering::Relaxed);
        report.estimates = self.estimator.history().to_vec();
        let truth: Vec<StateVector> = buffers.truth.iter().map(|s| s.state.clone()).collect();
        if !truth.is_empty()
            && !report.estimates.is_empty()
            && let Err(e) = report.score(&truth)
        {
            log::warn!("could not score the online run: {e}");
        }
        log::info!("online run stopped after {ticks} ticks");
        report
    }
}

//! Bounded producer queues for online runs
//!
//! Each stream (inputs, measurements, ground truth) has its own bounded channel. Producers hold
//! cloneable [SampleSender] handles and never block: a sample offered to a full queue is rejected
//! and counted. The single consumer owns the [Buffers] and drains every queue without blocking
//! right before each tick, so an estimator never sees a partially written sample.

use crate::buffer::Buffers;
use crate::{InputVector, Measurement, Timestamped, TruthSample};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};

/// A sample on any of the three streams
#[derive(Clone, Debug, PartialEq)]
pub enum Sample {
    Input(InputVector),
    Measurement(Measurement),
    Truth(TruthSample),
}

/// Producer handle
#[derive(Clone, Debug)]
pub struct SampleSender {
    inputs: Sender<InputVector>,
    measurements: Sender<Measurement>,
    truth: Sender<TruthSample>,
    rejected: Arc<AtomicUsize>,
}
impl SampleSender {
    /// Offer a sample to its queue. Returns `false` when the sample was rejected because the queue
    /// is full or the consumer has stopped.
    pub fn send(&self, sample: Sample) -> bool {
        match sample {
            Sample::Input(s) => self.offer(&self.inputs, s, "input"),
            Sample::Measurement(s) => self.offer(&self.measurements, s, "measurement"),
            Sample::Truth(s) => self.offer(&self.truth, s, "truth"),
        }
    }
    pub fn send_input(&self, input: InputVector) -> bool {
        self.offer(&self.inputs, input, "input")
    }
    pub fn send_measurement(&self, measurement: Measurement) -> bool {
        self.offer(&self.measurements, measurement, "measurement")
    }
    pub fn send_truth(&self, truth: TruthSample) -> bool {
        self.offer(&self.truth, truth, "truth")
    }
    /// Samples rejected so far across all handles
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::Relaxed)
    }
    fn offer<T: Timestamped>(&self, tx: &Sender<T>, sample: T, stream: &str) -> bool {
        let timestamp = sample.timestamp();
        match tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("{stream} queue full, dropping sample at t={timestamp:.4}");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("{stream} queue closed, dropping sample at t={timestamp:.4}");
                false
            }
        }
    }
}

/// What one drain moved into the buffers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub appended: usize,
    /// Samples older than the buffer tail, dropped
    pub out_of_order: usize,
}

/// Consumer side of the queues
#[derive(Debug)]
pub struct SampleReceiver {
    inputs: Receiver<InputVector>,
    measurements: Receiver<Measurement>,
    truth: Receiver<TruthSample>,
}
impl SampleReceiver {
    /// Move everything currently queued into `buffers` without blocking.
    pub fn drain_into(&self, buffers: &mut Buffers) -> DrainStats {
        let mut stats = DrainStats::default();
        while let Ok(input) = self.inputs.try_recv() {
            record(&mut stats, buffers.inputs.append(input), "input");
        }
        while let Ok(measurement) = self.measurements.try_recv() {
            record(&mut stats, buffers.measurements.append(measurement), "measurement");
        }
        while let Ok(truth) = self.truth.try_recv() {
            record(&mut stats, buffers.truth.append(truth), "truth");
        }
        stats
    }
    /// Whether every queue is empty
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.measurements.is_empty() && self.truth.is_empty()
    }
}

fn record(stats: &mut DrainStats, result: crate::Result<usize>, stream: &str) {
    match result {
        Ok(_) => stats.appended += 1,
        Err(e) => {
            stats.out_of_order += 1;
            log::warn!("dropping {stream} sample: {e}");
        }
    }
}

/// Create the three bounded queues, each holding at most `capacity` samples.
pub fn channel(capacity: usize) -> (SampleSender, SampleReceiver) {
    let (input_tx, input_rx) = bounded(capacity);
    let (measurement_tx, measurement_rx) = bounded(capacity);
    let (truth_tx, truth_rx) = bounded(capacity);
    (
        SampleSender {
            inputs: input_tx,
            measurements: measurement_tx,
            truth: truth_tx,
            rejected: Arc::new(AtomicUsize::new(0)),
        },
        SampleReceiver {
            inputs: input_rx,
            measurements: measurement_rx,
            truth: truth_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drain_moves_samples_into_buffers() {
        let (tx, rx) = channel(8);
        assert!(tx.send_input(InputVector::new(0.0, vec![1.0, 2.0])));
        assert!(tx.send(Sample::Measurement(Measurement::new(0.0, vec![3.0, 0.1]))));
        assert!(tx.send_truth(TruthSample::new(0.0, vec![0.0; 6])));
        let mut buffers = Buffers::new();
        let stats = rx.drain_into(&mut buffers);
        assert_eq!(stats.appended, 3);
        assert_eq!(buffers.inputs.len(), 1);
        assert_eq!(buffers.measurements.len(), 1);
        assert_eq!(buffers.truth.len(), 1);
        assert!(rx.is_empty());
        assert_eq!(rx.drain_into(&mut buffers), DrainStats::default());
    }
    #[test]
    fn full_queue_rejects_without_blocking() {
        let (tx, rx) = channel(2);
        assert!(tx.send_input(InputVector::new(0.0, vec![0.0, 0.0])));
        assert!(tx.send_input(InputVector::new(0.1, vec![0.0, 0.0])));
        assert!(!tx.send_input(InputVector::new(0.2, vec![0.0, 0.0])));
        assert_eq!(tx.rejected(), 1);
        let mut buffers = Buffers::new();
        rx.drain_into(&mut buffers);
        assert_eq!(buffers.inputs.latest().unwrap().timestamp, 0.1);
    }
    #[test]
    fn out_of_order_samples_are_dropped() {
        let (tx, rx) = channel(4);
        tx.send_measurement(Measurement::new(1.0, vec![0.0, 0.0]));
        tx.send_measurement(Measurement::new(0.5, vec![0.0, 0.0]));
        let mut buffers = Buffers::new();
        let stats = rx.drain_into(&mut buffers);
        assert_eq!(stats.appended, 1);
        assert_eq!(stats.out_of_order, 1);
    }
    #[test]
    fn producers_on_other_threads() {
        let (tx, rx) = channel(64);
        let handles: Vec<_> = (0..2)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let t = i as f64;
                        if p == 0 {
                            tx.send_input(InputVector::new(t, vec![0.0, 0.0]));
                        } else {
                            tx.send_measurement(Measurement::new(t, vec![0.0, 0.0]));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut buffers = Buffers::new();
        rx.drain_into(&mut buffers);
        assert_eq!(buffers.inputs.len(), 10);
        assert_eq!(buffers.measurements.len(), 10);
    }
    #[test]
    fn closed_consumer_rejects() {
        let (tx, rx) = channel(4);
        drop(rx);
        assert!(!tx.send_truth(TruthSample::new(0.0, vec![0.0])));
        assert_eq!(tx.rejected(), 0);
    }
}

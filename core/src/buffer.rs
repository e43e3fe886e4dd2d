//! Append-only timeseries buffers
//!
//! Inputs, measurements and (when available) ground-truth states are stored in timestamp order and
//! keyed by arrival index. Estimators only ever borrow the buffers immutably; the scheduler that
//! owns them is the only writer. In online mode producers never touch these buffers directly:
//! samples travel through bounded queues (see [crate::stream]) and are appended by the consumer
//! between ticks, so an append is always atomic from an estimator's point of view.

use crate::error::{EstimationError, Result};
use crate::{InputVector, Measurement, Timestamped, TruthSample};

/// Timestamp-ordered, append-only store.
#[derive(Clone, Debug)]
pub struct TimeseriesBuffer<T> {
    samples: Vec<T>,
}
impl<T> Default for TimeseriesBuffer<T> {
    fn default() -> Self {
        TimeseriesBuffer {
            samples: Vec::new(),
        }
    }
}
impl<T: Timestamped> TimeseriesBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        TimeseriesBuffer {
            samples: Vec::with_capacity(capacity),
        }
    }
    /// Append a sample. Samples must arrive in non-decreasing timestamp order; an older sample is
    /// rejected and the buffer is left unchanged.
    pub fn append(&mut self, sample: T) -> Result<usize> {
        if let Some(last) = self.samples.last()
            && sample.timestamp() < last.timestamp()
        {
            return Err(EstimationError::OutOfOrder {
                previous: last.timestamp(),
                received: sample.timestamp(),
            });
        }
        self.samples.push(sample);
        Ok(self.samples.len() - 1)
    }
    /// Sample at arrival index `index`, if it has arrived
    pub fn get(&self, index: usize) -> Option<&T> {
        self.samples.get(index)
    }
    pub fn first(&self) -> Option<&T> {
        self.samples.first()
    }
    pub fn latest(&self) -> Option<&T> {
        self.samples.last()
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.samples.iter()
    }
    pub fn as_slice(&self) -> &[T] {
        &self.samples
    }
}

/// The three buffers a run reads from.
#[derive(Clone, Debug, Default)]
pub struct Buffers {
    pub inputs: TimeseriesBuffer<InputVector>,
    pub measurements: TimeseriesBuffer<Measurement>,
    pub truth: TimeseriesBuffer<TruthSample>,
}
impl Buffers {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Buffers {
            inputs: TimeseriesBuffer::with_capacity(capacity),
            measurements: TimeseriesBuffer::with_capacity(capacity),
            truth: TimeseriesBuffer::with_capacity(capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_in_order() {
        let mut buffer = TimeseriesBuffer::new();
        assert_eq!(buffer.append(InputVector::new(0.0, vec![1.0, 2.0])).unwrap(), 0);
        assert_eq!(buffer.append(InputVector::new(0.1, vec![1.0, 2.0])).unwrap(), 1);
        // equal timestamps are allowed
        assert_eq!(buffer.append(InputVector::new(0.1, vec![3.0, 4.0])).unwrap(), 2);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.latest().unwrap().values[0], 3.0);
        assert_eq!(buffer.first().unwrap().timestamp, 0.0);
    }
    #[test]
    fn append_out_of_order_is_rejected() {
        let mut buffer = TimeseriesBuffer::new();
        buffer.append(Measurement::new(1.0, vec![0.0, 0.0])).unwrap();
        let err = buffer.append(Measurement::new(0.5, vec![0.0, 0.0]));
        assert!(matches!(
            err,
            Err(EstimationError::OutOfOrder { previous, received })
                if previous == 1.0 && received == 0.5
        ));
        assert_eq!(buffer.len(), 1);
    }
    #[test]
    fn index_lookup() {
        let mut buffer = TimeseriesBuffer::new();
        for i in 0..5 {
            buffer
                .append(TruthSample::new(i as f64 * 0.1, vec![0.0; 6]))
                .unwrap();
        }
        assert_eq!(buffer.get(2).unwrap().timestamp(), 2.0 * 0.1);
        assert_eq!(buffer.first().unwrap().timestamp(), 0.0);
        assert!(buffer.get(5).is_none());
    }
}

use crate::buffer::{Rejected, RingBuffer};
use crate::error::Result;
use crate::metrics::RoleMetrics;
use crate::rate::Pacing;
use crate::sink::SampleSink;
use crate::source::SampleSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sleep after a rejected operation when the role has no pacing of its own
const IDLE_BACKOFF: Duration = Duration::from_micros(10);

fn idle(pacing: &Pacing) {
    match pacing {
        Pacing::None => thread::sleep(IDLE_BACKOFF),
        other => other.pause(),
    }
}

/// Cooperative stop signal shared by every role of a pipeline.
///
/// Roles check it between buffer operations, never during one.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every role holding this flag to stop
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pulls samples from a source and writes them to one buffer.
///
/// A rejected write is retried with the same sample, so nothing is skipped.
/// The output is closed when the source runs dry or the role stops.
pub struct Producer {
    output: RingBuffer,
    pacing: Pacing,
    metrics: RoleMetrics,
    shutdown: ShutdownFlag,
}

impl Producer {
    pub fn new(output: RingBuffer, shutdown: ShutdownFlag) -> Self {
        Self {
            output,
            pacing: Pacing::None,
            metrics: RoleMetrics::new(),
            shutdown,
        }
    }

    /// Delay between writes
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Get a reference to the metrics
    pub fn metrics(&self) -> &RoleMetrics {
        &self.metrics
    }

    /// Run until the source ends or shutdown is signaled. Returns the number
    /// of samples written.
    pub fn run<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> Result<u64> {
        debug!(capacity = self.output.capacity(), "producer started");
        let result = self.pump(source);
        self.output.close();
        debug!(written = self.metrics.total_moved(), "producer finished");
        result
    }

    fn pump<S: SampleSource + ?Sized>(&mut self, source: &mut S) -> Result<u64> {
        'samples: while !self.shutdown.is_triggered() {
            let Some(sample) = source.next_sample()? else {
                break;
            };

            while let Err(rejected) = self.output.write(sample) {
                self.metrics.record_rejected(rejected);
                if self.shutdown.is_triggered() {
                    self.metrics.record_lost();
                    warn!(sample, "producer stopped before sample was written");
                    break 'samples;
                }
                idle(&self.pacing);
            }
            self.metrics.record_moved();
            self.pacing.pause();
        }
        Ok(self.metrics.total_moved())
    }
}

/// Reads one buffer and hands every sample to a sink
pub struct Consumer {
    input: RingBuffer,
    pacing: Pacing,
    metrics: RoleMetrics,
    shutdown: ShutdownFlag,
}

impl Consumer {
    pub fn new(input: RingBuffer, shutdown: ShutdownFlag) -> Self {
        Self {
            input,
            pacing: Pacing::None,
            metrics: RoleMetrics::new(),
            shutdown,
        }
    }

    /// Delay between reads
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn metrics(&self) -> &RoleMetrics {
        &self.metrics
    }

    /// Run until shutdown, until the sink is satisfied, or until the input is
    /// closed and drained. Returns the number of samples consumed.
    pub fn run<K: SampleSink + ?Sized>(&mut self, sink: &mut K) -> u64 {
        debug!(capacity = self.input.capacity(), "consumer started");
        while !self.shutdown.is_triggered() && !sink.is_satisfied() {
            // Closed must be observed before the read for an empty read to mean drained
            let closed = self.input.is_closed();
            match self.input.read() {
                Ok(sample) => {
                    sink.accept(sample);
                    self.metrics.record_moved();
                    self.pacing.pause();
                }
                Err(Rejected::Empty) if closed => break,
                Err(rejected) => {
                    self.metrics.record_rejected(rejected);
                    idle(&self.pacing);
                }
            }
        }
        debug!(read = self.metrics.total_moved(), "consumer finished");
        self.metrics.total_moved()
    }
}

/// Interior stage: reads one buffer and writes each sample, unmodified, to
/// the next.
///
/// A sample only counts as forwarded once its write succeeds. A sample that
/// is still waiting for room when shutdown arrives is counted as lost.
pub struct Worker {
    id: usize,
    input: RingBuffer,
    output: RingBuffer,
    read_pacing: Pacing,
    write_pacing: Pacing,
    metrics: RoleMetrics,
    shutdown: ShutdownFlag,
}

impl Worker {
    pub fn new(id: usize, input: RingBuffer, output: RingBuffer, shutdown: ShutdownFlag) -> Self {
        Self {
            id,
            input,
            output,
            read_pacing: Pacing::None,
            write_pacing: Pacing::None,
            metrics: RoleMetrics::new(),
            shutdown,
        }
    }

    /// Delays after the read and after the write of each step
    pub fn with_pacing(mut self, read: Pacing, write: Pacing) -> Self {
        self.read_pacing = read;
        self.write_pacing = write;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn metrics(&self) -> &RoleMetrics {
        &self.metrics
    }

    /// Run until shutdown or until the input is closed and drained. Closes
    /// the output on exit and returns the number of samples forwarded.
    pub fn run(&mut self) -> u64 {
        debug!(worker = self.id, "worker started");
        while !self.shutdown.is_triggered() {
            let closed = self.input.is_closed();
            let sample = match self.input.read() {
                Ok(sample) => sample,
                Err(Rejected::Empty) if closed => break,
                Err(rejected) => {
                    self.metrics.record_rejected(rejected);
                    idle(&self.read_pacing);
                    continue;
                }
            };
            self.read_pacing.pause();
            let started = Instant::now();

            if self.forward(sample) {
                self.metrics.record_moved();
                self.metrics
                    .record_latency(started.elapsed().as_nanos().min(u64::MAX as u128) as u64);
            } else {
                self.metrics.record_lost();
                warn!(worker = self.id, sample, "sample lost: shutdown before it could be forwarded");
            }
            self.write_pacing.pause();
        }
        self.output.close();
        debug!(
            worker = self.id,
            forwarded = self.metrics.total_moved(),
            lost = self.metrics.total_lost(),
            "worker finished"
        );
        self.metrics.total_moved()
    }

    /// Write `sample` downstream, retrying until it lands or shutdown
    fn forward(&self, sample: f32) -> bool {
        loop {
            match self.output.write(sample) {
                Ok(()) => return true,
                Err(rejected) => {
                    self.metrics.record_rejected(rejected);
                    if self.shutdown.is_triggered() {
                        return false;
                    }
                    idle(&self.write_pacing);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[test]
    fn test_shutdown_flag_shared() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_triggered());
        flag.trigger();
        assert!(other.is_triggered());
    }

    #[test]
    fn test_producer_writes_and_closes() {
        let buffer = RingBuffer::new(8).unwrap();
        let mut producer = Producer::new(buffer.clone(), ShutdownFlag::new());
        let written = producer
            .run(&mut VecSource::new(vec![1.0, 2.0, 3.0]))
            .unwrap();

        assert_eq!(written, 3);
        assert!(buffer.is_closed());
        assert_eq!(buffer.read(), Ok(1.0));
        assert_eq!(buffer.read(), Ok(2.0));
        assert_eq!(buffer.read(), Ok(3.0));
    }

    #[test]
    fn test_producer_retries_when_full() {
        let buffer = RingBuffer::new(2).unwrap();
        let reader = buffer.clone();
        let values: Vec<f32> = (0..50).map(|i| i as f32 * 0.5).collect();
        let expected = values.clone();

        let handle = thread::spawn(move || {
            let mut producer = Producer::new(buffer, ShutdownFlag::new());
            let written = producer.run(&mut VecSource::new(values)).unwrap();
            (written, producer.metrics().total_full_rejections())
        });

        let mut consumer = Consumer::new(reader, ShutdownFlag::new())
            .with_pacing(Pacing::fixed_micros(50));
        let mut read: Vec<f32> = Vec::new();
        consumer.run(&mut read);

        let (written, rejections) = handle.join().unwrap();
        assert_eq!(written, 50);
        assert!(rejections > 0);
        assert_eq!(read, expected);
    }

    #[test]
    fn test_producer_stopped_before_start() {
        let buffer = RingBuffer::new(2).unwrap();
        let shutdown = ShutdownFlag::new();
        shutdown.trigger();

        let mut producer = Producer::new(buffer.clone(), shutdown);
        assert_eq!(producer.run(&mut VecSource::new(vec![1.0])).unwrap(), 0);
        assert!(buffer.is_empty());
        assert!(buffer.is_closed());
    }

    #[test]
    fn test_producer_counts_loss_on_shutdown() {
        let buffer = RingBuffer::new(1).unwrap();
        buffer.write(0.0).unwrap();
        let shutdown = ShutdownFlag::new();

        let handle = {
            let buffer = buffer.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                let mut producer = Producer::new(buffer, shutdown);
                producer.run(&mut VecSource::new(vec![1.0, 2.0])).unwrap();
                producer.metrics().total_lost()
            })
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn test_consumer_stops_when_satisfied() {
        let buffer = RingBuffer::new(4).unwrap();
        for value in [1.0, 2.0, 3.0] {
            buffer.write(value).unwrap();
        }

        let mut sink = crate::sink::LimitSink::new(2);
        let read = Consumer::new(buffer.clone(), ShutdownFlag::new()).run(&mut sink);

        assert_eq!(read, 2);
        assert_eq!(sink.samples(), &[1.0, 2.0]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_consumer_drains_closed_input() {
        let buffer = RingBuffer::new(4).unwrap();
        buffer.write(5.0).unwrap();
        buffer.close();

        let mut sink: Vec<f32> = Vec::new();
        let mut consumer = Consumer::new(buffer, ShutdownFlag::new());
        assert_eq!(consumer.run(&mut sink), 1);
        assert_eq!(sink, vec![5.0]);
    }

    #[test]
    fn test_worker_forwards_in_order() {
        let input = RingBuffer::new(4).unwrap();
        let output = RingBuffer::new(4).unwrap();
        for value in [0.1, 0.2, 0.3] {
            input.write(value).unwrap();
        }
        input.close();

        let mut worker = Worker::new(0, input, output.clone(), ShutdownFlag::new());
        assert_eq!(worker.run(), 3);
        assert!(output.is_closed());
        assert_eq!(output.read(), Ok(0.1));
        assert_eq!(output.read(), Ok(0.2));
        assert_eq!(output.read(), Ok(0.3));
        assert_eq!(worker.metrics().total_lost(), 0);
    }

    #[test]
    fn test_worker_latency_excludes_read_pacing() {
        let input = RingBuffer::new(4).unwrap();
        let output = RingBuffer::new(4).unwrap();
        for value in [1.0, 2.0, 3.0] {
            input.write(value).unwrap();
        }
        input.close();

        let mut worker = Worker::new(0, input, output, ShutdownFlag::new())
            .with_pacing(Pacing::fixed_micros(20_000), Pacing::None);
        assert_eq!(worker.run(), 3);

        // Only the write into an idle buffer is timed, not the 20ms pause
        let snapshot = worker.metrics().snapshot();
        assert!(snapshot.latency_p99_us < 20_000.0);
    }

    #[test]
    fn test_worker_records_loss_on_shutdown() {
        let input = RingBuffer::new(4).unwrap();
        let output = RingBuffer::new(1).unwrap();
        output.write(9.0).unwrap();
        input.write(1.0).unwrap();

        let shutdown = ShutdownFlag::new();
        let handle = {
            let shutdown = shutdown.clone();
            let output = output.clone();
            thread::spawn(move || {
                let mut worker = Worker::new(3, input, output, shutdown);
                let forwarded = worker.run();
                (forwarded, worker.metrics().snapshot())
            })
        };

        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        let (forwarded, snapshot) = handle.join().unwrap();

        assert_eq!(forwarded, 0);
        assert_eq!(snapshot.lost, 1);
        assert!(snapshot.full_rejections > 0);
        assert_eq!(output.read(), Ok(9.0));
    }
}

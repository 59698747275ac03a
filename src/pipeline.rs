use crate::buffer::RingBuffer;
use crate::error::{PipelineError, Result};
use crate::lock::LockPolicy;
use crate::metrics::{MetricsSnapshot, RoleMetrics};
use crate::rate::Pacing;
use crate::sink::SampleSink;
use crate::source::SampleSource;
use crate::stage::{Consumer, Producer, ShutdownFlag, Worker};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pacing applied by each role of a pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolePacing {
    pub producer: Pacing,
    pub worker_read: Pacing,
    pub worker_write: Pacing,
    pub consumer: Pacing,
}

impl RolePacing {
    fn validate(&self, policy: &LockPolicy) -> Result<()> {
        for pacing in [
            &self.producer,
            &self.worker_read,
            &self.worker_write,
            &self.consumer,
        ] {
            pacing.validate(policy)?;
        }
        Ok(())
    }
}

/// Builder for constructing pipelines
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    capacities: Vec<usize>,
    lock_policy: LockPolicy,
    pacing: RolePacing,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer. Every buffer after the first gets a worker feeding it.
    pub fn add_buffer(mut self, capacity: usize) -> Self {
        self.capacities.push(capacity);
        self
    }

    /// Lock retry policy shared by every buffer
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn producer_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing.producer = pacing;
        self
    }

    pub fn worker_pacing(mut self, read: Pacing, write: Pacing) -> Self {
        self.pacing.worker_read = read;
        self.pacing.worker_write = write;
        self
    }

    pub fn consumer_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing.consumer = pacing;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Result<Pipeline> {
        if self.capacities.is_empty() {
            return Err(PipelineError::NoStages);
        }
        self.pacing.validate(&self.lock_policy)?;

        let buffers = self
            .capacities
            .iter()
            .map(|&capacity| RingBuffer::with_lock_policy(capacity, self.lock_policy))
            .collect::<Result<Vec<_>>>()?;

        Ok(Pipeline {
            buffers,
            pacing: self.pacing,
            shutdown: ShutdownFlag::new(),
        })
    }
}

/// A chain of buffers waiting for its roles to be started
pub struct Pipeline {
    buffers: Vec<RingBuffer>,
    pacing: RolePacing,
    shutdown: ShutdownFlag,
}

impl Pipeline {
    /// Get the buffer at `index`
    pub fn buffer(&self, index: usize) -> Option<&RingBuffer> {
        self.buffers.get(index)
    }

    /// Number of buffers in the chain
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of interior worker stages
    pub fn worker_count(&self) -> usize {
        self.buffers.len() - 1
    }

    /// Flag that stops every role of this pipeline
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Spawn the producer, the workers and the consumer.
    ///
    /// The producer writes buffer 0, worker `i` moves samples from buffer `i`
    /// to buffer `i + 1`, and the consumer reads the last buffer into `sink`.
    /// Once the sink is satisfied the consumer triggers shutdown so that
    /// upstream roles stop.
    pub fn start<S, K>(self, source: S, sink: K) -> Result<RunningPipeline<K>>
    where
        S: SampleSource + Send + 'static,
        K: SampleSink + Send + 'static,
    {
        let Pipeline {
            buffers,
            pacing,
            shutdown,
        } = self;
        let last = buffers.len() - 1;

        let mut producer =
            Producer::new(buffers[0].clone(), shutdown.clone()).with_pacing(pacing.producer);
        let mut workers: Vec<Worker> = (0..last)
            .map(|i| {
                Worker::new(i, buffers[i].clone(), buffers[i + 1].clone(), shutdown.clone())
                    .with_pacing(pacing.worker_read, pacing.worker_write)
            })
            .collect();
        let mut consumer =
            Consumer::new(buffers[last].clone(), shutdown.clone()).with_pacing(pacing.consumer);

        let metrics = PipelineMetrics {
            producer: producer.metrics().clone(),
            workers: workers.iter().map(|w| w.metrics().clone()).collect(),
            consumer: consumer.metrics().clone(),
        };

        info!(
            buffers = buffers.len(),
            workers = workers.len(),
            "starting pipeline"
        );

        let mut spawned = Spawned::new(shutdown.clone());

        // Downstream first, so every reader is up before data arrives
        let consumer_shutdown = shutdown.clone();
        let consumer_handle = spawned.spawn("consumer".to_string(), move || {
            let mut sink = sink;
            consumer.run(&mut sink);
            if sink.is_satisfied() {
                debug!("sink satisfied, stopping upstream roles");
                consumer_shutdown.trigger();
            }
            sink
        })?;

        let mut worker_handles = Vec::with_capacity(workers.len());
        for mut worker in workers.drain(..).rev() {
            let name = format!("worker-{}", worker.id());
            worker_handles.push(spawned.spawn(name, move || worker.run())?);
        }
        worker_handles.reverse();

        let producer_handle = spawned.spawn("producer".to_string(), move || {
            let mut source = source;
            producer.run(&mut source)
        })?;

        Ok(RunningPipeline {
            producer: producer_handle,
            workers: worker_handles,
            consumer: consumer_handle,
            metrics,
            buffers,
            shutdown,
        })
    }
}

/// Triggers shutdown when the role thread holding it unwinds, so the roles
/// still running stop retrying against a peer that is gone
struct PanicGuard {
    role: String,
    shutdown: ShutdownFlag,
}

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(role = %self.role, "role panicked, stopping pipeline");
            self.shutdown.trigger();
        }
    }
}

/// Spawns named role threads; if a spawn or a role fails, signals shutdown
/// so the other roles wind down on their own
struct Spawned {
    shutdown: ShutdownFlag,
}

impl Spawned {
    fn new(shutdown: ShutdownFlag) -> Self {
        Self { shutdown }
    }

    fn spawn<T, F>(&mut self, name: String, f: F) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let guard = PanicGuard {
            role: name.clone(),
            shutdown: self.shutdown.clone(),
        };
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                f()
            })
            .map_err(|e| {
                self.shutdown.trigger();
                PipelineError::ThreadError(format!("failed to spawn {name}: {e}"))
            })
    }
}

/// Shared handles on every role's metrics
#[derive(Debug, Clone)]
struct PipelineMetrics {
    producer: RoleMetrics,
    workers: Vec<RoleMetrics>,
    consumer: RoleMetrics,
}

impl PipelineMetrics {
    fn report(&self) -> PipelineReport {
        PipelineReport {
            producer: self.producer.snapshot(),
            workers: self.workers.iter().map(RoleMetrics::snapshot).collect(),
            consumer: self.consumer.snapshot(),
        }
    }
}

/// Metrics of every role at one point in time
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub producer: MetricsSnapshot,
    pub workers: Vec<MetricsSnapshot>,
    pub consumer: MetricsSnapshot,
}

impl PipelineReport {
    /// Samples written by the producer
    pub fn written(&self) -> u64 {
        self.producer.moved
    }

    /// Samples delivered to the sink
    pub fn consumed(&self) -> u64 {
        self.consumer.moved
    }

    /// Samples explicitly recorded as lost by any role
    pub fn total_lost(&self) -> u64 {
        self.producer.lost + self.workers.iter().map(|w| w.lost).sum::<u64>()
    }

    /// Multi-line summary of every role
    pub fn format(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        summary.push_str(&format!("  Producer: {}\n", self.producer.format()));
        for (i, worker) in self.workers.iter().enumerate() {
            summary.push_str(&format!("  Worker {}: {}\n", i, worker.format()));
        }
        summary.push_str(&format!("  Consumer: {}\n", self.consumer.format()));
        summary
    }
}

/// What a finished pipeline hands back
#[derive(Debug)]
pub struct PipelineOutput<K> {
    pub sink: K,
    pub report: PipelineReport,
}

/// A running pipeline that can be monitored, stopped and joined
pub struct RunningPipeline<K> {
    producer: JoinHandle<Result<u64>>,
    workers: Vec<JoinHandle<u64>>,
    consumer: JoinHandle<K>,
    metrics: PipelineMetrics,
    buffers: Vec<RingBuffer>,
    shutdown: ShutdownFlag,
}

impl<K> RunningPipeline<K> {
    /// Get the buffer at `index` (diagnostics)
    pub fn buffer(&self, index: usize) -> Option<&RingBuffer> {
        self.buffers.get(index)
    }

    /// Flag that stops every role of this pipeline
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Current metrics of every role
    pub fn report(&self) -> PipelineReport {
        self.metrics.report()
    }

    /// Get metrics summary
    pub fn metrics_summary(&self) -> String {
        self.report().format()
    }

    /// Whether every role thread has exited
    pub fn is_finished(&self) -> bool {
        self.producer.is_finished()
            && self.consumer.is_finished()
            && self.workers.iter().all(JoinHandle::is_finished)
    }

    /// Join every role and return the sink with the final metrics.
    ///
    /// Blocks until the source ends and the chain drains, or until shutdown
    /// is signaled through [`RunningPipeline::shutdown_flag`].
    pub fn wait(self) -> Result<PipelineOutput<K>> {
        let RunningPipeline {
            producer,
            workers,
            consumer,
            metrics,
            shutdown,
            ..
        } = self;

        let produced = join("producer", producer);
        if produced.is_err() {
            shutdown.trigger();
        }
        let mut worker_error = None;
        for (i, handle) in workers.into_iter().enumerate() {
            if let Err(e) = join(&format!("worker-{i}"), handle) {
                shutdown.trigger();
                worker_error.get_or_insert(e);
            }
        }
        let sink = join("consumer", consumer)?;

        produced??;
        if let Some(e) = worker_error {
            return Err(e);
        }

        let report = metrics.report();
        info!(
            written = report.written(),
            consumed = report.consumed(),
            lost = report.total_lost(),
            "pipeline finished"
        );
        Ok(PipelineOutput { sink, report })
    }

    /// Wait up to `timeout` for the pipeline to finish on its own, then
    /// signal shutdown and join
    pub fn wait_timeout(self, timeout: Duration) -> Result<PipelineOutput<K>> {
        let start = Instant::now();
        while !self.is_finished() && start.elapsed() < timeout {
            thread::sleep(Duration::from_millis(1));
        }
        if !self.is_finished() {
            debug!(?timeout, "pipeline still running after timeout, shutting down");
        }
        self.shutdown()
    }

    /// Signal every role to stop, then join
    pub fn shutdown(self) -> Result<PipelineOutput<K>> {
        self.shutdown.trigger();
        self.wait()
    }
}

fn join<T>(role: &str, handle: JoinHandle<T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| PipelineError::ThreadError(format!("{role} thread panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecSource;

    #[test]
    fn test_pipeline_builder() {
        let pipeline = PipelineBuilder::new()
            .add_buffer(10)
            .add_buffer(10)
            .build()
            .unwrap();
        assert_eq!(pipeline.buffer_count(), 2);
        assert_eq!(pipeline.worker_count(), 1);
        assert!(pipeline.buffer(0).unwrap().is_empty());
        assert!(pipeline.buffer(2).is_none());
    }

    #[test]
    fn test_no_stages_error() {
        let result = PipelineBuilder::new().build();
        assert!(matches!(result, Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_invalid_capacity_propagates() {
        let result = PipelineBuilder::new().add_buffer(4).add_buffer(0).build();
        assert!(matches!(result, Err(PipelineError::InvalidCapacity(0))));
    }

    #[test]
    fn test_jitter_validated_against_lock_policy() {
        let policy = LockPolicy::new(10, Duration::from_micros(10)).unwrap();
        let result = PipelineBuilder::new()
            .add_buffer(4)
            .lock_policy(policy)
            .consumer_pacing(Pacing::jitter_micros(1000, 1000))
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidPacing(_))));
    }

    #[test]
    fn test_single_buffer_pipeline() {
        let pipeline = PipelineBuilder::new().add_buffer(3).build().unwrap();
        let values = vec![0.5, -0.25, 1.0, 2.0, 3.5];

        let output = pipeline
            .start(VecSource::new(values.clone()), Vec::<f32>::new())
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(output.sink, values);
        assert_eq!(output.report.written(), 5);
        assert_eq!(output.report.consumed(), 5);
        assert!(output.report.workers.is_empty());
    }

    struct PanickingSink;

    impl SampleSink for PanickingSink {
        fn accept(&mut self, _sample: f32) {
            panic!("sink cannot take samples");
        }
    }

    #[test]
    fn test_consumer_panic_stops_pipeline() {
        let pipeline = PipelineBuilder::new()
            .add_buffer(4)
            .add_buffer(4)
            .build()
            .unwrap();
        let values: Vec<f32> = (0..100).map(|i| i as f32).collect();

        let running = pipeline
            .start(VecSource::new(values), PanickingSink)
            .unwrap();
        let shutdown = running.shutdown_flag();
        let result = running.wait();

        assert!(shutdown.is_triggered());
        assert!(matches!(result, Err(PipelineError::ThreadError(msg)) if msg.contains("consumer")));
    }

    #[test]
    fn test_report_format_lists_roles() {
        let pipeline = PipelineBuilder::new()
            .add_buffer(4)
            .add_buffer(4)
            .build()
            .unwrap();
        let output = pipeline
            .start(VecSource::new(vec![1.0]), Vec::<f32>::new())
            .unwrap()
            .wait()
            .unwrap();

        let summary = output.report.format();
        assert!(summary.contains("Producer:"));
        assert!(summary.contains("Worker 0:"));
        assert!(summary.contains("Consumer:"));
    }
}

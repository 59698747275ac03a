//! Bounded, lossless ring buffers for real-time sample streams, and the
//! multi-stage pipelines built from them.
//!
//! A [`RingBuffer`] holds a fixed number of `f32` samples and is shared by
//! exactly one writer thread and one reader thread. Writes and reads never wait
//! on fullness or emptiness; they return [`Rejected`] and leave the retry
//! policy to the caller. Lock acquisition itself is bounded by a
//! [`LockPolicy`], so a stalled peer can never hang a stage.
//!
//! Roles ([`Producer`], [`Worker`], [`Consumer`]) run on their own threads and
//! are chained by [`PipelineBuilder`]:
//!
//! ```text
//! source -> Producer -> [buf 0] -> Worker 0 -> [buf 1] -> ... -> [buf N-1] -> Consumer -> sink
//! ```
//!
//! # Example
//!
//! ```
//! use ring_pipeline::{PipelineBuilder, VecSource};
//!
//! let pipeline = PipelineBuilder::new()
//!     .add_buffer(4)
//!     .add_buffer(4)
//!     .build()?;
//!
//! let output = pipeline
//!     .start(VecSource::new(vec![0.1, 0.2, 0.3]), Vec::<f32>::new())?
//!     .wait()?;
//!
//! assert_eq!(output.sink, vec![0.1, 0.2, 0.3]);
//! # Ok::<(), ring_pipeline::PipelineError>(())
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod pipeline;
pub mod rate;
pub mod sink;
pub mod source;
pub mod stage;
pub mod telemetry;

// Re-exports for convenience
pub use buffer::{BufferSnapshot, Rejected, RingBuffer, SAMPLE_EPSILON};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use lock::LockPolicy;
pub use metrics::{MetricsSnapshot, RoleMetrics};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineOutput, PipelineReport, RunningPipeline};
pub use rate::Pacing;
pub use sink::{LimitSink, SampleSink, StatsSink};
pub use source::{CsvSource, RawF32Source, SampleSource, SineSource, VecSource};
pub use stage::{Consumer, Producer, ShutdownFlag, Worker};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

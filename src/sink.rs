//! Sample sinks fed by a pipeline consumer, in FIFO order.

/// Receives samples from a consumer
pub trait SampleSink {
    /// Take one sample
    fn accept(&mut self, sample: f32);

    /// Whether the sink wants no more samples
    fn is_satisfied(&self) -> bool {
        false
    }
}

impl SampleSink for Vec<f32> {
    fn accept(&mut self, sample: f32) {
        self.push(sample);
    }
}

impl<K: SampleSink + ?Sized> SampleSink for Box<K> {
    fn accept(&mut self, sample: f32) {
        (**self).accept(sample)
    }

    fn is_satisfied(&self) -> bool {
        (**self).is_satisfied()
    }
}

/// Collects samples until `limit` have arrived
#[derive(Debug, Clone)]
pub struct LimitSink {
    samples: Vec<f32>,
    limit: usize,
}

impl LimitSink {
    pub fn new(limit: usize) -> Self {
        Self {
            samples: Vec::with_capacity(limit),
            limit,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

impl SampleSink for LimitSink {
    fn accept(&mut self, sample: f32) {
        if self.samples.len() < self.limit {
            self.samples.push(sample);
        }
    }

    fn is_satisfied(&self) -> bool {
        self.samples.len() >= self.limit
    }
}

/// Running statistics over everything consumed
#[derive(Debug, Clone, Default)]
pub struct StatsSink {
    count: u64,
    min: Option<f32>,
    max: Option<f32>,
    sum: f64,
}

impl StatsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> Option<f32> {
        self.min
    }

    pub fn max(&self) -> Option<f32> {
        self.max
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    /// One-line summary for display
    pub fn format(&self) -> String {
        match (self.min, self.max, self.mean()) {
            (Some(min), Some(max), Some(mean)) => format!(
                "Samples: {}, Min: {:.4}, Max: {:.4}, Mean: {:.4}",
                self.count, min, max, mean
            ),
            _ => "Samples: 0".to_string(),
        }
    }
}

impl SampleSink for StatsSink {
    fn accept(&mut self, sample: f32) {
        self.count += 1;
        self.sum += f64::from(sample);
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        self.max = Some(self.max.map_or(sample, |m| m.max(sample)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_never_satisfied() {
        let mut sink: Vec<f32> = Vec::new();
        sink.accept(1.0);
        sink.accept(2.0);
        assert_eq!(sink, vec![1.0, 2.0]);
        assert!(!sink.is_satisfied());
    }

    #[test]
    fn test_limit_sink() {
        let mut sink = LimitSink::new(2);
        sink.accept(1.0);
        assert!(!sink.is_satisfied());
        sink.accept(2.0);
        sink.accept(3.0);
        assert!(sink.is_satisfied());
        assert_eq!(sink.into_samples(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_stats_sink() {
        let mut sink = StatsSink::new();
        assert_eq!(sink.mean(), None);
        assert_eq!(sink.format(), "Samples: 0");

        for sample in [-1.0, 0.5, 2.0] {
            sink.accept(sample);
        }
        assert_eq!(sink.count(), 3);
        assert_eq!(sink.min(), Some(-1.0));
        assert_eq!(sink.max(), Some(2.0));
        assert_eq!(sink.mean(), Some(0.5));
    }
}

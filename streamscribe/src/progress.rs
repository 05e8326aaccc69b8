use tokio::time::Instant;
use tracing::trace;

use crate::audio::DurationEstimate;

/// Highest value reported before the session ends; 1.0 is reserved for [`ProgressReporter::finish`].
const MAX_RUNNING_PROGRESS: f32 = 0.99;

/// Receives progress as a fraction in `[0, 1]`.
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f32);
}

impl<F> ProgressSink for F
where
    F: Fn(f32) + Send + Sync,
{
    fn report(&self, fraction: f32) {
        self(fraction)
    }
}

/// Sink that discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _fraction: f32) {}
}

/// How session activity maps onto a fraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressStrategy {
    /// Elapsed wall-clock time over the estimated audio duration in seconds.
    Duration(f64),
    /// Segments received over an assumed segment count.
    SegmentCount(usize),
}

impl ProgressStrategy {
    /// Duration-based when a positive duration is known, segment-based otherwise.
    pub fn choose(estimate: DurationEstimate, segment_cap: usize) -> Self {
        let secs = estimate.seconds();
        if secs.is_finite() && secs > 0.0 {
            ProgressStrategy::Duration(secs)
        } else {
            ProgressStrategy::SegmentCount(segment_cap.max(1))
        }
    }
}

/// Monotonic progress for one recognition session.
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    strategy: ProgressStrategy,
    started: Instant,
    segments: usize,
    last: f32,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, strategy: ProgressStrategy) -> Self {
        Self {
            sink,
            strategy,
            started: Instant::now(),
            segments: 0,
            last: 0.0,
            finished: false,
        }
    }

    /// Last value forwarded to the sink.
    pub fn last(&self) -> f32 {
        self.last
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn on_segment(&mut self) {
        self.segments += 1;
        self.update();
    }

    /// Re-evaluate time-based progress.
    pub fn tick(&mut self) {
        self.update();
    }

    /// Report exactly 1.0, once. Later calls do nothing.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.last = 1.0;
        self.sink.report(1.0);
    }

    fn compute(&self) -> f32 {
        let raw = match self.strategy {
            ProgressStrategy::Duration(secs) => self.started.elapsed().as_secs_f64() / secs,
            ProgressStrategy::SegmentCount(cap) => self.segments as f64 / cap as f64,
        };
        (raw as f32).clamp(0.0, MAX_RUNNING_PROGRESS)
    }

    fn update(&mut self) {
        if self.finished {
            return;
        }
        let value = self.compute();
        if value > self.last {
            trace!(progress = value, "progress");
            self.last = value;
            self.sink.report(value);
        }
    }
}

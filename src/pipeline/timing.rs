use std::fmt;
use std::time::Duration;

/// Per-frame tracking latencies in seconds, in feed order.
///
/// Owned by the producer thread while the loop runs and handed to the
/// supervisor through the thread join; it is never shared.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackTiming {
    samples: Vec<f64>,
}

impl TrackTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed.as_secs_f64());
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Median and mean, or `None` when nothing was recorded.
    ///
    /// The median is the upper-middle element of the sorted samples.
    pub fn summary(&self) -> Option<TimingSummary> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        let total: f64 = sorted.iter().sum();
        Some(TimingSummary {
            count: sorted.len(),
            median_secs: sorted[sorted.len() / 2],
            mean_secs: total / sorted.len() as f64,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimingSummary {
    pub count: usize,
    pub median_secs: f64,
    pub mean_secs: f64,
}

impl fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "median tracking time: {:.6}[s], mean tracking time: {:.6}[s] over {} frames",
            self.median_secs, self.mean_secs, self.count
        )
    }
}

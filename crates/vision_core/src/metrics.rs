use crate::types::PerformanceMetrics;

/// Running processing-time statistics. Only successful frames are fed in.
#[derive(Debug, Default, Clone)]
pub struct PerformanceMonitor {
    metrics: PerformanceMetrics,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one frame's processing time into the running mean.
    pub fn update(&mut self, processing_ms: f64) {
        let m = &mut self.metrics;
        m.total_processed += 1;
        m.avg_processing_time_ms +=
            (processing_ms - m.avg_processing_time_ms) / m.total_processed as f64;
        m.fps = if processing_ms > 0.0 {
            (1000.0 / processing_ms).round()
        } else {
            0.0
        };
    }

    pub fn snapshot(&self) -> PerformanceMetrics {
        self.metrics.clone()
    }

    pub fn reset(&mut self) {
        self.metrics = PerformanceMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_mean_matches_naive_mean() {
        let samples = [12.5, 40.0, 3.25, 18.0, 77.7, 5.0, 33.3];
        let mut mon = PerformanceMonitor::new();
        for s in samples {
            mon.update(s);
        }
        let naive: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let m = mon.snapshot();
        assert!((m.avg_processing_time_ms - naive).abs() < 1e-9);
        assert_eq!(m.total_processed, samples.len() as u64);
    }

    #[test]
    fn fps_comes_from_the_last_frame() {
        let mut mon = PerformanceMonitor::new();
        mon.update(100.0);
        mon.update(30.0);
        assert_eq!(mon.snapshot().fps, 33.0);
    }

    #[test]
    fn zero_duration_reports_zero_fps() {
        let mut mon = PerformanceMonitor::new();
        mon.update(0.0);
        let m = mon.snapshot();
        assert_eq!(m.fps, 0.0);
        assert_eq!(m.total_processed, 1);
    }
}

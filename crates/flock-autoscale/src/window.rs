//! Fixed-size window of load samples.

use std::collections::VecDeque;

/// The most recent `size` load samples.
#[derive(Debug, Clone)]
pub struct LoadWindow {
    samples: VecDeque<f64>,
    size: usize,
}

impl LoadWindow {
    /// A window holding up to `size` samples (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            samples: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Add a sample, evicting the oldest once full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.size
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Arithmetic mean once the window is full; until then the most recent
    /// sample. `None` before the first sample.
    pub fn smoothed(&self) -> Option<f64> {
        if !self.is_full() {
            return self.samples.back().copied();
        }
        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_value() {
        let window = LoadWindow::new(3);
        assert_eq!(window.smoothed(), None);
        assert!(window.is_empty());
    }

    #[test]
    fn partial_window_tracks_latest_sample() {
        let mut window = LoadWindow::new(3);
        window.push(10.0);
        assert_eq!(window.smoothed(), Some(10.0));
        window.push(2.0);
        assert_eq!(window.smoothed(), Some(2.0));
        assert!(!window.is_full());
    }

    #[test]
    fn full_window_averages() {
        let mut window = LoadWindow::new(3);
        for sample in [3.0, 6.0, 9.0] {
            window.push(sample);
        }
        assert_eq!(window.smoothed(), Some(6.0));

        // Oldest sample (3.0) falls out.
        window.push(12.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.smoothed(), Some(9.0));
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut window = LoadWindow::new(0);
        window.push(4.0);
        window.push(5.0);
        assert!(window.is_full());
        assert_eq!(window.smoothed(), Some(5.0));
    }
}

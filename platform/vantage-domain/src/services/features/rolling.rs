use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RollingSma {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
}

impl RollingSma {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::new(),
            sum: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        if self.window == 0 {
            return None;
        }

        self.buf.push_back(value);
        self.sum += value;
        while self.buf.len() > self.window {
            if let Some(front) = self.buf.pop_front() {
                self.sum -= front;
            }
        }

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        (self.window > 0 && self.buf.len() == self.window).then(|| self.sum / self.window as f64)
    }
}

/// Relative strength index over simple close-to-close returns.
#[derive(Debug, Clone)]
pub struct RollingRsi {
    window: usize,
    prev_close: Option<f64>,
    diffs: VecDeque<f64>,
    sum_gains: f64,
    sum_losses: f64,
}

impl RollingRsi {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            prev_close: None,
            diffs: VecDeque::new(),
            sum_gains: 0.0,
            sum_losses: 0.0,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        let prev = self.prev_close.replace(close);
        if self.window == 0 {
            return None;
        }
        let prev = prev?;
        if prev <= 0.0 || !prev.is_finite() || !close.is_finite() {
            return None;
        }

        let diff = close / prev - 1.0;
        self.diffs.push_back(diff);
        if diff > 0.0 {
            self.sum_gains += diff;
        } else {
            self.sum_losses += -diff;
        }

        while self.diffs.len() > self.window {
            if let Some(front) = self.diffs.pop_front() {
                if front > 0.0 {
                    self.sum_gains -= front;
                } else {
                    self.sum_losses -= -front;
                }
            }
        }

        if self.diffs.len() < self.window {
            return None;
        }

        if self.sum_gains + self.sum_losses == 0.0 {
            return Some(50.0);
        }

        let rs = self.sum_gains / self.sum_losses.max(1e-9);
        Some(100.0 - (100.0 / (1.0 + rs)))
    }
}

#[cfg(test)]
mod tests {
    use super::{RollingRsi, RollingSma};

    #[test]
    fn sma_waits_for_full_window() {
        let mut sma = RollingSma::new(3);
        assert_eq!(sma.update(1.0), None);
        assert_eq!(sma.update(2.0), None);
        assert_eq!(sma.update(3.0), Some(2.0));
        assert_eq!(sma.update(6.0), Some(11.0 / 3.0));
    }

    #[test]
    fn rsi_is_high_in_uptrend() {
        let mut rsi = RollingRsi::new(3);
        let mut last = None;
        for close in [100.0, 101.0, 102.0, 103.0, 104.0] {
            last = rsi.update(close);
        }
        assert!(last.unwrap() > 99.0);
    }

    #[test]
    fn rsi_flat_series_is_neutral() {
        let mut rsi = RollingRsi::new(2);
        let mut last = None;
        for _ in 0..4 {
            last = rsi.update(100.0);
        }
        assert_eq!(last, Some(50.0));
    }

    #[test]
    fn huge_window_does_not_preallocate() {
        let mut sma = RollingSma::new(usize::MAX / 2);
        assert_eq!(sma.update(1.0), None);
        let mut rsi = RollingRsi::new(usize::MAX / 2);
        assert_eq!(rsi.update(100.0), None);
        assert_eq!(rsi.update(101.0), None);
    }
}

use std::time::Duration;

/// Raw channel-4 readings collected since the last window flush.
#[derive(Debug, Clone)]
pub struct AggregationBuffer {
    samples: Vec<f64>,
    window_length: Duration,
}

impl AggregationBuffer {
    pub fn new(window_length: Duration) -> Self {
        AggregationBuffer {
            samples: Vec::new(),
            window_length,
        }
    }

    pub fn window_length(&self) -> Duration {
        self.window_length
    }

    pub fn push(&mut self, value: f64) {
        self.samples.push(value);
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

    /// Arithmetic mean of the current window, `None` while empty.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }

        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Read the average and clear the window. The window is cleared even when it was empty.
    pub fn take_average(&mut self) -> Option<f64> {
        let average = self.average();
        self.samples.clear();
        average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_average_clears() {
        let mut buffer = AggregationBuffer::new(Duration::from_secs(3600));
        buffer.push(10.0);
        buffer.push(20.0);
        buffer.push(30.0);

        assert_eq!(buffer.take_average(), Some(20.0));
        assert!(buffer.is_empty());
        assert_eq!(buffer.take_average(), None);
    }
}

use crate::error::EngineError;
use crate::value_objects::bar::Bar;
use serde::{Deserialize, Serialize};

/// Inclusive time window applied to loaded series. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl DateRange {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Result<Self, EngineError> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(EngineError::InvalidDateRange { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }

    pub fn filter(&self, bars: &[Bar]) -> Vec<Bar> {
        bars.iter()
            .filter(|bar| self.contains(bar.timestamp))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::DateRange;
    use crate::error::EngineError;

    #[test]
    fn rejects_inverted_range() {
        assert_eq!(
            DateRange::new(Some(10), Some(10)),
            Err(EngineError::InvalidDateRange { start: 10, end: 10 })
        );
    }

    #[test]
    fn open_bounds_contain_everything() {
        let range = DateRange::new(Some(5), None).unwrap();
        assert!(!range.contains(4));
        assert!(range.contains(5));
        assert!(range.contains(i64::MAX));
        assert!(DateRange::default().contains(i64::MIN));
    }
}

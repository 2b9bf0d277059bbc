//! Row range restriction for iterators.

use spillway_common::error::{SpillError, SpillResult};

/// Inclusive range of row indices an iterator visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFilter {
    from_row: u64,
    to_row: u64,
}

impl Default for TableFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl TableFilter {
    /// Visits every row.
    pub const fn all() -> Self {
        Self {
            from_row: 0,
            to_row: u64::MAX,
        }
    }

    /// Visits rows `from_row..=to_row`.
    pub fn range(from_row: u64, to_row: u64) -> SpillResult<Self> {
        if from_row > to_row {
            return Err(SpillError::invalid_argument(format!(
                "filter range {from_row}..={to_row} is empty"
            )));
        }
        Ok(Self { from_row, to_row })
    }

    /// Visits rows from `from_row` to the end.
    pub const fn from_row(from_row: u64) -> Self {
        Self {
            from_row,
            to_row: u64::MAX,
        }
    }

    /// First row visited.
    pub const fn first(&self) -> u64 {
        self.from_row
    }

    /// Last row visited, if bounded.
    pub const fn last(&self) -> Option<u64> {
        if self.to_row == u64::MAX {
            None
        } else {
            Some(self.to_row)
        }
    }

    /// Returns true if row `index` is visited.
    pub const fn contains(&self, index: u64) -> bool {
        index >= self.from_row && index <= self.to_row
    }

    /// Exclusive end index for a table of `size` rows.
    pub fn end(&self, size: u64) -> u64 {
        self.to_row.saturating_add(1).min(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds_are_inclusive() {
        let filter = TableFilter::range(2, 4).unwrap();
        assert!(!filter.contains(1));
        assert!(filter.contains(2));
        assert!(filter.contains(4));
        assert!(!filter.contains(5));
        assert_eq!(filter.end(100), 5);
        assert_eq!(filter.end(3), 3);
        assert_eq!(filter.last(), Some(4));
    }

    #[test]
    fn test_open_ended() {
        let filter = TableFilter::from_row(10);
        assert_eq!(filter.first(), 10);
        assert_eq!(filter.last(), None);
        assert_eq!(filter.end(50), 50);
        assert_eq!(TableFilter::all().end(7), 7);
    }

    #[test]
    fn test_empty_range_rejected() {
        assert!(TableFilter::range(5, 4).is_err());
        assert!(TableFilter::range(5, 5).is_ok());
    }
}

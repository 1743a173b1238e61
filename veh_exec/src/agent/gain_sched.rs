//! # Error scaling
//!
//! Piecewise constant gain schedule on the lateral error. The error is multiplied by the factor
//! of the first bucket whose threshold exceeds its magnitude.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use ordered_float::OrderedFloat;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorScaling {
    /// `(threshold, factor)` pairs sorted by ascending threshold
    table: Vec<(f32, f32)>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ErrorScaling {
    /// Build the schedule from `[threshold, factor]` pairs in any order.
    ///
    /// Pairs with a NaN threshold are ignored.
    pub fn new(pairs: &[[f32; 2]]) -> Self {
        let mut table: Vec<(f32, f32)> = pairs
            .iter()
            .filter(|p| !p[0].is_nan())
            .map(|p| (p[0], p[1]))
            .collect();

        table.sort_by_key(|(threshold, _)| OrderedFloat(*threshold));

        Self { table }
    }

    /// Factor applied to an error of this size. Errors beyond every threshold are not scaled.
    pub fn factor(&self, error: f32) -> f32 {
        let mag = error.abs();

        self.table
            .iter()
            .find(|(threshold, _)| mag < *threshold)
            .map(|(_, factor)| *factor)
            .unwrap_or(1.0)
    }

    pub fn apply(&self, error: f32) -> f32 {
        error * self.factor(error)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn table() -> ErrorScaling {
        // Deliberately out of order
        ErrorScaling::new(&[
            [100.0, 1.75],
            [20.0, 0.1],
            [200.0, 3.0],
            [40.0, 0.75],
            [80.0, 1.5],
            [60.0, 1.0],
        ])
    }

    #[test]
    fn test_bucket_selection() {
        let s = table();

        assert_eq!(s.factor(0.0), 0.1);
        assert_eq!(s.factor(19.9), 0.1);
        assert_eq!(s.factor(20.0), 0.75);
        assert_eq!(s.factor(-45.0), 1.0);
        assert_eq!(s.factor(150.0), 3.0);
        assert_eq!(s.apply(-30.0), -22.5);
    }

    #[test]
    fn test_beyond_all_thresholds_is_identity() {
        let s = table();

        assert_eq!(s.factor(200.0), 1.0);
        assert_eq!(s.apply(-500.0), -500.0);

        let empty = ErrorScaling::new(&[]);
        assert!(empty.is_empty());
        assert_eq!(empty.apply(12.0), 12.0);
    }

    #[test]
    fn test_nan_threshold_ignored() {
        let s = ErrorScaling::new(&[[f32::NAN, 9.0], [10.0, 0.5]]);
        assert_eq!(s.len(), 1);
        assert_eq!(s.factor(5.0), 0.5);
    }
}

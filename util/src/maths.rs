//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Map a value from one range into another.
pub fn lin_map<T>(source_range: (T, T), target_range: (T, T), value: T) -> T
where
    T: Float,
{
    target_range.0
        + ((value - source_range.0) * (target_range.1 - target_range.0)
            / (source_range.1 - source_range.0))
}

/// Clamp a value into `[min, max]`.
///
/// NaN inputs are treated as zero.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float,
{
    if value.is_nan() {
        return T::zero().max(min).min(max);
    }

    value.max(min).min(max)
}

/// Signum which treats zero as positive.
pub fn sign_or_pos<T>(value: T) -> T
where
    T: Float,
{
    if value < T::zero() {
        -T::one()
    } else {
        T::one()
    }
}

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

/// Get the signed angular distance between two angles in the range of [0, 2pi].
///
/// This function will return the shortest signed distance between a and b accounting for wrapping
/// between 0 and 2pi.
pub fn get_ang_dist_2pi<T>(a: T, b: T) -> T
where
    T: Float,
{
    let tau_t: T = tau();

    let c = rem_euclid(a - b, tau_t);
    let d = rem_euclid(b - a, tau_t);

    if c < d {
        -c
    } else {
        d
    }
}

/// Least non-negative remainder of `lhs (mod rhs)`, as `f64::rem_euclid` does for concrete floats.
///
/// Round-off can make the result equal to `rhs.abs()` when `lhs` is a tiny negative number, see
/// [`mod_2pi`] which guards against it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the range [0, 2pi).
pub fn mod_2pi<T>(value: T) -> T
where
    T: Float,
{
    let tau_t: T = tau();

    let r = rem_euclid(value, tau_t);

    // Round-off in rem_euclid can land exactly on tau
    if r >= tau_t {
        T::zero()
    } else {
        r
    }
}

/// 2pi in the float type, NaN if the type can't represent it.
fn tau<T: Float>() -> T {
    T::from(std::f64::consts::TAU).unwrap_or_else(T::nan)
}

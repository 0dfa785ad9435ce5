//! Numeric helpers.

/// Piecewise linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be non-decreasing.  Values outside `[xp[0], xp[n-1]]` are
/// clamped to the first or last element of `fp`.  Where `xp` repeats a value,
/// the last point with that abscissa wins.  Returns `NaN` for empty input.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // First index whose abscissa exceeds `x`; 1 <= upper < n.
    let upper = xp[..n].partition_point(|v| *v <= x);
    let (x0, x1) = (xp[upper - 1], xp[upper]);
    let (y0, y1) = (fp[upper - 1], fp[upper]);
    if x1 == x0 {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}

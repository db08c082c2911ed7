use num_traits::Float;

pub const MIN_FREQ: f64 = 20.0;  // Lowest frequency shown on the analyzer and response curve
pub const MAX_FREQ: f64 = 20000.0;  // Highest frequency shown on the analyzer and response curve
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;  // Used in place of a non-positive rate
pub const MIN_DB: f64 = -24.0;  // Bottom of the response curve display range
pub const MAX_DB: f64 = 24.0;  // Top of the response curve display range

/// Frequencies that get a labelled vertical grid line.
pub const GRID_FREQUENCIES: [f32; 10] = [
    20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 20000.0,
];

/// Gains (dB) that get a horizontal grid line.
pub const GRID_GAINS: [f32; 5] = [-24.0, -12.0, 0.0, 12.0, 24.0];

/// Linearly remaps `value` from `[source_min, source_max]` to `[target_min, target_max]`.
///
/// No clamping is applied, values outside the source range extrapolate.
pub fn jmap<T: Float>(value: T, source_min: T, source_max: T, target_min: T, target_max: T) -> T {
    target_min + (value - source_min) * (target_max - target_min) / (source_max - source_min)
}

/// Maps a normalised position (0..1) onto a logarithmic range, e.g. x pixel -> frequency.
pub fn map_to_log10<T: Float>(proportion: T, min: T, max: T) -> T {
    let log_min = min.log10();
    let log_max = max.log10();
    T::from(10.0).unwrap_or_else(T::one).powf(log_min + (log_max - log_min) * proportion)
}

/// Inverse of [`map_to_log10`]: frequency -> normalised position (0..1).
///
/// Returns a non-finite value for non-positive inputs; callers that draw must check.
pub fn map_from_log10<T: Float>(value: T, min: T, max: T) -> T {
    (value.log10() - min.log10()) / (max.log10() - min.log10())
}

/// Converts a linear gain to decibels, flooring at `minus_infinity_db`.
pub fn gain_to_decibels<T: Float>(gain: T, minus_infinity_db: T) -> T {
    if gain > T::zero() {
        let twenty = T::from(20.0).unwrap_or_else(T::one);
        (twenty * gain.log10()).max(minus_infinity_db)
    } else {
        minus_infinity_db
    }
}

/// Converts decibels to a linear gain. Anything at or below `minus_infinity_db` is silence.
pub fn decibels_to_gain<T: Float>(decibels: T, minus_infinity_db: T) -> T {
    if decibels > minus_infinity_db {
        let twenty = T::from(20.0).unwrap_or_else(T::one);
        T::from(10.0).unwrap_or_else(T::one).powf(decibels / twenty)
    } else {
        T::zero()
    }
}

/// Returns `sample_rate` when usable, otherwise the default rate.
pub fn sanitize_sample_rate(sample_rate: f64) -> f64 {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        sample_rate
    } else {
        DEFAULT_SAMPLE_RATE
    }
}

//! Biquad coefficient design for the three bands.
//!
//! The peak band is a single RBJ peaking section. Cut bands are Butterworth
//! high/low-pass filters of order `2 * (slope + 1)`, split into cascaded
//! second-order sections so each stage stays numerically well behaved and the
//! steepness can change by enabling more or fewer stages.

use std::f64::consts::PI;

use crate::params::{ChainSettings, Slope};
use crate::utils::{decibels_to_gain, sanitize_sample_rate};

/// Maximum number of second-order sections in one cut band (48 dB/oct).
pub const MAX_CUT_STAGES: usize = 4;

/// Which band design produced a set of coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Peak,
    Cut,
}

/// Normalised biquad coefficients (a0 == 1) plus the design they came from.
///
/// `Copy` on purpose: stages swap a whole value at once and never share one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub kind: FilterKind,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    /// Unity gain, no filtering. Used before the first design.
    pub const fn passthrough(kind: FilterKind) -> Self {
        Self {
            kind,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    fn normalised(kind: FilterKind, b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            kind,
            b0: b[0] / a0,
            b1: b[1] / a0,
            b2: b[2] / a0,
            a1: a[1] / a0,
            a2: a[2] / a0,
        }
    }

    /// RBJ peaking (bell) filter. `gain` is linear.
    pub fn peak(sample_rate: f64, frequency: f64, q: f64, gain: f64) -> Self {
        let omega = 2.0 * PI * frequency / sample_rate;
        let alpha = omega.sin() / (2.0 * q);
        let a = gain.max(0.0).sqrt();
        let c2 = -2.0 * omega.cos();

        Self::normalised(
            FilterKind::Peak,
            [1.0 + alpha * a, c2, 1.0 - alpha * a],
            [1.0 + alpha / a, c2, 1.0 - alpha / a],
        )
    }

    /// Second-order high-pass section (bilinear transform with prewarping).
    pub fn high_pass(sample_rate: f64, frequency: f64, q: f64) -> Self {
        let n = 1.0 / (PI * frequency / sample_rate).tan();
        let n_squared = n * n;
        let inv_q = 1.0 / q;
        let c1 = 1.0 / (1.0 + inv_q * n + n_squared);

        Self {
            kind: FilterKind::Cut,
            b0: c1 * n_squared,
            b1: -2.0 * c1 * n_squared,
            b2: c1 * n_squared,
            a1: c1 * 2.0 * (1.0 - n_squared),
            a2: c1 * (1.0 - inv_q * n + n_squared),
        }
    }

    /// Second-order low-pass section (bilinear transform with prewarping).
    pub fn low_pass(sample_rate: f64, frequency: f64, q: f64) -> Self {
        let n = 1.0 / (PI * frequency / sample_rate).tan();
        let n_squared = n * n;
        let inv_q = 1.0 / q;
        let c1 = 1.0 / (1.0 + inv_q * n + n_squared);

        Self {
            kind: FilterKind::Cut,
            b0: c1,
            b1: 2.0 * c1,
            b2: c1,
            a1: c1 * 2.0 * (1.0 - n_squared),
            a2: c1 * (1.0 - inv_q * n + n_squared),
        }
    }

    /// |H(e^jw)| at `frequency`.
    ///
    /// Evaluates (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2) on the unit circle.
    pub fn magnitude_for_frequency(&self, frequency: f64, sample_rate: f64) -> f64 {
        let omega = 2.0 * PI * frequency / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let (sin_2w, cos_2w) = (2.0 * omega).sin_cos();

        let num_real = self.b0 + self.b1 * cos_w + self.b2 * cos_2w;
        let num_imag = -(self.b1 * sin_w + self.b2 * sin_2w);
        let den_real = 1.0 + self.a1 * cos_w + self.a2 * cos_2w;
        let den_imag = -(self.a1 * sin_w + self.a2 * sin_2w);

        let num = (num_real * num_real + num_imag * num_imag).sqrt();
        let den = (den_real * den_real + den_imag * den_imag).sqrt();
        if den > 0.0 {
            num / den
        } else {
            0.0
        }
    }
}

/// Q of each section in a Butterworth cascade of even `order`, lowest Q first.
pub fn butterworth_qs(order: usize) -> [f64; MAX_CUT_STAGES] {
    let mut qs = [std::f64::consts::FRAC_1_SQRT_2; MAX_CUT_STAGES];
    let sections = (order / 2).min(MAX_CUT_STAGES);
    for (i, q) in qs.iter_mut().enumerate().take(sections) {
        let angle = (2 * i + 1) as f64 * PI / (2.0 * order as f64);
        *q = 1.0 / (2.0 * angle.cos());
    }
    qs
}

/// Keeps a design frequency strictly inside (0, Nyquist).
fn clamp_frequency(frequency: f32, sample_rate: f64) -> f64 {
    let nyquist = sample_rate * 0.5;
    let frequency = if frequency.is_finite() { frequency as f64 } else { 1000.0 };
    frequency.clamp(1.0, nyquist * 0.999)
}

pub fn make_peak_filter(settings: &ChainSettings, sample_rate: f64) -> Coefficients {
    let sample_rate = sanitize_sample_rate(sample_rate);
    let gain = decibels_to_gain(settings.peak_gain_in_decibels as f64, f64::NEG_INFINITY);
    let q = (settings.peak_quality as f64).max(0.01);
    Coefficients::peak(
        sample_rate,
        clamp_frequency(settings.peak_freq, sample_rate),
        q,
        gain,
    )
}

fn make_cut_filter(
    frequency: f32,
    slope: Slope,
    sample_rate: f64,
    design: fn(f64, f64, f64) -> Coefficients,
) -> [Coefficients; MAX_CUT_STAGES] {
    let sample_rate = sanitize_sample_rate(sample_rate);
    let frequency = clamp_frequency(frequency, sample_rate);
    let qs = butterworth_qs(slope.order());

    let mut sections = [Coefficients::passthrough(FilterKind::Cut); MAX_CUT_STAGES];
    for (section, &q) in sections.iter_mut().zip(qs.iter()).take(slope.stages()) {
        *section = design(sample_rate, frequency, q);
    }
    sections
}

/// High-pass cascade for the low cut band. Only the first `slope.stages()` entries
/// are meaningful, the rest stay passthrough placeholders.
pub fn make_low_cut_filter(
    settings: &ChainSettings,
    sample_rate: f64,
) -> [Coefficients; MAX_CUT_STAGES] {
    make_cut_filter(
        settings.low_cut_freq,
        settings.low_cut_slope,
        sample_rate,
        Coefficients::high_pass,
    )
}

/// Low-pass cascade for the high cut band.
pub fn make_high_cut_filter(
    settings: &ChainSettings,
    sample_rate: f64,
) -> [Coefficients; MAX_CUT_STAGES] {
    make_cut_filter(
        settings.high_cut_freq,
        settings.high_cut_slope,
        sample_rate,
        Coefficients::low_pass,
    )
}

use std::f32::consts::PI;
use log::debug;

/// Applies a linear fade in/out envelope to a signal in place
///
/// # Arguments
///
/// * `signal` - The samples to shape
/// * `fade_samples` - Number of samples to fade in/out at start/end
pub fn apply_fade_envelope(signal: &mut [f32], fade_samples: usize) {
    let total_samples = signal.len();
    let fade_samples = fade_samples.min(total_samples / 2);
    if fade_samples == 0 {
        return;
    }

    for i in 0..fade_samples {
        let fade_factor = i as f32 / fade_samples as f32;
        signal[i] *= fade_factor;
        signal[total_samples - 1 - i] *= fade_factor;
    }
}

/// Builds a test signal from a set of partials
///
/// # Arguments
///
/// * `partials` - (frequency, amplitude) pairs; non-positive entries are ignored
/// * `sample_rate` - Audio sample rate in Hz
/// * `num_samples` - Length of the signal
/// * `peak` - Absolute peak level after normalisation
///
/// # Returns
///
/// The summed partials scaled to `peak`, with a short fade at both ends so
/// the filters are not hit by a step
pub fn build_partials(
    partials: &[(f32, f32)],
    sample_rate: f32,
    num_samples: usize,
    peak: f32,
) -> Vec<f32> {
    let mut signal = vec![0.0; num_samples];

    for &(freq, amp) in partials.iter().filter(|&&(f, a)| f > 0.0 && a > 0.0) {
        let phase_delta = 2.0 * PI * freq / sample_rate;
        for (i, sample) in signal.iter_mut().enumerate() {
            *sample += amp * (phase_delta * i as f32).sin();
        }
    }

    normalize(&mut signal, peak);
    apply_fade_envelope(&mut signal, (sample_rate * 0.01) as usize);

    debug!("Built partials signal - Samples: {}, Partials: {}",
           num_samples, format_partials_debug(partials));

    signal
}

/// Exponential sine sweep from `start_freq` to `end_freq`
///
/// # Arguments
///
/// * `start_freq` / `end_freq` - Sweep range in Hz, both positive
/// * `sample_rate` - Audio sample rate in Hz
/// * `num_samples` - Length of the sweep
/// * `peak` - Amplitude of the sweep
pub fn log_sweep(
    start_freq: f32,
    end_freq: f32,
    sample_rate: f32,
    num_samples: usize,
    peak: f32,
) -> Vec<f32> {
    if num_samples == 0 || start_freq <= 0.0 || end_freq <= 0.0 {
        return vec![0.0; num_samples];
    }

    let duration = num_samples as f64 / sample_rate as f64;
    let ratio = (end_freq as f64 / start_freq as f64).ln();
    let k = duration / ratio;
    let w1 = 2.0 * std::f64::consts::PI * start_freq as f64;

    let mut signal: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let phase = if ratio.abs() < f64::EPSILON {
                w1 * t
            } else {
                w1 * k * ((t / k).exp() - 1.0)
            };
            (peak as f64 * phase.sin()) as f32
        })
        .collect();
    apply_fade_envelope(&mut signal, (sample_rate * 0.01) as usize);

    debug!("Built sweep - {} Hz to {} Hz over {:.2}s", start_freq, end_freq, duration);
    signal
}

/// Scales `signal` so its largest absolute sample equals `peak`
pub fn normalize(signal: &mut [f32], peak: f32) {
    let max_amplitude = signal.iter()
        .fold(0.0f32, |max, &x| max.max(x.abs()));

    if max_amplitude > 0.0 {
        let gain = peak / max_amplitude;
        for sample in signal.iter_mut() {
            *sample *= gain;
        }
    }
}

/// Formats partials for debug output
pub fn format_partials_debug(partials: &[(f32, f32)]) -> String {
    partials.iter()
        .filter(|&&(f, a)| f > 0.0 && a > 0.0)
        .map(|&(freq, amp)| format!("({:.1} Hz, {:.3})", freq, amp))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partials_are_normalised_and_faded() {
        let signal = build_partials(&[(440.0, 1.0), (880.0, 0.5), (0.0, 1.0)], 44100.0, 44100, 0.8);
        assert_eq!(signal.len(), 44100);
        assert_eq!(signal[0], 0.0);
        let peak = signal.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!((peak - 0.8).abs() < 1e-4, "peak {}", peak);
    }

    #[test]
    fn sweep_stays_within_peak() {
        let sweep = log_sweep(20.0, 20000.0, 48000.0, 48000, 0.5);
        assert_eq!(sweep.len(), 48000);
        assert!(sweep.iter().all(|s| s.abs() <= 0.5 + 1e-6));
        assert!(sweep.iter().any(|s| s.abs() > 0.4));
    }

    #[test]
    fn degenerate_sweep_is_silent() {
        assert!(log_sweep(0.0, 1000.0, 48000.0, 16, 1.0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn debug_format_skips_empty_partials() {
        assert_eq!(format_partials_debug(&[(100.0, 0.5), (0.0, 0.0)]), "(100.0 Hz, 0.500)");
    }
}

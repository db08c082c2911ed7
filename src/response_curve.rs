//! Analyzer-side coordinator, ticked at a fixed refresh rate.
//!
//! Owns the spectrum producers for both channels and a display-only copy of
//! the filter chain. The audio thread's chains are never touched from here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use portable_atomic::AtomicF64;
use rayon::prelude::*;

use crate::config::EqConfig;
use crate::filter_chain::MonoChain;
use crate::params::{ChainSettings, ListenerId, ParamId, ParameterStore};
use crate::processor::AnalyzerTaps;
use crate::spectrum::{AnalyzerPath, FftOrder, PathProducer, Rect};
use crate::utils::{
    gain_to_decibels, jmap, map_from_log10, map_to_log10, GRID_FREQUENCIES, GRID_GAINS, MAX_DB,
    MAX_FREQ, MIN_DB, MIN_FREQ,
};

/// Floor used when converting the response magnitude to decibels.
const RESPONSE_FLOOR_DB: f64 = -100.0;

pub struct ResponseCurve {
    store: Arc<ParameterStore>,
    listener: ListenerId,
    parameters_changed: Arc<AtomicBool>,
    sample_rate: Arc<AtomicF64>,
    chain: MonoChain,
    left_producer: PathProducer,
    right_producer: PathProducer,
    bounds: Rect,
    frequencies: Vec<f64>,
    magnitudes_db: Vec<f64>,
    redraw_needed: bool,
}

impl ResponseCurve {
    /// Registers a parameter listener on `store` and builds the display chain
    /// from the current values.
    pub fn new(store: Arc<ParameterStore>, taps: AnalyzerTaps, config: &EqConfig) -> Self {
        let parameters_changed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&parameters_changed);
        let listener = store.add_listener(move |_, _| flag.store(true, Ordering::Release));

        let AnalyzerTaps {
            left,
            right,
            sample_rate,
        } = taps;

        let points = config.response_points.max(2);
        let frequencies = (0..points)
            .map(|i| map_to_log10(i as f64 / points as f64, MIN_FREQ, MAX_FREQ))
            .collect();

        let mut curve = Self {
            store,
            listener,
            parameters_changed,
            sample_rate,
            chain: MonoChain::new(),
            left_producer: PathProducer::new(
                left,
                config.fft_order,
                config.negative_infinity_db,
                config.path_resolution,
            ),
            right_producer: PathProducer::new(
                right,
                config.fft_order,
                config.negative_infinity_db,
                config.path_resolution,
            ),
            bounds: config.analysis_bounds(),
            frequencies,
            magnitudes_db: Vec::with_capacity(points),
            redraw_needed: false,
        };
        curve.update_chain();
        curve.update_response_curve();
        curve.redraw_needed = true;
        curve
    }

    /// One refresh tick. Returns `true` when a redraw is needed, which is every tick.
    pub fn timer_callback(&mut self) -> bool {
        let sample_rate = self.sample_rate.load(Ordering::Acquire);

        if self.store.get_bool(ParamId::AnalyzerEnabled) {
            self.left_producer.process(self.bounds, sample_rate);
            self.right_producer.process(self.bounds, sample_rate);
        } else {
            self.left_producer.discard_pending();
            self.right_producer.discard_pending();
        }

        let rate_changed = self.chain.sample_rate() != sample_rate;
        if self
            .parameters_changed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || rate_changed
        {
            debug!(target: "response_curve", "params changed");
            self.update_chain();
        }

        self.update_response_curve();
        self.redraw_needed = true;
        true
    }

    fn update_chain(&mut self) {
        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        if !self.chain.is_prepared() || self.chain.sample_rate() != sample_rate {
            self.chain.prepare(sample_rate, 0);
        }
        let settings = ChainSettings::from_store(&self.store);
        self.chain.apply_settings(&settings);
    }

    fn update_response_curve(&mut self) {
        let chain = &self.chain;
        self.frequencies
            .par_iter()
            .map(|&freq| gain_to_decibels(chain.magnitude_for_frequency(freq), RESPONSE_FLOOR_DB))
            .collect_into_vec(&mut self.magnitudes_db);
    }

    /// Clears and returns the redraw request.
    pub fn take_redraw_request(&mut self) -> bool {
        std::mem::take(&mut self.redraw_needed)
    }

    /// Combined response of the display chain at `frequency`, in dB.
    pub fn response_at(&self, frequency: f64) -> f64 {
        gain_to_decibels(self.chain.magnitude_for_frequency(frequency), RESPONSE_FLOOR_DB)
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn magnitudes_db(&self) -> &[f64] {
        &self.magnitudes_db
    }

    /// The response magnitudes as a polyline, one point per sample frequency,
    /// with -24..+24 dB spanning the bounds from bottom to top.
    pub fn response_curve_path(&self) -> AnalyzerPath {
        let mut path = AnalyzerPath::default();
        let step = self.bounds.width as f64 / self.magnitudes_db.len().max(1) as f64;
        let bottom = self.bounds.bottom() as f64;
        let top = self.bounds.y as f64;
        for (i, &db) in self.magnitudes_db.iter().enumerate() {
            let x = self.bounds.x as f64 + i as f64 * step;
            let y = jmap(db, MIN_DB, MAX_DB, bottom, top);
            if y.is_finite() {
                path.line_to(x as f32, y as f32);
            }
        }
        path
    }

    /// (frequency, x) for every labelled vertical grid line.
    pub fn frequency_grid_lines(&self) -> Vec<(f32, f32)> {
        GRID_FREQUENCIES
            .iter()
            .map(|&freq| {
                let normalized = map_from_log10(freq, MIN_FREQ as f32, MAX_FREQ as f32);
                (freq, self.bounds.x + self.bounds.width * normalized)
            })
            .collect()
    }

    /// (gain in dB, y) for every horizontal grid line.
    pub fn gain_grid_lines(&self) -> Vec<(f32, f32)> {
        GRID_GAINS
            .iter()
            .map(|&gain| {
                let (bottom, top) = (self.bounds.bottom(), self.bounds.y);
                let y = jmap(gain, MIN_DB as f32, MAX_DB as f32, bottom, top);
                (gain, y)
            })
            .collect()
    }

    pub fn left_path(&self) -> &AnalyzerPath {
        self.left_producer.path()
    }

    pub fn right_path(&self) -> &AnalyzerPath {
        self.right_producer.path()
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Rect) {
        self.bounds = bounds;
        self.redraw_needed = true;
    }

    pub fn change_fft_order(&mut self, order: FftOrder) {
        self.left_producer.change_order(order);
        self.right_producer.change_order(order);
    }

    pub fn fft_order(&self) -> FftOrder {
        self.left_producer.fft_order()
    }

    /// Sampled blocks lost to full queues on both channels.
    pub fn dropped_blocks(&self) -> usize {
        self.left_producer.dropped_blocks() + self.right_producer.dropped_blocks()
    }

    pub fn display_chain(&self) -> &MonoChain {
        &self.chain
    }
}

impl Drop for ResponseCurve {
    fn drop(&mut self) {
        self.store.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_chain::ChainPosition;
    use crate::processor::EqProcessor;
    use approx::assert_abs_diff_eq;

    fn setup() -> (Arc<ParameterStore>, EqProcessor, ResponseCurve) {
        let store = Arc::new(ParameterStore::new());
        let (mut processor, taps) = EqProcessor::new(Arc::clone(&store));
        processor.prepare(44100.0, 512);
        let curve = ResponseCurve::new(Arc::clone(&store), taps, &EqConfig::default());
        (store, processor, curve)
    }

    #[test]
    fn neutral_settings_give_a_flat_curve_in_the_midrange() {
        let (_store, _processor, curve) = setup();
        assert_eq!(curve.magnitudes_db().len(), 600);
        assert_abs_diff_eq!(curve.response_at(750.0), 0.0, epsilon = 0.5);
    }

    #[test]
    fn display_chain_follows_parameter_changes_on_the_next_tick() {
        let (store, _processor, mut curve) = setup();
        store.set(ParamId::PeakFreq, 1000.0);
        store.set(ParamId::PeakGain, 12.0);
        assert_abs_diff_eq!(curve.response_at(1000.0), 0.0, epsilon = 0.5);

        assert!(curve.timer_callback());
        assert_abs_diff_eq!(curve.response_at(1000.0), 12.0, epsilon = 0.2);
        assert!(curve.magnitudes_db().iter().any(|&db| db > 11.0));
    }

    #[test]
    fn display_chain_is_rebuilt_once_per_burst_of_changes() {
        let (store, mut processor, mut curve) = setup();
        store.set(ParamId::PeakFreq, 1000.0);
        store.set(ParamId::PeakGain, 12.0);
        store.set(ParamId::PeakQuality, 2.0);
        assert!(curve.parameters_changed.load(Ordering::Acquire));

        curve.timer_callback();
        assert!(!curve.parameters_changed.load(Ordering::Acquire));
        assert_abs_diff_eq!(curve.response_at(1000.0), 12.0, epsilon = 0.2);

        // No change since the last tick, so a hand edit survives the next one.
        curve.chain.set_bypassed(ChainPosition::Peak, true);
        curve.timer_callback();
        assert!(curve.display_chain().is_bypassed(ChainPosition::Peak));
        assert_abs_diff_eq!(curve.response_at(1000.0), 0.0, epsilon = 0.5);

        // A new sample rate on its own still rebuilds the chain.
        processor.prepare(48000.0, 512);
        assert!(!curve.parameters_changed.load(Ordering::Acquire));
        curve.timer_callback();
        assert_eq!(curve.display_chain().sample_rate(), 48000.0);
        assert!(!curve.display_chain().is_bypassed(ChainPosition::Peak));
        assert_abs_diff_eq!(curve.response_at(1000.0), 12.0, epsilon = 0.2);
    }

    #[test]
    fn bypassed_band_is_ignored_by_the_curve() {
        let (store, _processor, mut curve) = setup();
        store.set(ParamId::PeakGain, 24.0);
        store.set(ParamId::PeakBypassed, 1.0);
        curve.timer_callback();
        assert_abs_diff_eq!(curve.response_at(750.0), 0.0, epsilon = 0.5);
    }

    #[test]
    fn analyzer_produces_paths_from_processed_audio() {
        let (_store, mut processor, mut curve) = setup();
        let mut left: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut right = left.clone();
        processor.process(&mut left, &mut right);

        curve.timer_callback();
        assert!(!curve.left_path().is_empty());
        assert!(!curve.right_path().is_empty());
    }

    #[test]
    fn disabled_analyzer_drains_without_drawing() {
        let (store, mut processor, mut curve) = setup();
        store.set(ParamId::AnalyzerEnabled, 0.0);
        let mut left = vec![0.3; 512];
        let mut right = vec![0.3; 512];
        processor.process(&mut left, &mut right);

        curve.timer_callback();
        assert!(curve.left_path().is_empty());
        assert!(curve.right_path().is_empty());
    }

    #[test]
    fn grid_lines_span_the_bounds() {
        let (_store, _processor, mut curve) = setup();
        curve.set_bounds(Rect::new(0.0, 0.0, 500.0, 240.0));

        let freqs = curve.frequency_grid_lines();
        assert_eq!(freqs.len(), 10);
        assert_abs_diff_eq!(freqs[0].1, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(freqs[9].1, 500.0, epsilon = 1e-2);

        let gains = curve.gain_grid_lines();
        assert_eq!(gains.len(), 5);
        assert_abs_diff_eq!(gains[0].1, 240.0, epsilon = 1e-4);
        assert_abs_diff_eq!(gains[2].1, 120.0, epsilon = 1e-4);
        assert_abs_diff_eq!(gains[4].1, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn response_path_has_one_point_per_frequency() {
        let (_store, _processor, curve) = setup();
        let path = curve.response_curve_path();
        assert_eq!(path.len(), curve.frequencies().len());
        let mid = path.points()[path.len() / 2];
        assert_abs_diff_eq!(mid.y, 150.0, epsilon = 1.0);
    }

    #[test]
    fn dropping_the_curve_unregisters_its_listener() {
        let (store, _processor, curve) = setup();
        let flag = Arc::clone(&curve.parameters_changed);
        drop(curve);
        store.set(ParamId::PeakGain, 3.0);
        assert!(!flag.load(Ordering::Acquire));
    }
}

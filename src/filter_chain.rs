//! Per-channel filter chain: LowCut (4 sections) -> Peak -> HighCut (4 sections).
//!
//! Everything here runs on the audio thread once prepared, so no method after
//! [`MonoChain::prepare`] allocates, locks or logs.

use crate::coefficients::{
    make_high_cut_filter, make_low_cut_filter, make_peak_filter, Coefficients, FilterKind,
    MAX_CUT_STAGES,
};
use crate::params::{ChainSettings, Slope};
use crate::utils::sanitize_sample_rate;

/// One second-order section in transposed direct form II.
#[derive(Debug, Clone)]
pub struct FilterStage {
    coefficients: Coefficients,
    bypassed: bool,
    z1: f64,
    z2: f64,
}

impl FilterStage {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            coefficients: Coefficients::passthrough(kind),
            bypassed: false,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    /// Replaces the whole coefficient set. Filter state is kept so the swap is click-free.
    #[inline]
    pub fn update_coefficients(&mut self, replacement: Coefficients) {
        self.coefficients = replacement;
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    #[inline]
    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    #[inline(always)]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let c = &self.coefficients;
        let input = input as f64;
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output as f32
    }

    /// Filters `block` in place unless bypassed.
    pub fn process(&mut self, block: &mut [f32]) {
        if self.bypassed {
            return;
        }
        for sample in block.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn magnitude_for_frequency(&self, frequency: f64, sample_rate: f64) -> f64 {
        self.coefficients.magnitude_for_frequency(frequency, sample_rate)
    }
}

/// Four cascaded sections; together up to a 48 dB/oct Butterworth cut.
#[derive(Debug, Clone)]
pub struct CutFilter {
    stages: [FilterStage; MAX_CUT_STAGES],
    bypassed: bool,
}

impl CutFilter {
    pub fn new() -> Self {
        Self {
            stages: [
                FilterStage::new(FilterKind::Cut),
                FilterStage::new(FilterKind::Cut),
                FilterStage::new(FilterKind::Cut),
                FilterStage::new(FilterKind::Cut),
            ],
            bypassed: false,
        }
    }

    pub fn stage(&self, index: usize) -> &FilterStage {
        &self.stages[index]
    }

    pub fn stage_mut(&mut self, index: usize) -> &mut FilterStage {
        &mut self.stages[index]
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    /// Number of sections currently processing audio.
    pub fn active_stages(&self) -> usize {
        self.stages.iter().filter(|stage| !stage.is_bypassed()).count()
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    #[inline]
    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    pub fn process(&mut self, block: &mut [f32]) {
        if self.bypassed {
            return;
        }
        for stage in &mut self.stages {
            stage.process(block);
        }
    }

    /// Product of the magnitudes of all sections that are processing audio.
    pub fn magnitude_for_frequency(&self, frequency: f64, sample_rate: f64) -> f64 {
        if self.bypassed {
            return 1.0;
        }
        self.stages
            .iter()
            .filter(|stage| !stage.is_bypassed())
            .map(|stage| stage.magnitude_for_frequency(frequency, sample_rate))
            .product()
    }
}

impl Default for CutFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a new slope to a cut filter.
///
/// All four sections are bypassed first, then sections `0..=slope` get their
/// coefficients and are switched back on. A 36 dB/oct slope therefore runs
/// sections 0, 1 and 2, never section 2 alone.
pub fn update_cut_filter(
    cut: &mut CutFilter,
    coefficients: &[Coefficients; MAX_CUT_STAGES],
    slope: Slope,
) {
    for stage in cut.stages.iter_mut() {
        stage.set_bypassed(true);
    }
    for (stage, replacement) in cut
        .stages
        .iter_mut()
        .zip(coefficients.iter())
        .take(slope.stages())
    {
        stage.update_coefficients(*replacement);
        stage.set_bypassed(false);
    }
}

/// Position of a band inside a [`MonoChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    LowCut,
    Peak,
    HighCut,
}

/// The complete filter path for one audio channel.
#[derive(Debug, Clone)]
pub struct MonoChain {
    low_cut: CutFilter,
    peak: FilterStage,
    high_cut: CutFilter,
    sample_rate: f64,
    max_block_size: usize,
    prepared: bool,
}

impl MonoChain {
    pub fn new() -> Self {
        Self {
            low_cut: CutFilter::new(),
            peak: FilterStage::new(FilterKind::Peak),
            high_cut: CutFilter::new(),
            sample_rate: 0.0,
            max_block_size: 0,
            prepared: false,
        }
    }

    /// Clears all filter state for a (new) sample rate. Must run before [`process`](Self::process).
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        self.sample_rate = sanitize_sample_rate(sample_rate);
        self.max_block_size = max_block_size;
        self.reset();
        self.prepared = true;
    }

    pub fn reset(&mut self) {
        self.low_cut.reset();
        self.peak.reset();
        self.high_cut.reset();
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Runs LowCut, Peak then HighCut over `block` in place.
    ///
    /// An unprepared chain leaves the block untouched.
    pub fn process(&mut self, block: &mut [f32]) {
        debug_assert!(self.prepared, "MonoChain::process called before prepare");
        if !self.prepared {
            return;
        }
        self.low_cut.process(block);
        self.peak.process(block);
        self.high_cut.process(block);
    }

    pub fn low_cut(&self) -> &CutFilter {
        &self.low_cut
    }

    pub fn low_cut_mut(&mut self) -> &mut CutFilter {
        &mut self.low_cut
    }

    pub fn peak(&self) -> &FilterStage {
        &self.peak
    }

    pub fn peak_mut(&mut self) -> &mut FilterStage {
        &mut self.peak
    }

    pub fn high_cut(&self) -> &CutFilter {
        &self.high_cut
    }

    pub fn high_cut_mut(&mut self) -> &mut CutFilter {
        &mut self.high_cut
    }

    pub fn is_bypassed(&self, position: ChainPosition) -> bool {
        match position {
            ChainPosition::LowCut => self.low_cut.is_bypassed(),
            ChainPosition::Peak => self.peak.is_bypassed(),
            ChainPosition::HighCut => self.high_cut.is_bypassed(),
        }
    }

    pub fn set_bypassed(&mut self, position: ChainPosition, bypassed: bool) {
        match position {
            ChainPosition::LowCut => self.low_cut.set_bypassed(bypassed),
            ChainPosition::Peak => self.peak.set_bypassed(bypassed),
            ChainPosition::HighCut => self.high_cut.set_bypassed(bypassed),
        }
    }

    pub fn update_peak_filter(&mut self, settings: &ChainSettings) {
        let coefficients = make_peak_filter(settings, self.sample_rate);
        self.peak.update_coefficients(coefficients);
        self.peak.set_bypassed(settings.peak_bypassed);
    }

    pub fn update_low_cut_filters(&mut self, settings: &ChainSettings) {
        let coefficients = make_low_cut_filter(settings, self.sample_rate);
        update_cut_filter(&mut self.low_cut, &coefficients, settings.low_cut_slope);
        self.low_cut.set_bypassed(settings.low_cut_bypassed);
    }

    pub fn update_high_cut_filters(&mut self, settings: &ChainSettings) {
        let coefficients = make_high_cut_filter(settings, self.sample_rate);
        update_cut_filter(&mut self.high_cut, &coefficients, settings.high_cut_slope);
        self.high_cut.set_bypassed(settings.high_cut_bypassed);
    }

    /// Redesigns every band from `settings`. Coefficients and bypass flags of a band
    /// change in the same call, so the chain is never seen half updated.
    pub fn apply_settings(&mut self, settings: &ChainSettings) {
        self.update_low_cut_filters(settings);
        self.update_peak_filter(settings);
        self.update_high_cut_filters(settings);
    }

    /// Combined linear magnitude of every active section at `frequency`.
    pub fn magnitude_for_frequency(&self, frequency: f64) -> f64 {
        let mut magnitude = 1.0;
        if !self.peak.is_bypassed() {
            magnitude *= self.peak.magnitude_for_frequency(frequency, self.sample_rate);
        }
        magnitude *= self.low_cut.magnitude_for_frequency(frequency, self.sample_rate);
        magnitude *= self.high_cut.magnitude_for_frequency(frequency, self.sample_rate);
        magnitude
    }
}

impl Default for MonoChain {
    fn default() -> Self {
        Self::new()
    }
}

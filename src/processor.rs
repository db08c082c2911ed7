//! Real-time entry point: one call per host audio block.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{info, warn};
use portable_atomic::AtomicF64;

use crate::filter_chain::MonoChain;
use crate::params::{ChainSettings, ParameterStore};
use crate::sampler::{single_channel_sampler, ChannelSampler, SampledBlocks};
use crate::utils::{sanitize_sample_rate, DEFAULT_SAMPLE_RATE};

/// Everything the analyzer side needs from a running processor.
pub struct AnalyzerTaps {
    pub left: SampledBlocks,
    pub right: SampledBlocks,
    /// Rate of the audio currently being sampled, updated on every prepare.
    pub sample_rate: Arc<AtomicF64>,
}

/// Stereo equalizer: two identical filter chains plus the analyzer samplers.
pub struct EqProcessor {
    store: Arc<ParameterStore>,
    left_chain: MonoChain,
    right_chain: MonoChain,
    left_sampler: ChannelSampler,
    right_sampler: ChannelSampler,
    sample_rate: Arc<AtomicF64>,
    max_block_size: usize,
}

impl EqProcessor {
    /// Creates the processor and the taps to hand to the analyzer thread.
    pub fn new(store: Arc<ParameterStore>) -> (Self, AnalyzerTaps) {
        let (left_sampler, left_blocks) = single_channel_sampler();
        let (right_sampler, right_blocks) = single_channel_sampler();
        let sample_rate = Arc::new(AtomicF64::new(DEFAULT_SAMPLE_RATE));

        let processor = Self {
            store,
            left_chain: MonoChain::new(),
            right_chain: MonoChain::new(),
            left_sampler,
            right_sampler,
            sample_rate: Arc::clone(&sample_rate),
            max_block_size: 0,
        };
        let taps = AnalyzerTaps {
            left: left_blocks,
            right: right_blocks,
            sample_rate,
        };
        (processor, taps)
    }

    /// Resets the filters for `sample_rate` and sizes the samplers for blocks of
    /// up to `max_block_size` samples. Allocates; never call from the audio callback.
    pub fn prepare(&mut self, sample_rate: f64, max_block_size: usize) {
        let sample_rate = sanitize_sample_rate(sample_rate);
        let max_block_size = max_block_size.max(1);
        info!(
            "Preparing equalizer: {} Hz, up to {} samples per block",
            sample_rate, max_block_size
        );

        self.left_chain.prepare(sample_rate, max_block_size);
        self.right_chain.prepare(sample_rate, max_block_size);
        self.update_filters();

        self.left_sampler.prepare(max_block_size);
        self.right_sampler.prepare(max_block_size);
        self.max_block_size = max_block_size;
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    /// Re-reads the parameters and redesigns both chains.
    pub fn update_filters(&mut self) {
        let settings = ChainSettings::from_store(&self.store);
        self.left_chain.apply_settings(&settings);
        self.right_chain.apply_settings(&settings);
    }

    /// Filters one stereo block in place and feeds the analyzer.
    ///
    /// Blocks of any length are accepted. The analyzer block size stays what
    /// `prepare` set; longer host blocks are split across several analyzer blocks.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.update_filters();

        self.left_chain.process(left);
        self.right_chain.process(right);

        self.left_sampler.update(left);
        self.right_sampler.update(right);
    }

    /// Clears filter memory at stream teardown. Buffers stay allocated for the next prepare.
    pub fn release_resources(&mut self) {
        if !self.left_chain.is_prepared() {
            warn!("release_resources called on an equalizer that was never prepared");
        }
        self.left_chain.reset();
        self.right_chain.reset();
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn store(&self) -> &Arc<ParameterStore> {
        &self.store
    }

    pub fn left_chain(&self) -> &MonoChain {
        &self.left_chain
    }

    pub fn right_chain(&self) -> &MonoChain {
        &self.right_chain
    }
}

//! End-to-end behaviour of the equalizer and its analyzer.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use parametric_eq::coefficients::{make_low_cut_filter, make_peak_filter};
use parametric_eq::fifo::{fifo, FIFO_CAPACITY};
use parametric_eq::filter_chain::{update_cut_filter, CutFilter, MonoChain};
use parametric_eq::params::{ChainSettings, ParamId, ParameterStore, Slope};
use parametric_eq::processor::EqProcessor;
use parametric_eq::response_curve::ResponseCurve;
use parametric_eq::sampler::single_channel_sampler;
use parametric_eq::spectrum::{FftDataGenerator, FftOrder, NEGATIVE_INFINITY_DB};
use parametric_eq::utils::gain_to_decibels;
use parametric_eq::EqConfig;

fn response_db(chain: &MonoChain, frequency: f64) -> f64 {
    gain_to_decibels(chain.magnitude_for_frequency(frequency), -200.0)
}

#[test]
fn default_settings_are_neutral_at_750_hz() {
    let settings = ChainSettings {
        low_cut_freq: 20.0,
        low_cut_slope: Slope::Db12,
        peak_freq: 750.0,
        peak_gain_in_decibels: 0.0,
        peak_quality: 1.0,
        high_cut_freq: 20000.0,
        high_cut_slope: Slope::Db12,
        ..ChainSettings::default()
    };
    let mut chain = MonoChain::new();
    chain.prepare(44100.0, 512);
    chain.apply_settings(&settings);

    assert_abs_diff_eq!(response_db(&chain, 750.0), 0.0, epsilon = 0.5);
}

#[test]
fn full_boost_peak_with_cuts_bypassed() {
    let settings = ChainSettings {
        peak_freq: 1000.0,
        peak_gain_in_decibels: 24.0,
        peak_quality: 1.0,
        low_cut_bypassed: true,
        high_cut_bypassed: true,
        ..ChainSettings::default()
    };
    let mut chain = MonoChain::new();
    chain.prepare(44100.0, 512);
    chain.apply_settings(&settings);

    assert_abs_diff_eq!(response_db(&chain, 1000.0), 24.0, epsilon = 0.1);
    assert!(response_db(&chain, 20.0) < 20.0);
    assert!(response_db(&chain, 20000.0) < 20.0);

    let coefficients = make_peak_filter(&settings, 44100.0);
    assert_abs_diff_eq!(
        gain_to_decibels(coefficients.magnitude_for_frequency(1000.0, 44100.0), -200.0),
        24.0,
        epsilon = 0.1
    );
}

#[test]
fn every_slope_enables_a_prefix_of_stages() {
    let slopes = [Slope::Db12, Slope::Db24, Slope::Db36, Slope::Db48];
    for (index, slope) in slopes.into_iter().enumerate() {
        let settings = ChainSettings {
            low_cut_slope: slope,
            low_cut_freq: 120.0,
            ..ChainSettings::default()
        };
        let mut cut = CutFilter::new();
        update_cut_filter(&mut cut, &make_low_cut_filter(&settings, 48000.0), slope);

        let active: Vec<bool> = cut.stages().iter().map(|s| !s.is_bypassed()).collect();
        let expected: Vec<bool> = (0..4).map(|i| i <= index).collect();
        assert_eq!(active, expected, "slope {:?}", slope);
    }
}

#[test]
fn thirty_one_pushes_into_a_thirty_slot_fifo() {
    assert_eq!(FIFO_CAPACITY, 30);
    let (mut producer, mut consumer) = fifo([0.0_f32; 4]);
    for i in 0..30 {
        assert!(producer.push(&[i as f32; 4]));
    }
    assert!(!producer.push(&[99.0; 4]));

    let mut out = [0.0_f32; 4];
    for i in 0..30 {
        assert!(consumer.pull(&mut out));
        assert_eq!(out, [i as f32; 4]);
    }
    assert!(!consumer.pull(&mut out));
}

#[test]
fn sampler_produces_k_contiguous_blocks() {
    let block_size = 100;
    let (mut sampler, mut blocks) = single_channel_sampler();
    sampler.prepare(block_size);

    let samples: Vec<f32> = (0..block_size * 3).map(|i| i as f32).collect();
    for &sample in &samples {
        sampler.update(&[sample]);
    }
    assert_eq!(blocks.num_complete_blocks_available(), 3);

    let mut block = Vec::new();
    for expected in samples.chunks(block_size) {
        assert!(blocks.pull(&mut block));
        assert_eq!(block.as_slice(), expected);
    }
}

#[test]
fn silence_converges_to_the_floor() {
    let mut generator = FftDataGenerator::new(FftOrder::Order4096);
    let silence = vec![0.0_f32; 4096];
    let mut frame = Vec::new();
    for _ in 0..5 {
        generator.produce_fft_data_for_rendering(&silence, NEGATIVE_INFINITY_DB);
        assert!(generator.get_fft_data(&mut frame));
        assert!(frame.iter().all(|&db| db <= NEGATIVE_INFINITY_DB));
    }
}

#[test]
fn processor_and_analyzer_share_parameters() {
    let store = Arc::new(ParameterStore::new());
    let (mut processor, taps) = EqProcessor::new(Arc::clone(&store));
    processor.prepare(48000.0, 480);
    let mut curve = ResponseCurve::new(Arc::clone(&store), taps, &EqConfig::default());

    store.apply_assignment("Peak Freq=2000").unwrap();
    store.apply_assignment("Peak Gain=-12").unwrap();
    store.apply_assignment("LowCut Slope=48 dB/Oct").unwrap();

    let mut left: Vec<f32> = (0..480).map(|i| (i as f32 * 0.3).sin()).collect();
    let mut right = left.clone();
    processor.process(&mut left, &mut right);
    curve.timer_callback();

    assert_eq!(processor.left_chain().low_cut().active_stages(), 4);
    assert_eq!(curve.display_chain().low_cut().active_stages(), 4);
    assert_abs_diff_eq!(curve.response_at(2000.0), -12.0, epsilon = 0.2);
    assert_abs_diff_eq!(
        response_db(processor.left_chain(), 2000.0),
        curve.response_at(2000.0),
        epsilon = 1e-9
    );
    assert!(!curve.left_path().is_empty());
    assert_eq!(store.get(ParamId::PeakFreq), 2000.0);
}

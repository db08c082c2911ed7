//! Spectrum analyzer pipeline: sampled blocks -> FFT frames -> drawable paths.
//!
//! Everything here runs on the analyzer (UI) thread. Frames and paths are
//! passed between the stages through fifos so that several frames produced
//! between two refreshes collapse into the latest path.

use std::f32::consts::PI;
use std::sync::Arc;

use log::{debug, warn};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::fifo::{fifo, FifoConsumer, FifoProducer};
use crate::sampler::SampledBlocks;
use crate::utils::{gain_to_decibels, jmap, map_from_log10, MAX_FREQ, MIN_FREQ};

/// Default floor for analyzer magnitudes in dB.
pub const NEGATIVE_INFINITY_DB: f32 = -48.0;

/// Draw one line segment every this many bins.
pub const DEFAULT_PATH_RESOLUTION: usize = 2;

/// Transform size, stored as log2 of the number of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FftOrder {
    #[default]
    Order2048 = 11,
    Order4096 = 12,
    Order8192 = 13,
}

impl FftOrder {
    pub fn fft_size(self) -> usize {
        1 << (self as u32)
    }

    pub fn from_fft_size(size: usize) -> Option<Self> {
        match size {
            2048 => Some(FftOrder::Order2048),
            4096 => Some(FftOrder::Order4096),
            8192 => Some(FftOrder::Order8192),
            _ => None,
        }
    }
}

/// Blackman-Harris window scaled so its samples sum to `len`.
pub fn blackman_harris_window(len: usize) -> Vec<f32> {
    if len < 2 {
        return vec![1.0; len];
    }
    let a0 = 0.35875;
    let a1 = 0.48829;
    let a2 = 0.14128;
    let a3 = 0.01168;

    let mut window: Vec<f32> = (0..len)
        .map(|i| {
            let x = 2.0 * PI * i as f32 / (len - 1) as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos() - a3 * (3.0 * x).cos()
        })
        .collect();

    let sum: f32 = window.iter().sum();
    if sum > 0.0 {
        let factor = len as f32 / sum;
        window.iter_mut().for_each(|w| *w *= factor);
    }
    window
}

/// Turns a window of audio into a frame of per-bin decibel magnitudes.
pub struct FftDataGenerator {
    order: FftOrder,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    frame: Vec<f32>,
    frames_in: FifoProducer<Vec<f32>>,
    frames_out: FifoConsumer<Vec<f32>>,
}

impl FftDataGenerator {
    pub fn new(order: FftOrder) -> Self {
        let (fft, window, input, spectrum, scratch, frame) = Self::build(order);
        let (frames_in, frames_out) = fifo(frame.clone());
        Self {
            order,
            fft,
            window,
            input,
            spectrum,
            scratch,
            frame,
            frames_in,
            frames_out,
        }
    }

    #[allow(clippy::type_complexity)]
    fn build(
        order: FftOrder,
    ) -> (
        Arc<dyn RealToComplex<f32>>,
        Vec<f32>,
        Vec<f32>,
        Vec<Complex<f32>>,
        Vec<Complex<f32>>,
        Vec<f32>,
    ) {
        let size = order.fft_size();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        (fft, blackman_harris_window(size), input, spectrum, scratch, vec![0.0; size / 2])
    }

    /// Rebuilds the window, the plan and the frame queue. Pending frames are lost.
    pub fn change_order(&mut self, order: FftOrder) {
        debug!(target: "spectrum", "FFT order {:?} -> {:?}", self.order, order);
        *self = Self::new(order);
    }

    pub fn order(&self) -> FftOrder {
        self.order
    }

    pub fn fft_size(&self) -> usize {
        self.order.fft_size()
    }

    pub fn num_bins(&self) -> usize {
        self.fft_size() / 2
    }

    /// Windows the first `fft_size` samples of `audio`, transforms them and
    /// queues one frame of `fft_size / 2` decibel values floored at
    /// `negative_infinity`. Missing samples count as silence.
    pub fn produce_fft_data_for_rendering(&mut self, audio: &[f32], negative_infinity: f32) {
        let size = self.fft_size();
        let available = audio.len().min(size);

        self.input.fill(0.0);
        self.input[..available].copy_from_slice(&audio[..available]);
        for (sample, w) in self.input.iter_mut().zip(self.window.iter()) {
            *sample *= w;
        }

        if let Err(e) = self
            .fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
        {
            warn!(target: "spectrum", "FFT computation error: {:?}", e);
            return;
        }

        let num_bins = self.num_bins() as f32;
        for (value, bin) in self.frame.iter_mut().zip(self.spectrum.iter()) {
            *value = gain_to_decibels(bin.norm() / num_bins, negative_infinity);
        }

        self.frames_in.push(&self.frame);
    }

    pub fn num_available_fft_data_blocks(&self) -> usize {
        self.frames_out.num_available()
    }

    pub fn get_fft_data(&mut self, frame: &mut Vec<f32>) -> bool {
        self.frames_out.pull(frame)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Axis-aligned drawing area, y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// A polyline ready to be stroked by whatever draws the analyzer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalyzerPath {
    points: Vec<Point>,
}

impl AnalyzerPath {
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn line_to(&mut self, x: f32, y: f32) {
        self.points.push(Point { x, y });
    }
}

/// Maps FFT frames onto drawing coordinates.
pub struct AnalyzerPathGenerator {
    resolution: usize,
    scratch: AnalyzerPath,
    paths_in: FifoProducer<AnalyzerPath>,
    paths_out: FifoConsumer<AnalyzerPath>,
}

impl AnalyzerPathGenerator {
    pub fn new(resolution: usize) -> Self {
        let (paths_in, paths_out) = fifo(AnalyzerPath::default());
        Self {
            resolution: resolution.max(1),
            scratch: AnalyzerPath::default(),
            paths_in,
            paths_out,
        }
    }

    /// Builds a path from `render_data` and queues it.
    ///
    /// Bin 0 starts the path at the left edge; afterwards every `resolution`-th
    /// bin is placed at `floor(log10 position * width)` between 20 Hz and 20 kHz.
    /// Levels map from `negative_infinity..0 dB` to `bottom..top`. Points that
    /// would not be finite are left out.
    pub fn generate_path(
        &mut self,
        render_data: &[f32],
        bounds: Rect,
        fft_size: usize,
        bin_width: f32,
        negative_infinity: f32,
    ) {
        let top = bounds.y;
        let bottom = bounds.bottom();
        let map = |v: f32| jmap(v, negative_infinity, 0.0, bottom, top);

        let num_bins = (fft_size / 2).min(render_data.len());
        self.scratch.clear();

        if let Some(&first) = render_data.first() {
            let y = map(first);
            if y.is_finite() {
                self.scratch.line_to(bounds.x, y);
            }
        }

        for bin in (1..num_bins).step_by(self.resolution) {
            let y = map(render_data[bin]);
            let bin_freq = bin as f32 * bin_width;
            let normalized_x = map_from_log10(bin_freq, MIN_FREQ as f32, MAX_FREQ as f32);
            let x = bounds.x + (normalized_x * bounds.width).floor();
            if x.is_finite() && y.is_finite() {
                self.scratch.line_to(x, y);
            }
        }

        self.paths_in.push(&self.scratch);
    }

    pub fn num_paths_available(&self) -> usize {
        self.paths_out.num_available()
    }

    pub fn get_path(&mut self, path: &mut AnalyzerPath) -> bool {
        self.paths_out.pull(path)
    }
}

/// Owns one channel's analysis chain and remembers the most recent path.
pub struct PathProducer {
    blocks: SampledBlocks,
    generator: FftDataGenerator,
    path_generator: AnalyzerPathGenerator,
    mono_buffer: Vec<f32>,
    incoming: Vec<f32>,
    frame: Vec<f32>,
    path: AnalyzerPath,
    negative_infinity: f32,
}

impl PathProducer {
    pub fn new(
        blocks: SampledBlocks,
        order: FftOrder,
        negative_infinity: f32,
        path_resolution: usize,
    ) -> Self {
        Self {
            blocks,
            generator: FftDataGenerator::new(order),
            path_generator: AnalyzerPathGenerator::new(path_resolution),
            mono_buffer: vec![0.0; order.fft_size()],
            incoming: Vec::new(),
            frame: Vec::new(),
            path: AnalyzerPath::default(),
            negative_infinity,
        }
    }

    /// Drains every queued block into the rolling buffer (one FFT per block),
    /// turns every frame into a path and keeps only the newest path.
    pub fn process(&mut self, bounds: Rect, sample_rate: f64) {
        while self.blocks.num_complete_blocks_available() > 0 {
            if !self.blocks.pull(&mut self.incoming) {
                break;
            }
            self.shift_in_incoming();
            self.generator
                .produce_fft_data_for_rendering(&self.mono_buffer, self.negative_infinity);
        }

        let fft_size = self.generator.fft_size();
        let bin_width = (sample_rate / fft_size as f64) as f32;

        while self.generator.num_available_fft_data_blocks() > 0 {
            if self.generator.get_fft_data(&mut self.frame) {
                self.path_generator.generate_path(
                    &self.frame,
                    bounds,
                    fft_size,
                    bin_width,
                    self.negative_infinity,
                );
            }
        }

        while self.path_generator.num_paths_available() > 0 {
            if !self.path_generator.get_path(&mut self.path) {
                break;
            }
        }
    }

    /// Shifts the rolling buffer left by the incoming block and appends it.
    fn shift_in_incoming(&mut self) {
        let len = self.mono_buffer.len();
        let size = self.incoming.len();
        if size >= len {
            self.mono_buffer.copy_from_slice(&self.incoming[size - len..]);
        } else {
            self.mono_buffer.copy_within(size.., 0);
            self.mono_buffer[len - size..].copy_from_slice(&self.incoming);
        }
    }

    /// Drops queued audio without analysing it and forgets the current path.
    pub fn discard_pending(&mut self) -> usize {
        self.path.clear();
        self.blocks.discard_all()
    }

    pub fn change_order(&mut self, order: FftOrder) {
        if order == self.generator.order() {
            return;
        }
        self.generator.change_order(order);
        self.mono_buffer = vec![0.0; order.fft_size()];
        self.path.clear();
    }

    pub fn fft_order(&self) -> FftOrder {
        self.generator.order()
    }

    pub fn path(&self) -> &AnalyzerPath {
        &self.path
    }

    pub fn mono_buffer(&self) -> &[f32] {
        &self.mono_buffer
    }

    pub fn dropped_blocks(&self) -> usize {
        self.blocks.dropped_blocks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::single_channel_sampler;
    use approx::assert_abs_diff_eq;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn window_is_normalised_to_its_length() {
        let window = blackman_harris_window(2048);
        let sum: f32 = window.iter().sum();
        assert_abs_diff_eq!(sum, 2048.0, epsilon = 0.1);
        assert!(window[0] < 1e-3);
    }

    #[test]
    fn fft_order_sizes() {
        assert_eq!(FftOrder::default().fft_size(), 2048);
        assert_eq!(FftOrder::Order4096.fft_size(), 4096);
        assert_eq!(FftOrder::Order8192.fft_size(), 8192);
        assert_eq!(FftOrder::from_fft_size(4096), Some(FftOrder::Order4096));
        assert_eq!(FftOrder::from_fft_size(1000), None);
    }

    #[test]
    fn silence_sits_on_the_floor() {
        let mut generator = FftDataGenerator::new(FftOrder::Order2048);
        let silence = vec![0.0_f32; 2048];
        for _ in 0..4 {
            generator.produce_fft_data_for_rendering(&silence, NEGATIVE_INFINITY_DB);
        }
        assert_eq!(generator.num_available_fft_data_blocks(), 4);

        let mut frame = Vec::new();
        while generator.get_fft_data(&mut frame) {
            assert_eq!(frame.len(), 1024);
            assert!(frame.iter().all(|&db| db <= NEGATIVE_INFINITY_DB));
        }
    }

    #[test]
    fn full_scale_sine_peaks_near_zero_db_in_its_bin() {
        let sample_rate = 48000.0;
        let size = 2048;
        let bin = 64;
        let freq = bin as f32 * sample_rate / size as f32;

        let mut generator = FftDataGenerator::new(FftOrder::Order2048);
        generator.produce_fft_data_for_rendering(&sine(freq, sample_rate, size), -120.0);
        let mut frame = Vec::new();
        assert!(generator.get_fft_data(&mut frame));

        let (peak_bin, peak_db) = frame
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &db)| if db > best.1 { (i, db) } else { best });
        assert_eq!(peak_bin, bin);
        assert_abs_diff_eq!(peak_db, 0.0, epsilon = 1.0);
    }

    #[test]
    fn path_covers_every_other_bin_inside_bounds() {
        let mut paths = AnalyzerPathGenerator::new(DEFAULT_PATH_RESOLUTION);
        let frame = vec![-24.0_f32; 1024];
        let bounds = Rect::new(10.0, 5.0, 600.0, 200.0);
        paths.generate_path(&frame, bounds, 2048, 44100.0 / 2048.0, NEGATIVE_INFINITY_DB);

        let mut path = AnalyzerPath::default();
        assert!(paths.get_path(&mut path));
        assert_eq!(path.len(), 1 + 512);
        for point in path.points() {
            assert_abs_diff_eq!(point.y, 105.0, epsilon = 1e-4);
        }
        assert_eq!(path.points()[0].x, bounds.x);
        assert!(path.points()[1].x >= bounds.x);
    }

    #[test]
    fn non_finite_points_are_skipped() {
        let mut paths = AnalyzerPathGenerator::new(1);
        let mut frame = vec![-12.0_f32; 8];
        frame[3] = f32::NAN;
        frame[5] = f32::INFINITY;
        paths.generate_path(&frame, Rect::new(0.0, 0.0, 100.0, 100.0), 16, 3000.0, -48.0);

        let mut path = AnalyzerPath::default();
        assert!(paths.get_path(&mut path));
        assert_eq!(path.len(), 8 - 2);
        assert!(path.points().iter().all(|p| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn producer_slides_blocks_into_the_mono_buffer() {
        let (mut sampler, blocks) = single_channel_sampler();
        sampler.prepare(512);
        let mut producer = PathProducer::new(blocks, FftOrder::Order2048, NEGATIVE_INFINITY_DB, 2);

        let samples: Vec<f32> = (0..1024).map(|i| i as f32).collect();
        sampler.update(&samples);
        producer.process(Rect::new(0.0, 0.0, 600.0, 300.0), 44100.0);

        let buffer = producer.mono_buffer();
        assert!(buffer[..1024].iter().all(|&s| s == 0.0));
        assert_eq!(&buffer[1024..], samples.as_slice());
        assert!(!producer.path().is_empty());
    }

    #[test]
    fn oversized_block_replaces_the_mono_buffer() {
        let (mut sampler, blocks) = single_channel_sampler();
        sampler.prepare(3000);
        let mut producer = PathProducer::new(blocks, FftOrder::Order2048, NEGATIVE_INFINITY_DB, 2);

        let samples: Vec<f32> = (0..3000).map(|i| i as f32).collect();
        sampler.update(&samples);
        producer.process(Rect::new(0.0, 0.0, 600.0, 300.0), 44100.0);
        assert_eq!(producer.mono_buffer(), &samples[3000 - 2048..]);
    }

    #[test]
    fn changing_order_resizes_everything() {
        let (mut sampler, blocks) = single_channel_sampler();
        sampler.prepare(256);
        let mut producer = PathProducer::new(blocks, FftOrder::Order2048, NEGATIVE_INFINITY_DB, 2);
        producer.change_order(FftOrder::Order8192);
        assert_eq!(producer.mono_buffer().len(), 8192);
        assert_eq!(producer.fft_order(), FftOrder::Order8192);

        sampler.update(&sine(1000.0, 44100.0, 256));
        producer.process(Rect::new(0.0, 0.0, 600.0, 300.0), 44100.0);
        assert_eq!(producer.path().len(), 1 + 2048);
    }

    #[test]
    fn discarding_drops_backlog_and_path() {
        let (mut sampler, blocks) = single_channel_sampler();
        sampler.prepare(128);
        let mut producer = PathProducer::new(blocks, FftOrder::Order2048, NEGATIVE_INFINITY_DB, 2);
        sampler.update(&vec![0.1; 128 * 3]);
        producer.process(Rect::new(0.0, 0.0, 100.0, 100.0), 44100.0);
        assert!(!producer.path().is_empty());

        sampler.update(&vec![0.1; 128 * 2]);
        assert_eq!(producer.discard_pending(), 2);
        assert!(producer.path().is_empty());
    }
}

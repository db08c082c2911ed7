//! Three-band parametric equalizer (low cut, peak, high cut) with a real-time
//! processing path and a spectrum/response-curve analyzer that runs on a
//! separate, non-real-time thread.

pub mod coefficients;
pub mod config;
pub mod fifo;
pub mod filter_chain;
pub mod make_waves;
pub mod params;
pub mod processor;
pub mod response_curve;
pub mod sampler;
pub mod spectrum;
pub mod utils;

pub use coefficients::{
    make_high_cut_filter, make_low_cut_filter, make_peak_filter, Coefficients, FilterKind,
};
pub use config::EqConfig;
pub use fifo::{fifo, FifoConsumer, FifoProducer, FIFO_CAPACITY};
pub use filter_chain::{update_cut_filter, ChainPosition, CutFilter, FilterStage, MonoChain};
pub use params::{ChainSettings, ParamError, ParamId, ParameterStore, Slope};
pub use processor::{AnalyzerTaps, EqProcessor};
pub use response_curve::ResponseCurve;
pub use sampler::{single_channel_sampler, ChannelSampler, SampledBlocks};
pub use spectrum::{
    AnalyzerPath, AnalyzerPathGenerator, FftDataGenerator, FftOrder, PathProducer, Point, Rect,
};

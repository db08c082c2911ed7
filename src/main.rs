use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parametric_eq::config::EqConfig;
use parametric_eq::make_waves::{build_partials, log_sweep};
use parametric_eq::params::ParameterStore;
use parametric_eq::processor::EqProcessor;
use parametric_eq::response_curve::ResponseCurve;
use parametric_eq::utils::{GRID_FREQUENCIES, MAX_FREQ, MIN_FREQ};

/// Runs the equalizer over a WAV file (or a test sweep) with the analyzer ticking alongside
#[derive(Parser, Debug)]
#[command(name = "parametric-eq", version)]
struct Args {
    /// WAV file to process; a 20 Hz - 20 kHz sweep is used when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to write the filtered audio (32-bit float WAV)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// YAML config with analyzer settings and initial parameter values
    #[arg(short, long, default_value = "eq.yaml")]
    config: PathBuf,

    /// Host block size in samples
    #[arg(long, default_value_t = 512)]
    block_size: usize,

    /// Sample rate of the generated sweep
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Length of the generated signal
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,

    /// Generate a steady tone at this frequency instead of the sweep (repeatable)
    #[arg(long = "tone", value_name = "HZ")]
    tones: Vec<f32>,

    /// Pace blocks at the audio rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Parameter assignment, e.g. --set "Peak Gain=6" (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    assignments: Vec<String>,

    #[arg(long)]
    enable_logs: bool,
}

struct Stereo {
    left: Vec<f32>,
    right: Vec<f32>,
    sample_rate: u32,
}

struct AnalyzerSummary {
    ticks: u64,
    dropped_blocks: usize,
    left_path_points: usize,
    response_db: Vec<(f32, f64)>,
}

fn main() {
    let args = Args::parse();

    // Set up proper logging filters
    if args.enable_logs {
        // Don't override RUST_LOG if it's already set
        if std::env::var("RUST_LOG").is_err() {
            std::env::set_var(
                "RUST_LOG",
                "parametric_eq=info,\
                 params=info,\
                 spectrum=info,\
                 response_curve=info",
            );
        }
        // This will respect the RUST_LOG environment variable level
        env_logger::init();
    }

    if let Err(e) = run(&args) {
        if args.enable_logs {
            error!("Application encountered an error: {:?}", e);
        } else {
            eprintln!("Error: {:?}", e);
        }
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = EqConfig::load(&args.config)?;
    let store = Arc::new(ParameterStore::new());
    config.apply_parameters(&store)?;
    for assignment in &args.assignments {
        let (id, value) = store.apply_assignment(assignment)?;
        info!("{} = {}", id.name(), value);
    }

    let mut audio = match &args.input {
        Some(path) => read_wav(path)?,
        None => {
            let sample_rate = args.sample_rate as f32;
            let num_samples = (sample_rate * args.seconds.max(0.0)) as usize;
            let signal = if args.tones.is_empty() {
                log_sweep(MIN_FREQ as f32, MAX_FREQ as f32, sample_rate, num_samples, 0.5)
            } else {
                let partials: Vec<(f32, f32)> =
                    args.tones.iter().map(|&freq| (freq, 1.0)).collect();
                build_partials(&partials, sample_rate, num_samples, 0.5)
            };
            Stereo {
                left: signal.clone(),
                right: signal,
                sample_rate: args.sample_rate,
            }
        }
    };
    if args.block_size == 0 {
        return Err(anyhow!("--block-size must be at least 1"));
    }
    if audio.sample_rate == 0 {
        return Err(anyhow!("Sample rate must be positive"));
    }

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let audio_done = Arc::new(AtomicBool::new(false));
    {
        let shutdown_flag = Arc::clone(&shutdown_flag);
        ctrlc::set_handler(move || {
            shutdown_flag.store(true, Ordering::SeqCst);
        })?;
    }

    let (mut processor, taps) = EqProcessor::new(Arc::clone(&store));
    processor.prepare(audio.sample_rate as f64, args.block_size);

    info!("Starting analyzer thread at {} Hz...", config.refresh_rate_hz);
    let analyzer_thread = thread::spawn({
        let store = Arc::clone(&store);
        let config = config.clone();
        let shutdown_flag = Arc::clone(&shutdown_flag);
        let audio_done = Arc::clone(&audio_done);
        move || run_analyzer(store, taps, &config, shutdown_flag, audio_done)
    });

    let block_duration = Duration::from_secs_f64(args.block_size as f64 / audio.sample_rate as f64);
    let mut blocks = 0usize;
    for (left, right) in audio
        .left
        .chunks_mut(args.block_size)
        .zip(audio.right.chunks_mut(args.block_size))
    {
        if shutdown_flag.load(Ordering::SeqCst) {
            warn!("Interrupted after {} blocks", blocks);
            break;
        }
        processor.process(left, right);
        blocks += 1;
        if args.realtime {
            thread::sleep(block_duration);
        }
    }
    info!("Processed {} blocks of {} samples", blocks, args.block_size);

    audio_done.store(true, Ordering::SeqCst);
    let summary = analyzer_thread
        .join()
        .map_err(|_| anyhow!("Analyzer thread panicked"))?;
    processor.release_resources();

    if let Some(path) = &args.output {
        write_wav(path, &audio)?;
    }

    println!("Analyzer ticks: {}", summary.ticks);
    println!("Analyzer blocks dropped: {}", summary.dropped_blocks);
    println!("Left analyzer path points: {}", summary.left_path_points);
    println!("Response curve:");
    for (freq, db) in &summary.response_db {
        println!("  {:>7.0} Hz  {:>+7.2} dB", freq, db);
    }
    Ok(())
}

fn run_analyzer(
    store: Arc<ParameterStore>,
    taps: parametric_eq::AnalyzerTaps,
    config: &EqConfig,
    shutdown_flag: Arc<AtomicBool>,
    audio_done: Arc<AtomicBool>,
) -> AnalyzerSummary {
    let mut curve = ResponseCurve::new(store, taps, config);
    let ticker = crossbeam_channel::tick(Duration::from_secs_f32(1.0 / config.refresh_rate_hz));
    let mut ticks = 0u64;

    while !shutdown_flag.load(Ordering::SeqCst) && !audio_done.load(Ordering::SeqCst) {
        if ticker.recv().is_err() {
            break;
        }
        curve.timer_callback();
        ticks += 1;
        if curve.take_redraw_request() {
            debug!(target: "response_curve", "redraw: {} analyzer points", curve.left_path().len());
        }
    }
    // Pick up whatever the audio side queued after the last tick.
    curve.timer_callback();
    ticks += 1;

    let dropped_blocks = curve.dropped_blocks();
    if dropped_blocks > 0 {
        info!("Analyzer dropped {} sampled blocks", dropped_blocks);
    }

    AnalyzerSummary {
        ticks,
        dropped_blocks,
        left_path_points: curve.left_path().len(),
        response_db: GRID_FREQUENCIES
            .iter()
            .map(|&freq| (freq, curve.response_at(freq as f64)))
            .collect(),
    }
}

fn read_wav(path: &Path) -> Result<Stereo> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let spec = reader.spec();
    info!(
        "Reading {}: {} channels, {} Hz, {} bits {:?}",
        path.display(),
        spec.channels,
        spec.sample_rate,
        spec.bits_per_sample,
        spec.sample_format
    );

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    if channels > 2 {
        warn!("{} channels in input, only the first two are processed", channels);
    }
    let frames = samples.len() / channels;
    let mut left = Vec::with_capacity(frames);
    let mut right = Vec::with_capacity(frames);
    for frame in samples.chunks_exact(channels) {
        left.push(frame[0]);
        right.push(if channels > 1 { frame[1] } else { frame[0] });
    }

    Ok(Stereo { left, right, sample_rate: spec.sample_rate })
}

fn write_wav(path: &Path, audio: &Stereo) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: audio.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for (&l, &r) in audio.left.iter().zip(audio.right.iter()) {
        writer.write_sample(l)?;
        writer.write_sample(r)?;
    }
    writer.finalize()?;
    info!("Wrote {} frames to {}", audio.left.len(), path.display());
    Ok(())
}

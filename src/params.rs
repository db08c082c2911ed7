//! Parameter store shared between the audio thread and the analyzer.
//!
//! Values live in lock-free atomics so the audio thread can read a full
//! [`ChainSettings`] snapshot at the start of every block. Writes come from the
//! host/UI side, are clamped to the declared range and fan out to the
//! registered listeners on the writing thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use portable_atomic::AtomicF32;
use thiserror::Error;

/// Every automatable parameter of the equalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamId {
    LowCutFreq,
    HighCutFreq,
    PeakFreq,
    PeakGain,
    PeakQuality,
    LowCutSlope,
    HighCutSlope,
    LowCutBypassed,
    PeakBypassed,
    HighCutBypassed,
    AnalyzerEnabled,
}

impl ParamId {
    pub const ALL: [ParamId; 11] = [
        ParamId::LowCutFreq,
        ParamId::HighCutFreq,
        ParamId::PeakFreq,
        ParamId::PeakGain,
        ParamId::PeakQuality,
        ParamId::LowCutSlope,
        ParamId::HighCutSlope,
        ParamId::LowCutBypassed,
        ParamId::PeakBypassed,
        ParamId::HighCutBypassed,
        ParamId::AnalyzerEnabled,
    ];

    /// Display name, also used as the lookup key in config files.
    pub fn name(self) -> &'static str {
        match self {
            ParamId::LowCutFreq => "LowCut Freq",
            ParamId::HighCutFreq => "HighCut Freq",
            ParamId::PeakFreq => "Peak Freq",
            ParamId::PeakGain => "Peak Gain",
            ParamId::PeakQuality => "Peak Quality",
            ParamId::LowCutSlope => "LowCut Slope",
            ParamId::HighCutSlope => "HighCut Slope",
            ParamId::LowCutBypassed => "LowCut Bypassed",
            ParamId::PeakBypassed => "Peak Bypassed",
            ParamId::HighCutBypassed => "HighCut Bypassed",
            ParamId::AnalyzerEnabled => "Analyzer Enabled",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ParamError> {
        ParamId::ALL
            .iter()
            .copied()
            .find(|id| id.name() == name)
            .ok_or_else(|| ParamError::UnknownParameter(name.to_string()))
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("invalid assignment '{0}', expected NAME=VALUE")]
    InvalidAssignment(String),
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: String, value: String },
}

/// Plain value range with JUCE-style interval snapping and skew.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalisableRange {
    pub start: f32,
    pub end: f32,
    pub interval: f32,
    pub skew: f32,
}

impl NormalisableRange {
    pub const fn new(start: f32, end: f32, interval: f32, skew: f32) -> Self {
        Self { start, end, interval, skew }
    }

    pub fn convert_to_0to1(&self, value: f32) -> f32 {
        let proportion = ((value - self.start) / (self.end - self.start)).clamp(0.0, 1.0);
        if self.skew == 1.0 {
            proportion
        } else {
            proportion.powf(self.skew)
        }
    }

    pub fn convert_from_0to1(&self, proportion: f32) -> f32 {
        let mut proportion = proportion.clamp(0.0, 1.0);
        if self.skew != 1.0 && proportion > 0.0 {
            proportion = (proportion.ln() / self.skew).exp();
        }
        self.snap_to_legal_value(self.start + (self.end - self.start) * proportion)
    }

    pub fn snap_to_legal_value(&self, value: f32) -> f32 {
        let snapped = if self.interval > 0.0 {
            self.start + self.interval * ((value - self.start) / self.interval).round()
        } else {
            value
        };
        snapped.clamp(self.start, self.end)
    }
}

/// What kind of value a parameter carries and how it is constrained.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Float(NormalisableRange),
    /// Index into the labels, stored as a float like every other value.
    Choice(&'static [&'static str]),
    Bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub id: ParamId,
    pub kind: ParameterKind,
    pub default: f32,
}

impl ParameterSpec {
    /// Clamps/snaps a plain value into what the parameter can actually hold.
    pub fn constrain(&self, value: f32) -> f32 {
        let value = if value.is_finite() { value } else { self.default };
        match &self.kind {
            ParameterKind::Float(range) => range.snap_to_legal_value(value),
            ParameterKind::Choice(labels) => {
                value.round().clamp(0.0, labels.len().saturating_sub(1) as f32)
            }
            ParameterKind::Bool => {
                if value >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn convert_to_0to1(&self, value: f32) -> f32 {
        match &self.kind {
            ParameterKind::Float(range) => range.convert_to_0to1(value),
            ParameterKind::Choice(labels) => {
                let steps = labels.len().saturating_sub(1).max(1) as f32;
                (value / steps).clamp(0.0, 1.0)
            }
            ParameterKind::Bool => self.constrain(value),
        }
    }

    pub fn convert_from_0to1(&self, proportion: f32) -> f32 {
        match &self.kind {
            ParameterKind::Float(range) => range.convert_from_0to1(proportion),
            ParameterKind::Choice(labels) => {
                let steps = labels.len().saturating_sub(1) as f32;
                self.constrain(proportion.clamp(0.0, 1.0) * steps)
            }
            ParameterKind::Bool => self.constrain(proportion),
        }
    }

    /// Parses user text, accepting choice labels ("24 dB/Oct") and booleans ("true"/"on").
    pub fn parse(&self, text: &str) -> Result<f32, ParamError> {
        let text = text.trim();
        let invalid = || ParamError::InvalidValue {
            name: self.id.name().to_string(),
            value: text.to_string(),
        };
        match &self.kind {
            ParameterKind::Choice(labels) => {
                let found = labels.iter().position(|label| label.eq_ignore_ascii_case(text));
                if let Some(index) = found {
                    return Ok(index as f32);
                }
            }
            ParameterKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" => return Ok(1.0),
                "false" | "off" | "no" => return Ok(0.0),
                _ => {}
            },
            ParameterKind::Float(_) => {}
        }
        text.parse::<f32>().map_err(|_| invalid())
    }
}

pub const SLOPE_CHOICES: [&str; 4] = ["12 dB/Oct", "24 dB/Oct", "36 dB/Oct", "48 dB/Oct"];

const FREQ_RANGE: NormalisableRange = NormalisableRange::new(20.0, 20000.0, 1.0, 0.25);

/// The fixed parameter layout of the equalizer.
pub fn create_parameter_layout() -> Vec<ParameterSpec> {
    ParamId::ALL
        .iter()
        .map(|&id| {
            let (kind, default) = match id {
                ParamId::LowCutFreq => (ParameterKind::Float(FREQ_RANGE), 20.0),
                ParamId::HighCutFreq => (ParameterKind::Float(FREQ_RANGE), 20000.0),
                ParamId::PeakFreq => (ParameterKind::Float(FREQ_RANGE), 750.0),
                ParamId::PeakGain => (
                    ParameterKind::Float(NormalisableRange::new(-24.0, 24.0, 0.5, 1.0)),
                    0.0,
                ),
                ParamId::PeakQuality => (
                    ParameterKind::Float(NormalisableRange::new(0.1, 10.0, 0.05, 1.0)),
                    1.0,
                ),
                ParamId::LowCutSlope | ParamId::HighCutSlope => {
                    (ParameterKind::Choice(&SLOPE_CHOICES), 0.0)
                }
                ParamId::LowCutBypassed | ParamId::PeakBypassed | ParamId::HighCutBypassed => {
                    (ParameterKind::Bool, 0.0)
                }
                ParamId::AnalyzerEnabled => (ParameterKind::Bool, 1.0),
            };
            ParameterSpec { id, kind, default }
        })
        .collect()
}

/// Handle returned by [`ParameterStore::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(ParamId, f32) + Send + Sync>;

/// Thread-safe parameter values plus change notification.
pub struct ParameterStore {
    layout: Vec<ParameterSpec>,
    values: Vec<AtomicF32>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl ParameterStore {
    pub fn new() -> Self {
        let layout = create_parameter_layout();
        let values = layout.iter().map(|spec| AtomicF32::new(spec.default)).collect();
        Self {
            layout,
            values,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn spec(&self, id: ParamId) -> &ParameterSpec {
        &self.layout[id.index()]
    }

    pub fn layout(&self) -> &[ParameterSpec] {
        &self.layout
    }

    /// Lock-free, wait-free read. Safe to call from the audio thread.
    #[inline]
    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn get_bool(&self, id: ParamId) -> bool {
        self.get(id) >= 0.5
    }

    /// Stores a plain value (clamped and snapped) and notifies listeners if it changed.
    /// Returns the value actually stored.
    pub fn set(&self, id: ParamId, value: f32) -> f32 {
        let constrained = self.spec(id).constrain(value);
        let previous = self.values[id.index()].swap(constrained, Ordering::Relaxed);
        if previous != constrained {
            self.notify(id, constrained);
        }
        constrained
    }

    pub fn set_normalised(&self, id: ParamId, proportion: f32) -> f32 {
        let value = self.spec(id).convert_from_0to1(proportion);
        self.set(id, value)
    }

    pub fn get_normalised(&self, id: ParamId) -> f32 {
        self.spec(id).convert_to_0to1(self.get(id))
    }

    pub fn set_by_name(&self, name: &str, value: f32) -> Result<f32, ParamError> {
        let id = ParamId::from_name(name)?;
        Ok(self.set(id, value))
    }

    /// Applies a `NAME=VALUE` assignment such as `"Peak Gain=6"` or `"LowCut Slope=24 dB/Oct"`.
    pub fn apply_assignment(&self, assignment: &str) -> Result<(ParamId, f32), ParamError> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| ParamError::InvalidAssignment(assignment.to_string()))?;
        let id = ParamId::from_name(name.trim())?;
        let value = self.spec(id).parse(value)?;
        Ok((id, self.set(id, value)))
    }

    /// Registers a callback fired (on the writing thread) whenever any value changes.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(ParamId, f32) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push((id, Arc::new(listener))),
            Err(poisoned) => poisoned.into_inner().push((id, Arc::new(listener))),
        }
        debug!(target: "params", "Registered parameter listener {:?}", id);
        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        let mut listeners = match self.listeners.lock() {
            Ok(listeners) => listeners,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.retain(|(listener_id, _)| *listener_id != id);
    }

    fn notify(&self, id: ParamId, value: f32) {
        // Clone the handles so a listener may (un)register without deadlocking.
        let listeners: Vec<Listener> = match self.listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            Err(_) => {
                warn!(target: "params", "Listener list poisoned, dropping change of {}", id.name());
                return;
            }
        };
        for listener in listeners {
            listener(id, value);
        }
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut filter steepness; each step adds one second-order section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slope {
    #[default]
    Db12,
    Db24,
    Db36,
    Db48,
}

impl Slope {
    pub fn from_index(index: f32) -> Self {
        match index.round() as i32 {
            i32::MIN..=0 => Slope::Db12,
            1 => Slope::Db24,
            2 => Slope::Db36,
            _ => Slope::Db48,
        }
    }

    /// 0 for 12 dB/oct up to 3 for 48 dB/oct.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Number of active biquad sections.
    #[inline]
    pub fn stages(self) -> usize {
        self.index() + 1
    }

    /// Butterworth order realised by this slope.
    #[inline]
    pub fn order(self) -> usize {
        2 * self.stages()
    }

    pub fn db_per_octave(self) -> u32 {
        12 * self.stages() as u32
    }
}

/// Snapshot of everything the filter chain needs, read fresh each update cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSettings {
    pub peak_freq: f32,
    pub peak_gain_in_decibels: f32,
    pub peak_quality: f32,
    pub low_cut_freq: f32,
    pub high_cut_freq: f32,
    pub low_cut_slope: Slope,
    pub high_cut_slope: Slope,
    pub low_cut_bypassed: bool,
    pub peak_bypassed: bool,
    pub high_cut_bypassed: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            peak_freq: 750.0,
            peak_gain_in_decibels: 0.0,
            peak_quality: 1.0,
            low_cut_freq: 20.0,
            high_cut_freq: 20000.0,
            low_cut_slope: Slope::Db12,
            high_cut_slope: Slope::Db12,
            low_cut_bypassed: false,
            peak_bypassed: false,
            high_cut_bypassed: false,
        }
    }
}

impl ChainSettings {
    /// Reads the current values. Only atomic loads, so it is allocation-free.
    pub fn from_store(store: &ParameterStore) -> Self {
        Self {
            peak_freq: store.get(ParamId::PeakFreq),
            peak_gain_in_decibels: store.get(ParamId::PeakGain),
            peak_quality: store.get(ParamId::PeakQuality),
            low_cut_freq: store.get(ParamId::LowCutFreq),
            high_cut_freq: store.get(ParamId::HighCutFreq),
            low_cut_slope: Slope::from_index(store.get(ParamId::LowCutSlope)),
            high_cut_slope: Slope::from_index(store.get(ParamId::HighCutSlope)),
            low_cut_bypassed: store.get_bool(ParamId::LowCutBypassed),
            peak_bypassed: store.get_bool(ParamId::PeakBypassed),
            high_cut_bypassed: store.get_bool(ParamId::HighCutBypassed),
        }
    }
}

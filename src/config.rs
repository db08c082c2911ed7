use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::params::{ParamId, ParameterStore};
use crate::spectrum::{FftOrder, Rect, DEFAULT_PATH_RESOLUTION, NEGATIVE_INFINITY_DB};

pub const DEFAULT_REFRESH_RATE_HZ: f32 = 60.0;
pub const DEFAULT_RESPONSE_POINTS: usize = 600;

// Analyzer settings plus initial parameter values, stored as YAML
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EqConfig {
    pub fft_order: FftOrder,
    pub refresh_rate_hz: f32,
    pub negative_infinity_db: f32,
    pub path_resolution: usize,
    // One magnitude per horizontal pixel of the response curve
    pub response_points: usize,
    pub analysis_width: f32,
    pub analysis_height: f32,
    // Keyed by parameter display name, e.g. "Peak Gain"
    pub parameters: BTreeMap<String, f32>,
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            fft_order: FftOrder::default(),
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            negative_infinity_db: NEGATIVE_INFINITY_DB,
            path_resolution: DEFAULT_PATH_RESOLUTION,
            response_points: DEFAULT_RESPONSE_POINTS,
            analysis_width: DEFAULT_RESPONSE_POINTS as f32,
            analysis_height: 300.0,
            parameters: BTreeMap::new(),
        }
    }
}

impl EqConfig {
    /// Loads `file_path`, falling back to defaults when the file does not exist.
    pub fn load(file_path: &Path) -> Result<Self> {
        if !file_path.exists() {
            info!("No config file found at {}. Using defaults.", file_path.display());
            return Ok(Self::default());
        }

        info!("Loading config from {}", file_path.display());
        let yaml_str = fs::read_to_string(file_path)?;
        let config: Self = serde_yaml::from_str(&yaml_str)
            .map_err(|e| anyhow!("Failed to parse {}: {}", file_path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, file_path: &Path) -> Result<()> {
        let yaml_str = serde_yaml::to_string(self)?;
        fs::write(file_path, yaml_str)?;
        info!("Config saved to {}", file_path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0) {
            return Err(anyhow!("refresh_rate_hz must be positive, got {}", self.refresh_rate_hz));
        }
        if !(self.negative_infinity_db.is_finite() && self.negative_infinity_db < 0.0) {
            return Err(anyhow!(
                "negative_infinity_db must be below 0 dB, got {}",
                self.negative_infinity_db
            ));
        }
        if self.path_resolution == 0 {
            return Err(anyhow!("path_resolution must be at least 1"));
        }
        if self.response_points < 2 {
            return Err(anyhow!("response_points must be at least 2"));
        }
        if self.analysis_width <= 0.0 || self.analysis_height <= 0.0 {
            return Err(anyhow!(
                "analysis area must be non-empty, got {}x{}",
                self.analysis_width, self.analysis_height
            ));
        }
        for name in self.parameters.keys() {
            ParamId::from_name(name)?;
        }
        Ok(())
    }

    pub fn analysis_bounds(&self) -> Rect {
        Rect::new(0.0, 0.0, self.analysis_width, self.analysis_height)
    }

    /// Writes the configured initial values into `store`. Out-of-range values are clamped
    /// by the store; a clamped value is reported.
    pub fn apply_parameters(&self, store: &ParameterStore) -> Result<()> {
        for (name, &value) in &self.parameters {
            let stored = store.set_by_name(name, value)?;
            if stored != value {
                warn!("Parameter '{}' = {} adjusted to {}", name, value, stored);
            }
        }
        Ok(())
    }
}

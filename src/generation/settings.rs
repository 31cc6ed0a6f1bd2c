//! Generation settings.
//!
//! A fixed schema with defaults. Partial updates arrive as a
//! [`SettingsUpdate`] and are validated before they are applied, so the
//! worker never sees an invalid record.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Placeholder name meaning "no LoRA in this slot".
pub const NO_LORA: &str = "None";

const MAX_DIMENSION: u32 = 4096;
const MAX_STEPS: u32 = 200;

/// Everything the generation service needs for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub model: String,
    pub vae: String,
    pub sampler_name: String,
    pub scheduler: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub denoise: f64,
    pub lora1_name: String,
    pub lora1_strength: f64,
    pub lora2_name: String,
    pub lora2_strength: f64,
    pub hires_enabled: bool,
    pub hires_steps: u32,
    pub hires_denoise: f64,
    /// Resubmit automatically after each successful generation.
    pub autogeneration: bool,
}

impl GenerationSettings {
    /// Defaults with the given checkpoint selected.
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn lora1(&self) -> Option<(&str, f64)> {
        lora_slot(&self.lora1_name, self.lora1_strength)
    }

    pub fn lora2(&self) -> Option<(&str, f64)> {
        lora_slot(&self.lora2_name, self.lora2_strength)
    }

    /// Apply `update`, leaving `self` untouched if the result is invalid.
    pub fn apply(&mut self, update: SettingsUpdate) -> Result<()> {
        let mut next = self.clone();
        update.merge_into(&mut next);
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::validation("model must be set"));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_DIMENSION || value % 8 != 0 {
                return Err(Error::validation(format!(
                    "{name} must be a multiple of 8 between 8 and {MAX_DIMENSION}, got {value}"
                )));
            }
        }
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(Error::validation(format!(
                "steps must be between 1 and {MAX_STEPS}, got {}",
                self.steps
            )));
        }
        if self.hires_enabled && (self.hires_steps == 0 || self.hires_steps > MAX_STEPS) {
            return Err(Error::validation(format!(
                "hires_steps must be between 1 and {MAX_STEPS}, got {}",
                self.hires_steps
            )));
        }
        if !(self.cfg > 0.0 && self.cfg <= 30.0) {
            return Err(Error::validation(format!("cfg out of range: {}", self.cfg)));
        }
        for (name, value) in [("denoise", self.denoise), ("hires_denoise", self.hires_denoise)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::validation(format!("{name} must be within 0..=1, got {value}")));
            }
        }
        for (name, value) in [
            ("lora1_strength", self.lora1_strength),
            ("lora2_strength", self.lora2_strength),
        ] {
            if !value.is_finite() || value.abs() > 10.0 {
                return Err(Error::validation(format!("{name} out of range: {value}")));
            }
        }
        Ok(())
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: String::new(),
            vae: "vae-ft-mse-840000-ema-pruned.safetensors".to_string(),
            sampler_name: "euler_ancestral".to_string(),
            scheduler: "normal".to_string(),
            positive_prompt: String::new(),
            negative_prompt: String::new(),
            width: 680,
            height: 1024,
            steps: 30,
            cfg: 8.0,
            denoise: 1.0,
            lora1_name: NO_LORA.to_string(),
            lora1_strength: 1.0,
            lora2_name: NO_LORA.to_string(),
            lora2_strength: 1.0,
            hires_enabled: false,
            hires_steps: 16,
            hires_denoise: 0.8,
            autogeneration: false,
        }
    }
}

fn lora_slot(name: &str, strength: f64) -> Option<(&str, f64)> {
    if name.is_empty() || name == NO_LORA {
        None
    } else {
        Some((name, strength))
    }
}

/// Partial settings change. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub model: Option<String>,
    pub vae: Option<String>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub steps: Option<u32>,
    pub cfg: Option<f64>,
    pub denoise: Option<f64>,
    pub lora1_name: Option<String>,
    pub lora1_strength: Option<f64>,
    pub lora2_name: Option<String>,
    pub lora2_strength: Option<f64>,
    pub hires_enabled: Option<bool>,
    pub hires_steps: Option<u32>,
    pub hires_denoise: Option<f64>,
    pub autogeneration: Option<bool>,
}

impl SettingsUpdate {
    fn merge_into(self, s: &mut GenerationSettings) {
        if let Some(v) = self.model {
            s.model = v;
        }
        if let Some(v) = self.vae {
            s.vae = v;
        }
        if let Some(v) = self.sampler_name {
            s.sampler_name = v;
        }
        if let Some(v) = self.scheduler {
            s.scheduler = v;
        }
        if let Some(v) = self.positive_prompt {
            s.positive_prompt = v;
        }
        if let Some(v) = self.negative_prompt {
            s.negative_prompt = v;
        }
        if let Some(v) = self.width {
            s.width = v;
        }
        if let Some(v) = self.height {
            s.height = v;
        }
        if let Some(v) = self.steps {
            s.steps = v;
        }
        if let Some(v) = self.cfg {
            s.cfg = v;
        }
        if let Some(v) = self.denoise {
            s.denoise = v;
        }
        if let Some(v) = self.lora1_name {
            s.lora1_name = v;
        }
        if let Some(v) = self.lora1_strength {
            s.lora1_strength = v;
        }
        if let Some(v) = self.lora2_name {
            s.lora2_name = v;
        }
        if let Some(v) = self.lora2_strength {
            s.lora2_strength = v;
        }
        if let Some(v) = self.hires_enabled {
            s.hires_enabled = v;
        }
        if let Some(v) = self.hires_steps {
            s.hires_steps = v;
        }
        if let Some(v) = self.hires_denoise {
            s.hires_denoise = v;
        }
        if let Some(v) = self.autogeneration {
            s.autogeneration = v;
        }
    }
}

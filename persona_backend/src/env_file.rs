//! Reading and rewriting the `.env` file behind the settings page.
//!
//! Edits only take effect after a restart; the running process keeps its
//! already-loaded [`Settings`].

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::Settings;
use crate::generation::{
    DIMENSION_STEP, MAX_CFG_SCALE, MAX_DIMENSION, MAX_STEPS, MIN_CFG_SCALE, MIN_DIMENSION,
    MIN_STEPS,
};

/// The subset of settings editable from the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub openrouter_api_key: String,
    pub stable_diffusion_api_key: String,
    pub api_host: String,
    pub api_port: u16,
    pub frontend_port: u16,
    pub default_chat_model: String,
    pub default_image_model: String,
    pub default_sd_steps: u32,
    pub default_sd_cfg_scale: f32,
    pub default_sd_width: u32,
    pub default_sd_height: u32,
}

impl SettingsUpdate {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            openrouter_api_key: settings.openrouter_api_key.clone().unwrap_or_default(),
            stable_diffusion_api_key: settings
                .stable_diffusion_api_key
                .clone()
                .unwrap_or_default(),
            api_host: settings.api_host.clone(),
            api_port: settings.api_port,
            frontend_port: settings.frontend_port,
            default_chat_model: settings.default_chat_model.clone(),
            default_image_model: settings.default_image_model.clone(),
            default_sd_steps: settings.default_sd_steps,
            default_sd_cfg_scale: settings.default_sd_cfg_scale,
            default_sd_width: settings.default_sd_width,
            default_sd_height: settings.default_sd_height,
        }
    }

    /// Image defaults use the bounds the generation endpoint accepts.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.api_host.trim().is_empty(), "API host cannot be empty");
        ensure!(self.api_port != 0, "API port cannot be 0");
        ensure!(self.frontend_port != 0, "Frontend port cannot be 0");
        ensure!(
            self.api_port != self.frontend_port,
            "API port and frontend port must differ"
        );
        ensure!(
            !self.default_chat_model.trim().is_empty(),
            "Default chat model cannot be empty"
        );
        ensure!(
            !self.default_image_model.trim().is_empty(),
            "Default image model cannot be empty"
        );
        ensure!(
            (MIN_STEPS..=MAX_STEPS).contains(&self.default_sd_steps),
            "Default steps must be between {} and {}",
            MIN_STEPS,
            MAX_STEPS
        );
        ensure!(
            (MIN_CFG_SCALE..=MAX_CFG_SCALE).contains(&self.default_sd_cfg_scale),
            "Default CFG scale must be between {} and {}",
            MIN_CFG_SCALE,
            MAX_CFG_SCALE
        );
        for (label, value) in [
            ("width", self.default_sd_width),
            ("height", self.default_sd_height),
        ] {
            ensure!(
                (MIN_DIMENSION..=MAX_DIMENSION).contains(&value) && value % DIMENSION_STEP == 0,
                "Default {} must be a multiple of {} between {} and {}",
                label,
                DIMENSION_STEP,
                MIN_DIMENSION,
                MAX_DIMENSION
            );
        }
        Ok(())
    }

    /// Key/value pairs to write. `None` entries are left out of the file.
    pub fn env_pairs(&self, current: &Settings) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("API_HOST", Some(self.api_host.trim().to_string())),
            ("API_PORT", Some(self.api_port.to_string())),
            ("FRONTEND_PORT", Some(self.frontend_port.to_string())),
            ("OPENROUTER_API_KEY", Some(self.openrouter_api_key.trim().to_string())),
            (
                "STABLE_DIFFUSION_API_KEY",
                Some(self.stable_diffusion_api_key.trim().to_string()),
            ),
            ("DEFAULT_CHAT_MODEL", Some(self.default_chat_model.trim().to_string())),
            ("DEFAULT_IMAGE_MODEL", Some(self.default_image_model.trim().to_string())),
            ("DEFAULT_SD_STEPS", Some(self.default_sd_steps.to_string())),
            ("DEFAULT_SD_CFG_SCALE", Some(self.default_sd_cfg_scale.to_string())),
            ("DEFAULT_SD_WIDTH", Some(self.default_sd_width.to_string())),
            ("DEFAULT_SD_HEIGHT", Some(self.default_sd_height.to_string())),
            ("SECRET_KEY", current.secret_key.clone()),
            ("ALGORITHM", Some(current.algorithm.clone())),
            (
                "ACCESS_TOKEN_EXPIRE_MINUTES",
                Some(current.access_token_expire_minutes.to_string()),
            ),
        ]
    }
}

/// Read a `.env` file into an ordered map, parsed by dotenvy so quoting and escapes match
/// what the process sees at startup. A missing file reads as empty.
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    if !path.exists() {
        return Ok(map);
    }

    let entries = dotenvy::from_path_iter(path)
        .with_context(|| format!("Failed to open env file {:?}", path))?;
    for entry in entries {
        let (key, value) = entry.with_context(|| format!("Failed to parse env file {:?}", path))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Validate `update` and merge it into the env file at `path`, keeping unrelated keys.
pub fn write_env_file(path: &Path, update: &SettingsUpdate, current: &Settings) -> Result<()> {
    update.validate()?;

    // An unreadable file is left alone rather than rewritten without its other keys.
    let mut entries = read_env_file(path)?;
    for (key, value) in update.env_pairs(current) {
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
    }

    let mut contents = String::new();
    for (key, value) in &entries {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(&quote_if_needed(value));
        contents.push('\n');
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write env file {:?}", path))?;

    tracing::info!("Saved settings to {:?}; restart required", path);
    Ok(())
}

/// Format a value so dotenvy reads it back unchanged.
fn quote_if_needed(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| !c.is_whitespace() && !matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if plain {
        value.to_string()
    } else if !value.contains('\'') && !value.contains('\n') {
        // Single quotes are literal: no escapes, no substitution.
        format!("'{}'", value)
    } else {
        let mut quoted = String::with_capacity(value.len() + 2);
        quoted.push('"');
        for c in value.chars() {
            match c {
                '\\' | '"' | '$' => {
                    quoted.push('\\');
                    quoted.push(c);
                }
                '\n' => quoted.push_str("\\n"),
                _ => quoted.push(c),
            }
        }
        quoted.push('"');
        quoted
    }
}

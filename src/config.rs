//! Application configuration.
//!
//! Loads settings from config.json at startup. Every field has a default, so
//! a partial file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::decoder::{DecodeStrategy, DecoderSettings};
use crate::inference::TensorLayout;
use crate::normalize::{DEFAULT_CONTRAST_BOOST, NormalizeOptions, ResizePolicy};

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<AppConfig> = OnceLock::new();

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Model file path (relative to the executable) or http(s) URL
    pub model: String,
    /// Input tensor axis order expected by the model
    pub tensor_layout: TensorLayout,
    pub decode_strategy: DecodeStrategy,
    pub decoder: DecoderSettings,
    pub resize_policy: ResizePolicy,
    /// Initial state of the contrast filter checkbox
    pub enhance_contrast: bool,
    pub contrast_boost: f32,
    /// Show inference time under the result
    pub show_timing: bool,
    /// Show the per-position confidence list
    pub show_confidences: bool,
    /// Message catalog locale; `LANG` is used when unset
    pub locale: Option<String>,
    /// Image fetch timeout; no timeout when unset
    pub request_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: "model/captcha.onnx".to_string(),
            tensor_layout: TensorLayout::default(),
            decode_strategy: DecodeStrategy::default(),
            decoder: DecoderSettings::default(),
            resize_policy: ResizePolicy::default(),
            enhance_contrast: false,
            contrast_boost: DEFAULT_CONTRAST_BOOST,
            show_timing: true,
            show_confidences: true,
            locale: None,
            request_timeout_secs: None,
        }
    }
}

impl AppConfig {
    /// Normalizer options for one run; `enhance` comes from the caller.
    pub fn normalize_options(&self, enhance: bool) -> NormalizeOptions {
        NormalizeOptions {
            policy: self.resize_policy,
            enhance,
            contrast_boost: self.contrast_boost,
            ..NormalizeOptions::default()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Reads config from `path`, falling back to defaults on any failure.
    pub fn load(config_path: &Path) -> Self {
        if config_path.exists() {
            match fs::read_to_string(config_path) {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(config) => {
                        crate::log(&format!("Config loaded from {}", config_path.display()));
                        return config;
                    }
                    Err(e) => {
                        crate::log(&format!(
                            "Failed to parse config.json: {}. Using defaults.",
                            e
                        ));
                    }
                },
                Err(e) => {
                    crate::log(&format!(
                        "Failed to read config.json: {}. Using defaults.",
                        e
                    ));
                }
            }
        } else {
            crate::log("config.json not found. Using default config.");
        }

        Self::default()
    }
}

/// Loads config.json from the executable directory.
fn load_config() -> AppConfig {
    let config_path = crate::paths::get_exe_dir().join("config.json");
    crate::log(&format!("Looking for config at: {}", config_path.display()));
    AppConfig::load(&config_path)
}

/// Initializes the global configuration. Call once at startup.
pub fn init_config() {
    let _ = CONFIG.set(load_config());
}

/// Returns the global configuration, loading it on first use.
pub fn get_config() -> &'static AppConfig {
    CONFIG.get_or_init(load_config)
}

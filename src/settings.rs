use anyhow::Context;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::document::EngineConfig;
use crate::document::paged::DEFAULT_ASSET_PREFIX;
use crate::viewer::ZoomLimits;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "doccompare";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,

    /// Initial scale of new viewers and the target of a zoom reset
    #[serde(default = "default_zoom")]
    pub default_zoom: f32,

    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,

    #[serde(default = "default_max_viewers")]
    pub max_viewers: usize,

    #[serde(default = "default_true")]
    pub enable_download: bool,

    #[serde(default = "default_true")]
    pub enable_multiple_viewers: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_host: Option<String>,

    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,

    #[serde(default = "default_initial_references")]
    pub initial_references: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_min_zoom() -> f32 {
    0.25
}

fn default_max_zoom() -> f32 {
    2.0
}

fn default_zoom() -> f32 {
    1.5
}

fn default_zoom_step() -> f32 {
    0.25
}

fn default_max_viewers() -> usize {
    6
}

fn default_asset_prefix() -> String {
    DEFAULT_ASSET_PREFIX.to_string()
}

fn default_initial_references() -> Vec<String> {
    vec![String::new(), String::new()]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            default_zoom: default_zoom(),
            zoom_step: default_zoom_step(),
            max_viewers: default_max_viewers(),
            enable_download: true,
            enable_multiple_viewers: true,
            relay_endpoint: None,
            origin_host: None,
            asset_prefix: default_asset_prefix(),
            initial_references: default_initial_references(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from `path` (or the default location), falling back to defaults on any error.
    ///
    /// A missing file at the default location is created with default values.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
            warn!("Could not determine config directory, using default settings");
            return Self::default();
        };

        if !path.exists() {
            info!("Settings file not found, creating with defaults at {path:?}");
            let settings = Self::default();
            if let Err(e) = settings.save_to_path(&path) {
                error!("Failed to save settings to {path:?}: {e:#}");
            }
            return settings;
        }

        match Self::load_from_path(&path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{e:#}");
                Self::default()
            }
        }
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {path:?}"))?;
        let mut settings: Settings = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {path:?}"))?;
        debug!("Loaded settings from {path:?}");

        if settings.version < CURRENT_VERSION {
            migrate_settings(&mut settings);
            settings.save_to_path(path)?;
        }
        settings.validate();
        Ok(settings)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {parent:?}"))?;
        }
        let mut content = String::from(SETTINGS_HEADER);
        content.push_str(&serde_yaml::to_string(self)?);
        fs::write(path, content).with_context(|| format!("Failed to write {path:?}"))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Repair values that would break zoom clamping or the viewer container
    pub fn validate(&mut self) {
        let finite_positive = |v: f32| v.is_finite() && v > 0.0;
        if !finite_positive(self.min_zoom) {
            warn!("Invalid min_zoom {}, using default", self.min_zoom);
            self.min_zoom = default_min_zoom();
        }
        if !finite_positive(self.max_zoom) {
            warn!("Invalid max_zoom {}, using default", self.max_zoom);
            self.max_zoom = default_max_zoom();
        }
        if self.min_zoom > self.max_zoom {
            warn!(
                "min_zoom {} exceeds max_zoom {}, swapping",
                self.min_zoom, self.max_zoom
            );
            std::mem::swap(&mut self.min_zoom, &mut self.max_zoom);
        }
        if !finite_positive(self.zoom_step) {
            self.zoom_step = default_zoom_step();
        }
        if !self.default_zoom.is_finite() {
            self.default_zoom = default_zoom();
        }
        self.default_zoom = self.default_zoom.clamp(self.min_zoom, self.max_zoom);
        self.max_viewers = self.max_viewers.max(1);
        if self.initial_references.is_empty() {
            self.initial_references.push(String::new());
        }
    }

    pub fn zoom_limits(&self) -> ZoomLimits {
        ZoomLimits {
            min: self.min_zoom,
            max: self.max_zoom,
            default: Some(self.default_zoom),
            step: self.zoom_step,
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            asset_prefix: self.asset_prefix.clone(),
            relay_endpoint: self.relay_endpoint.clone(),
            origin_host: self.origin_host.clone(),
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

const SETTINGS_HEADER: &str = "# doccompare settings
# relay_endpoint: relay used when a remote host refuses direct access.
#   Without it the public https://cors-anywhere.herokuapp.com relay is used.
# origin_host: host the viewers are served from; other hosts are probed first.
";

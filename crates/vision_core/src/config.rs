use anyhow::{Context, Result};
use fast_image_resize::{FilterType as FirFilterType, ResizeAlg};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_NAME: &str = "skin-scan.toml";
pub const CONFIG_ENV: &str = "SKIN_SCAN_CONFIG";

pub const DEFAULT_DETECTOR_INPUT: u32 = 320;
pub const DEFAULT_CLASSIFIER_INPUT: u32 = 224;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl ResizeMode {
    pub fn algorithm(self) -> ResizeAlg {
        match self {
            ResizeMode::Fast => ResizeAlg::Nearest,
            ResizeMode::Quality => ResizeAlg::Convolution(FirFilterType::CatmullRom),
            ResizeMode::Balanced => ResizeAlg::Convolution(FirFilterType::Bilinear),
        }
    }
}

/// Where each ONNX model lives. Every entry is optional; a missing path just
/// leaves that capability out of the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub object_detector: Option<PathBuf>,
    pub skin_classifier: Option<PathBuf>,
    pub feature_extractor: Option<PathBuf>,
    pub landmarks: Option<PathBuf>,
}

impl ModelPaths {
    pub fn under(root: &Path) -> Self {
        Self {
            object_detector: Some(root.join("object_detector.onnx")),
            skin_classifier: Some(root.join("skin_classifier.onnx")),
            feature_extractor: Some(root.join("feature_extractor.onnx")),
            landmarks: Some(root.join("yunet_n_640_640.onnx")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub device: DeviceMode,
    pub resize: ResizeMode,
    pub detector_input: u32,
    pub classifier_input: u32,
    pub models: ModelPaths,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device: DeviceMode::Cpu,
            resize: ResizeMode::Balanced,
            detector_input: DEFAULT_DETECTOR_INPUT,
            classifier_input: DEFAULT_CLASSIFIER_INPUT,
            models: ModelPaths::under(Path::new("./models")),
        }
    }
}

impl PipelineConfig {
    /// `$SKIN_SCAN_CONFIG`, then `./skin-scan.toml`, then defaults.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_NAME));
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        match Self::from_path(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(path = %path.display(), "invalid config, using defaults: {err:#}");
                Self::default()
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(raw)?;
        if cfg.detector_input == 0 || cfg.classifier_input == 0 {
            anyhow::bail!(
                "model input sizes must be > 0 (detector_input={}, classifier_input={})",
                cfg.detector_input,
                cfg.classifier_input
            );
        }
        Ok(cfg)
    }
}

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::crop::CropPolicy;

/// Default alpha above which a pixel counts toward a bounding box.
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 25;

/// How a mask is resampled onto the base image grid before compositing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskResample {
    #[default]
    Nearest,
    Bilinear,
}

impl MaskResample {
    pub fn filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Bilinear => image::imageops::FilterType::Triangle,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Alpha strictly above this value marks a pixel as present for bounding boxes.
    pub alpha_threshold: u8,
    /// Resampling used when a mask and its base differ in size.
    pub mask_resample: MaskResample,
    /// What to do with crop rectangles that leave the source surface.
    pub crop_policy: CropPolicy,
    /// Upper bound for fetching plus decoding a single image reference.
    #[serde(with = "humantime_serde")]
    pub decode_timeout: Duration,
    /// References whose payload exceeds this many bytes are refused.
    pub max_reference_bytes: usize,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.alpha_threshold < u8::MAX,
            "alpha-threshold must be below 255 or no pixel could ever count"
        );
        ensure!(
            self.decode_timeout > Duration::ZERO,
            "decode-timeout must be positive"
        );
        ensure!(
            self.max_reference_bytes > 0,
            "max-reference-bytes must be greater than zero"
        );
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            mask_resample: MaskResample::default(),
            crop_policy: CropPolicy::default(),
            decode_timeout: Duration::from_secs(30),
            max_reference_bytes: 64 * 1024 * 1024,
        }
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Capture configuration.
//!
//! Defaults match the sensor's native 1080p30 video mode with a neutral
//! image tuning. A config file only needs the keys it overrides; everything
//! else falls back to the defaults.

use crate::core::{
    ExposureControl, ImageFilter, MeteringMode, MirrorMode, RateControl, WhiteBalanceMode,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Failure to load or validate a configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    /// A value is outside the range the camera accepts.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "cannot read config: {}", err),
            ConfigError::Parse(err) => write!(f, "cannot parse config: {}", err),
            ConfigError::Invalid(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Image tuning and mode selection for the camera source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Physical device selected at driver load
    pub device_number: u32,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    /// -100 .. 100
    pub sharpness: i32,
    /// -100 .. 100
    pub contrast: i32,
    /// 0 .. 100
    pub brightness: u32,
    /// -100 .. 100
    pub saturation: i32,
    /// Ignored when `auto_shutter` is set
    pub shutter_speed_us: u32,
    pub auto_shutter: bool,
    /// 100 .. 800, ignored when `auto_iso` is set
    pub iso: u32,
    pub auto_iso: bool,
    pub exposure: ExposureControl,
    /// -10 .. 10
    pub ev_compensation: i32,
    pub metering: MeteringMode,
    pub mirror: MirrorMode,
    /// Multiple of 90, below 360
    pub rotation: u32,
    pub color_enhancement: bool,
    /// Fixed chroma when color enhancement is on; 128/128 is grayscale
    pub color_u: u8,
    pub color_v: u8,
    pub denoise: bool,
    pub stabilization: bool,
    pub white_balance: WhiteBalanceMode,
    /// 0.001 .. 7.999, honored only when white balance is off
    pub white_balance_red_gain: f32,
    pub white_balance_blue_gain: f32,
    pub filter: ImageFilter,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device_number: 0,
            width: 1920,
            height: 1080,
            framerate: 30,
            sharpness: 0,
            contrast: 0,
            brightness: 50,
            saturation: 0,
            shutter_speed_us: 125_000, // 1/8 s
            auto_shutter: false,
            iso: 100,
            auto_iso: true,
            exposure: ExposureControl::Auto,
            ev_compensation: 0,
            metering: MeteringMode::Average,
            mirror: MirrorMode::None,
            rotation: 0,
            color_enhancement: false,
            color_u: 128,
            color_v: 128,
            denoise: true,
            stabilization: false,
            white_balance: WhiteBalanceMode::Auto,
            white_balance_red_gain: 0.1,
            white_balance_blue_gain: 0.1,
            filter: ImageFilter::None,
        }
    }
}

/// H.264 encoder tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Target bitrate in bits per second
    pub bitrate_bps: u32,
    /// Frames between IDR frames; minimum 2
    pub idr_period: u32,
    pub rate_control: RateControl,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate_bps: 10_000_000,
            idr_period: 60,
            rate_control: RateControl::Variable,
        }
    }
}

/// Complete capture configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera: CameraSettings,
    pub encoder: EncoderSettings,
}

impl CaptureConfig {
    /// Load a JSON config file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: CaptureConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value against the range the camera accepts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(ConfigError::Invalid("frame size must be non-zero".into()));
        }
        if camera.framerate == 0 {
            return Err(ConfigError::Invalid("framerate must be non-zero".into()));
        }
        for (name, value) in [
            ("sharpness", camera.sharpness),
            ("contrast", camera.contrast),
            ("saturation", camera.saturation),
        ] {
            if !(-100..=100).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within -100..=100, got {}",
                    name, value
                )));
            }
        }
        if camera.brightness > 100 {
            return Err(ConfigError::Invalid(format!(
                "brightness must be within 0..=100, got {}",
                camera.brightness
            )));
        }
        if !camera.auto_iso && !(100..=800).contains(&camera.iso) {
            return Err(ConfigError::Invalid(format!(
                "iso must be within 100..=800, got {}",
                camera.iso
            )));
        }
        if !(-10..=10).contains(&camera.ev_compensation) {
            return Err(ConfigError::Invalid(format!(
                "ev compensation must be within -10..=10, got {}",
                camera.ev_compensation
            )));
        }
        if camera.rotation % 90 != 0 || camera.rotation >= 360 {
            return Err(ConfigError::Invalid(format!(
                "rotation must be 0, 90, 180 or 270, got {}",
                camera.rotation
            )));
        }
        for (name, gain) in [
            ("red gain", camera.white_balance_red_gain),
            ("blue gain", camera.white_balance_blue_gain),
        ] {
            if !(0.001..=7.999).contains(&gain) {
                return Err(ConfigError::Invalid(format!(
                    "white balance {} must be within 0.001..=7.999, got {}",
                    name, gain
                )));
            }
        }
        if self.encoder.bitrate_bps == 0 {
            return Err(ConfigError::Invalid("bitrate must be non-zero".into()));
        }
        if self.encoder.idr_period < 2 {
            return Err(ConfigError::Invalid(format!(
                "idr period must be at least 2, got {}",
                self.encoder.idr_period
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        CaptureConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"camera": {"width": 1280, "height": 720}}"#).unwrap();
        assert_eq!(config.camera.width, 1280);
        assert_eq!(config.camera.height, 720);
        assert_eq!(config.camera.framerate, 30);
        assert_eq!(config.encoder.bitrate_bps, 10_000_000);
    }

    #[test]
    fn out_of_range_brightness_is_rejected() {
        let mut config = CaptureConfig::default();
        config.camera.brightness = 101;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn short_idr_period_is_rejected() {
        let mut config = CaptureConfig::default();
        config.encoder.idr_period = 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn diagonal_rotation_is_rejected() {
        let mut config = CaptureConfig::default();
        config.camera.rotation = 45;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(_))
        ));
    }
}

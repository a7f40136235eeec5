use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferLayout;
use crate::channels::CHANNEL_NOT_VALID;
use crate::error::AllocationError;
use crate::format::{Direction, SampleFormat};

/// Period sizes, in frames, the DMA setup accepts.
pub const SUPPORTED_PERIOD_SIZES: [usize; 4] = [16, 32, 64, 128];

pub const DEFAULT_PERIOD_FRAMES: usize = 64;

/// Largest channel count per direction; index 255 is reserved on the wire.
pub const MAX_CHANNELS: usize = CHANNEL_NOT_VALID as usize - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("period of {0} frames is not supported (expected one of 16, 32, 64, 128)")]
    UnsupportedPeriod(usize),
    #[error("a session needs at least one input or output channel")]
    NoChannels,
    #[error("{channels} {direction} channels exceed the limit of {}", MAX_CHANNELS)]
    TooManyChannels {
        direction: Direction,
        channels: usize,
    },
    #[error("unknown hardware profile '{0}'")]
    UnknownProfile(String),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("malformed configuration: {0}")]
    Parse(String),
}

/// Stream parameters requested when opening a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    #[serde(default = "default_period_frames")]
    pub frames_per_period: usize,
    #[serde(default = "default_sample_format")]
    pub sample_format: SampleFormat,
}

fn default_period_frames() -> usize {
    DEFAULT_PERIOD_FRAMES
}

fn default_sample_format() -> SampleFormat {
    SampleFormat::Int24LeftJustified
}

impl SessionConfig {
    pub fn new(
        input_channels: usize,
        output_channels: usize,
        frames_per_period: usize,
        sample_format: SampleFormat,
    ) -> Self {
        Self {
            input_channels,
            output_channels,
            frames_per_period,
            sample_format,
        }
    }

    pub fn with_period(mut self, frames_per_period: usize) -> Self {
        self.frames_per_period = frames_per_period;
        self
    }

    pub fn channels(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_channels,
            Direction::Output => self.output_channels,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !SUPPORTED_PERIOD_SIZES.contains(&self.frames_per_period) {
            return Err(ConfigError::UnsupportedPeriod(self.frames_per_period));
        }
        if self.input_channels == 0 && self.output_channels == 0 {
            return Err(ConfigError::NoChannels);
        }
        for direction in [Direction::Input, Direction::Output] {
            let channels = self.channels(direction);
            if channels > MAX_CHANNELS {
                return Err(ConfigError::TooManyChannels {
                    direction,
                    channels,
                });
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> Result<BufferLayout, AllocationError> {
        BufferLayout::new(
            self.frames_per_period,
            self.input_channels,
            self.output_channels,
            self.sample_format,
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&data)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        HardwareProfile::ELK_PI.session_config()
    }
}

/// How the audio path is wired on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum PlatformType {
    /// Codec driven directly by the SoC.
    NativeAudio = 1,
    /// Audio routed through a microcontroller sharing the codec clock.
    SyncWithMicrocontroller = 2,
    /// Audio routed through a free-running microcontroller.
    AsyncWithMicrocontroller = 3,
}

impl PlatformType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Where USB audio, if any, is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum UsbAudioType {
    None = 1,
    NativeAlsa = 2,
    ExternalMicrocontroller = 3,
}

impl UsbAudioType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Channel layout and clocking of a supported audio board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HardwareProfile {
    pub name: &'static str,
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub platform_type: PlatformType,
    pub usb_audio_type: UsbAudioType,
    /// Codec configured for its low-latency filter mode.
    pub low_latency: bool,
}

impl HardwareProfile {
    pub const ELK_PI: HardwareProfile = HardwareProfile {
        name: "elk-pi",
        input_channels: 8,
        output_channels: 8,
        sample_format: SampleFormat::Int24LeftJustified,
        sample_rate: 48_000,
        platform_type: PlatformType::NativeAudio,
        usb_audio_type: UsbAudioType::None,
        low_latency: true,
    };

    pub const HIFI_BERRY: HardwareProfile = HardwareProfile {
        name: "hifi-berry",
        input_channels: 0,
        output_channels: 2,
        sample_format: SampleFormat::Int24I2s,
        sample_rate: 48_000,
        platform_type: PlatformType::NativeAudio,
        usb_audio_type: UsbAudioType::None,
        low_latency: true,
    };

    pub const HIFI_BERRY_PRO: HardwareProfile = HardwareProfile {
        name: "hifi-berry-pro",
        input_channels: 2,
        output_channels: 2,
        sample_format: SampleFormat::Int24I2s,
        sample_rate: 48_000,
        platform_type: PlatformType::NativeAudio,
        usb_audio_type: UsbAudioType::None,
        low_latency: true,
    };

    pub fn all() -> &'static [HardwareProfile] {
        &[
            HardwareProfile::ELK_PI,
            HardwareProfile::HIFI_BERRY,
            HardwareProfile::HIFI_BERRY_PRO,
        ]
    }

    pub fn by_name(name: &str) -> Result<HardwareProfile, ConfigError> {
        Self::all()
            .iter()
            .copied()
            .find(|profile| profile.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }

    /// Default stream parameters for this board.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            self.input_channels,
            self.output_channels,
            DEFAULT_PERIOD_FRAMES,
            self.sample_format,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_is_elk_pi_at_64_frames() {
        let config = SessionConfig::default();
        assert_eq!(config.input_channels, 8);
        assert_eq!(config.output_channels, 8);
        assert_eq!(config.frames_per_period, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unsupported_periods_and_empty_streams() {
        let config = SessionConfig::default().with_period(48);
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedPeriod(48)));

        let config = SessionConfig::new(0, 0, 64, SampleFormat::Int32);
        assert_eq!(config.validate(), Err(ConfigError::NoChannels));

        let config = SessionConfig::new(300, 2, 64, SampleFormat::Int32);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyChannels {
                direction: Direction::Input,
                ..
            })
        ));
    }

    #[test]
    fn json_fills_in_defaults() {
        let config = SessionConfig::from_json_str(r#"{"input_channels": 2, "output_channels": 6}"#)
            .unwrap();
        assert_eq!(config.frames_per_period, DEFAULT_PERIOD_FRAMES);
        assert_eq!(config.sample_format, SampleFormat::Int24LeftJustified);
        assert_eq!(config.output_channels, 6);
    }

    #[test]
    fn json_file_is_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input_channels": 2, "output_channels": 2, "frames_per_period": 100}}"#
        )
        .unwrap();
        assert_eq!(
            SessionConfig::from_json_file(file.path()),
            Err(ConfigError::UnsupportedPeriod(100))
        );

        let missing = SessionConfig::from_json_file("/nonexistent/rtpcm.json");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn profiles_resolve_by_name() {
        let profile = HardwareProfile::by_name("HiFi-Berry-Pro").unwrap();
        assert_eq!(profile, HardwareProfile::HIFI_BERRY_PRO);
        assert!(matches!(
            HardwareProfile::by_name("bogus"),
            Err(ConfigError::UnknownProfile(_))
        ));
        assert_eq!(HardwareProfile::HIFI_BERRY.session_config().input_channels, 0);
    }

    #[test]
    fn profiles_report_board_wiring() {
        for profile in HardwareProfile::all() {
            assert_eq!(profile.platform_type.tag(), 1);
            assert_eq!(profile.usb_audio_type.tag(), 1);
            assert!(profile.low_latency);
        }
        let json = serde_json::to_value(HardwareProfile::ELK_PI).unwrap();
        assert_eq!(json["platform_type"], "native-audio");
        assert_eq!(json["usb_audio_type"], "none");
    }
}

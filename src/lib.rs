pub mod capture;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod supervisor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use capture::frame::PixelFormat;
pub use error::StreamError;

/// Prefix for environment overrides, e.g. `SIMSTREAM__SOURCE__PORT=2001`
pub const ENV_PREFIX: &str = "SIMSTREAM";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub stream: StreamConfig,
    pub encoder: EncoderConfig,
    pub control: ControlConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Frame interval of the built-in synthetic source
    pub synthetic_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub fps: u32,
    /// Subtracted from the frame period to cover per-iteration overhead
    pub correction_us: u64,
    /// Sleep between startup-barrier polls
    pub barrier_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub program: String,
    pub log_level: String,
    pub bitrate: String,
    pub bufsize: String,
    pub output_dir: PathBuf,
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    pub autopilot: bool,
    pub tick_ms: u64,
    pub report_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: u32,
    /// A session that lived this long resets the backoff
    pub stable_after_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                host: "localhost".into(),
                port: 2000,
                timeout_ms: 10_000,
                width: 320,
                height: 240,
                format: PixelFormat::Bgra,
                synthetic_interval_ms: 20,
            },
            stream: StreamConfig {
                fps: 25,
                correction_us: 1_000,
                barrier_poll_ms: 5,
            },
            encoder: EncoderConfig {
                program: "ffmpeg".into(),
                log_level: "debug".into(),
                bitrate: "1000k".into(),
                bufsize: "5000k".into(),
                output_dir: PathBuf::from("output"),
                grace_period_ms: 5_000,
            },
            control: ControlConfig {
                autopilot: false,
                tick_ms: 10,
                report_interval_ms: 1_000,
            },
            supervisor: SupervisorConfig {
                initial_backoff_ms: 1_000,
                max_backoff_ms: 30_000,
                backoff_multiplier: 2,
                stable_after_ms: 60_000,
            },
        }
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `SIMSTREAM__*` env vars
    pub fn load(path: Option<&Path>) -> Result<Self, StreamError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize::<Config>()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.stream.fps == 0 {
            return Err(StreamError::InvalidConfig("stream.fps must be positive".into()));
        }
        if Duration::from_micros(self.stream.correction_us)
            >= Duration::from_secs(1) / self.stream.fps
        {
            return Err(StreamError::InvalidConfig(
                "stream.correction_us must be shorter than one frame period".into(),
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(StreamError::InvalidConfig(
                "source.width and source.height must be positive".into(),
            ));
        }
        if self.supervisor.backoff_multiplier == 0 {
            return Err(StreamError::InvalidConfig(
                "supervisor.backoff_multiplier must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn frame_len(&self) -> usize {
        capture::Frame::expected_len(self.source.width, self.source.height, self.source.format)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.encoder.grace_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stream_constants() {
        let config = Config::default();
        assert_eq!(config.stream.fps, 25);
        assert_eq!(config.frame_len(), 320 * 240 * 4);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_toml_overrides() {
        let path = std::env::temp_dir().join(format!("simstream-{}.toml", std::process::id()));
        std::fs::write(&path, "[stream]\nfps = 30\n\n[source]\ntimeout_ms = 2500\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.stream.fps, 30);
        assert_eq!(config.source.timeout_ms, 2500);
        // untouched keys keep their defaults
        assert_eq!(config.source.host, "localhost");
        assert_eq!(config.encoder.bitrate, "1000k");
    }

    #[test]
    fn zero_fps_is_rejected() {
        let mut config = Config::default();
        config.stream.fps = 0;
        assert!(matches!(config.validate(), Err(StreamError::InvalidConfig(_))));
    }

    #[test]
    fn correction_of_a_whole_period_is_rejected() {
        let mut config = Config::default();
        config.stream.fps = 1000;
        config.stream.correction_us = 1_000;
        assert!(matches!(config.validate(), Err(StreamError::InvalidConfig(_))));

        // just under one period still leaves time to sleep
        config.stream.correction_us = 999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_win_over_file() {
        let path =
            std::env::temp_dir().join(format!("simstream-env-{}.toml", std::process::id()));
        std::fs::write(&path, "[source]\nport = 2010\n").unwrap();

        // only this test reads source.port through `load`
        std::env::set_var("SIMSTREAM__SOURCE__PORT", "2020");
        let config = Config::load(Some(&path));
        std::env::remove_var("SIMSTREAM__SOURCE__PORT");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.unwrap().source.port, 2020);
    }
}

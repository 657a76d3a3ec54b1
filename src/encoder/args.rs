use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::capture::PixelFormat;
use crate::EncoderConfig;

/// Fixed argument vector for one encoder process.
///
/// Raw frames arrive back-to-back on stdin with no framing; geometry, pixel
/// format and rate are passed here instead.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderArgs {
    pub program: String,
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

impl EncoderArgs {
    pub fn ffmpeg(
        config: &EncoderConfig,
        width: u32,
        height: u32,
        format: PixelFormat,
        fps: u32,
        started: DateTime<Utc>,
    ) -> Self {
        let output_path = config.output_dir.join(format!(
            "carla_client-{}.mp4",
            started.format("%m%d%H%M%S")
        ));
        let rate = fps.to_string();
        let gop = (fps / 2).to_string();

        let args = [
            "-loglevel",
            config.log_level.as_str(),
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-s",
            format!("{}x{}", width, height).as_str(),
            "-pix_fmt",
            format.ffmpeg_name(),
            "-r",
            rate.as_str(),
            "-i",
            "-",
            "-vcodec",
            "libx264",
            "-an",
            "-crf",
            "23",
            "-preset",
            "fast",
            "-minrate",
            config.bitrate.as_str(),
            "-maxrate",
            config.bitrate.as_str(),
            "-b:v",
            config.bitrate.as_str(),
            "-bufsize",
            config.bufsize.as_str(),
            "-deinterlace",
            "-vf",
            format!("fps=fps={}", fps).as_str(),
            "-r",
            rate.as_str(),
            "-g",
            gop.as_str(),
            "-keyint_min",
            gop.as_str(),
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "faststart",
            "-f",
            "mp4",
        ]
        .iter()
        .map(|s| s.to_string())
        .chain(std::iter::once(output_path.display().to_string()))
        .collect();

        Self {
            program: config.program.clone(),
            args,
            output_path,
        }
    }

    /// Value following `flag`, first occurrence
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

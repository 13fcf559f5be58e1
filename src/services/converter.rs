use crate::config::CameraConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// GIF rendering parameters of one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionParams {
    /// Output width, height follows the aspect ratio
    pub scale: u32,
    pub skip_first_secs: Option<u32>,
    pub max_length_secs: Option<u32>,
    pub fps: u32,
}

impl ConversionParams {
    pub fn for_camera(camera: &CameraConfig, fps: u32) -> Self {
        Self {
            scale: camera.scale,
            skip_first_secs: camera.skip_first_secs,
            max_length_secs: camera.max_length_secs,
            fps,
        }
    }
}

/// Turns a raw recording into an animated image
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `input` into `<input stem>.gif` next to it.
    ///
    /// `input` is deleted whatever the outcome.
    async fn convert(&self, input: &Path, params: &ConversionParams) -> Result<PathBuf>;
}

/// Converter shelling out to ffmpeg; exit status 0 is success
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

fn ffmpeg_args(input: &Path, output: &Path, params: &ConversionParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-vf".into(),
        format!("fps={},scale={}:-1:flags=lanczos", params.fps, params.scale).into(),
    ];

    if let Some(skip) = params.skip_first_secs.filter(|secs| *secs > 0) {
        args.push("-ss".into());
        args.push(skip.to_string().into());
    }

    if let Some(max) = params.max_length_secs.filter(|secs| *secs > 0) {
        args.push("-t".into());
        args.push(max.to_string().into());
    }

    args.push("-y".into());
    args.push(output.into());
    args
}

#[async_trait]
impl Converter for FfmpegConverter {
    async fn convert(&self, input: &Path, params: &ConversionParams) -> Result<PathBuf> {
        let output = input.with_extension("gif");
        info!(
            "Converting {} to {} (scale {}, skip {:?}, max {:?})",
            input.display(),
            output.display(),
            params.scale,
            params.skip_first_secs,
            params.max_length_secs
        );

        let status = Command::new(&self.binary)
            .args(ffmpeg_args(input, &output, params))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await;

        if let Err(e) = tokio::fs::remove_file(input).await {
            warn!("Failed to remove recording {}: {}", input.display(), e);
        }

        match status {
            Ok(status) if status.success() => Ok(output),
            Ok(status) => Err(Error::Conversion(format!(
                "{} exited with {} for {}",
                self.binary.display(),
                status,
                input.display()
            ))),
            Err(e) => Err(Error::Conversion(format!(
                "Failed to run {}: {}",
                self.binary.display(),
                e
            ))),
        }
    }
}

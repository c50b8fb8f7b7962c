use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{info, warn};

use crate::source::Resolution;

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct RecordConfig {
    pub path: PathBuf,
    pub fps: u32,
    pub ffmpeg: String,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("demo1.avi"), fps: 30, ffmpeg: "ffmpeg".into() }
    }
}

/// Encodes annotated frames to an MJPEG AVI through ffmpeg.
pub struct Recorder {
    child: Child,
    stdin: Option<ChildStdin>,
    res: Resolution,
    path: PathBuf,
    frames: u64,
}

impl Recorder {
    pub fn start(cfg: &RecordConfig, res: Resolution) -> Result<Self> {
        Self::spawn(ffmpeg_command(cfg, res), res, &cfg.path)
    }

    fn spawn(mut cmd: Command, res: Resolution, path: &Path) -> Result<Self> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawn recorder")?;
        let stdin = child.stdin.take().context("recorder stdin not piped")?;
        info!("record: writing {} at {}", path.display(), res);
        Ok(Self { child, stdin: Some(stdin), res, path: path.to_path_buf(), frames: 0 })
    }

    pub async fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let stdin = self.stdin.as_mut().context("recorder already finished")?;
        if (frame.width(), frame.height()) == (self.res.w, self.res.h) {
            stdin.write_all(frame.as_raw()).await.context("write frame to recorder")?;
        } else {
            let scaled = image::imageops::resize(frame, self.res.w, self.res.h, FilterType::Triangle);
            stdin.write_all(scaled.as_raw()).await.context("write frame to recorder")?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Closes the pipe and waits for the encoder to flush the file.
    pub async fn finish(mut self) -> Result<u64> {
        drop(self.stdin.take());
        let status = self.child.wait().await.context("wait for recorder")?;
        if !status.success() {
            warn!("record: encoder exited with {}", status);
        }
        info!("record: {} frames written to {}", self.frames, self.path.display());
        Ok(self.frames)
    }
}

fn ffmpeg_command(cfg: &RecordConfig, res: Resolution) -> Command {
    let size = res.to_string();
    let fps = cfg.fps.max(1).to_string();
    let mut cmd = Command::new(&cfg.ffmpeg);
    cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-s", size.as_str(), "-r", fps.as_str(), "-i", "-"])
        .args(["-c:v", "mjpeg", "-q:v", "3"])
        .arg(&cfg.path);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_are_piped_at_recording_size() {
        let out = std::env::temp_dir().join(format!("signwatch-record-{}.raw", std::process::id()));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("cat > {}", out.display()));

        let res = Resolution { w: 4, h: 2 };
        let mut rec = Recorder::spawn(cmd, res, &out).unwrap();
        rec.write(&RgbImage::new(4, 2)).await.unwrap();
        rec.write(&RgbImage::new(8, 4)).await.unwrap();
        assert_eq!(rec.finish().await.unwrap(), 2);

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(bytes.len(), 2 * 4 * 2 * 3);
        let _ = std::fs::remove_file(&out);
    }
}

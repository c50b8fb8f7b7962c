use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
pub const VIDEO_EXTENSIONS: [&str; 5] = ["avi", "mov", "mp4", "mkv", "wmv"];

/// Largest accepted frame side, in pixels.
pub const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SourceError {
    #[error("file extension {0:?} is not supported")]
    UnsupportedExtension(String),
    #[error("invalid camera index in {0:?}")]
    BadIndex(String),
    #[error("input {0:?} is not a file, folder, usbN or picameraN")]
    Invalid(String),
    #[error("invalid resolution {0:?}: expected WxH, e.g. 640x480")]
    InvalidResolution(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub w: u32,
    pub h: u32,
}

impl Resolution {
    /// Both sides must be in `1..=MAX_DIMENSION`.
    pub fn new(w: u32, h: u32) -> Result<Self, SourceError> {
        if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(SourceError::InvalidResolution(format!("{}x{}", w, h)));
        }
        Ok(Self { w, h })
    }

    /// Bytes in one RGB24 frame.
    pub fn frame_len(&self) -> Option<usize> {
        (self.w as usize).checked_mul(self.h as usize)?.checked_mul(3)
    }
}

impl FromStr for Resolution {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SourceError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(bad)?;
        let w: u32 = w.parse().map_err(|_| bad())?;
        let h: u32 = h.parse().map_err(|_| bad())?;
        Self::new(w, h).map_err(|_| bad())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.w, self.h)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Image(PathBuf),
    Folder(PathBuf),
    Video(PathBuf),
    Usb(u32),
    Picamera(u32),
}

impl SourceKind {
    /// Interprets a `--source` string. Paths are checked on disk first.
    pub fn parse(s: &str) -> Result<Self, SourceError> {
        let p = Path::new(s);
        if p.is_dir() {
            return Ok(SourceKind::Folder(p.to_path_buf()));
        }
        if p.is_file() {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let lower = ext.to_ascii_lowercase();
            if IMAGE_EXTENSIONS.contains(&lower.as_str()) {
                return Ok(SourceKind::Image(p.to_path_buf()));
            }
            if VIDEO_EXTENSIONS.contains(&lower.as_str()) {
                return Ok(SourceKind::Video(p.to_path_buf()));
            }
            return Err(SourceError::UnsupportedExtension(format!(".{}", ext)));
        }
        if let Some(idx) = s.strip_prefix("usb") {
            return idx.parse().map(SourceKind::Usb).map_err(|_| SourceError::BadIndex(s.into()));
        }
        if let Some(idx) = s.strip_prefix("picamera") {
            return idx.parse().map(SourceKind::Picamera).map_err(|_| SourceError::BadIndex(s.into()));
        }
        Err(SourceError::Invalid(s.to_string()))
    }

    /// Video, USB and Pi camera sources deliver frames continuously.
    pub fn is_stream(&self) -> bool {
        !matches!(self, SourceKind::Image(_) | SourceKind::Folder(_))
    }

    pub fn supports_record(&self) -> bool {
        matches!(self, SourceKind::Video(_) | SourceKind::Usb(_))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Image(p) => write!(f, "image {}", p.display()),
            SourceKind::Folder(p) => write!(f, "folder {}", p.display()),
            SourceKind::Video(p) => write!(f, "video {}", p.display()),
            SourceKind::Usb(i) => write!(f, "usb camera {}", i),
            SourceKind::Picamera(i) => write!(f, "picamera {}", i),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub ffmpeg: String,
    pub libcamera: String,
    /// Used for streams when no resolution is requested.
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { ffmpeg: "ffmpeg".into(), libcamera: "libcamera-vid".into(), width: 640, height: 480 }
    }
}

/// Lists the images of a folder in name order.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        let ok = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if ok && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub enum FrameSource {
    Images { paths: Vec<PathBuf>, next: usize, resize: Option<Resolution> },
    Raw(RawStream),
}

/// Raw RGB24 frames read from a capture child process.
pub struct RawStream {
    child: Child,
    stdout: ChildStdout,
    res: Resolution,
    frame_len: usize,
    frames: u64,
}

impl FrameSource {
    pub fn open(kind: &SourceKind, resize: Option<Resolution>, cap: &CaptureConfig) -> Result<Self> {
        match kind {
            SourceKind::Image(p) => Ok(FrameSource::Images { paths: vec![p.clone()], next: 0, resize }),
            SourceKind::Folder(dir) => {
                let paths = list_images(dir)?;
                info!("source: {} images in {}", paths.len(), dir.display());
                Ok(FrameSource::Images { paths, next: 0, resize })
            }
            stream => {
                let res = match resize {
                    Some(r) => r,
                    None => Resolution::new(cap.width, cap.height).context("capture.width/height")?,
                };
                Ok(FrameSource::Raw(RawStream::spawn(capture_command(stream, res, cap), res)?))
            }
        }
    }

    /// `Ok(None)` means the source is exhausted or the stream ended.
    pub async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        match self {
            FrameSource::Images { paths, next, resize } => {
                let Some(path) = paths.get(*next) else { return Ok(None) };
                *next += 1;
                let bytes = tokio::fs::read(path).await.with_context(|| format!("read {}", path.display()))?;
                let img = image::load_from_memory(&bytes)
                    .with_context(|| format!("decode {}", path.display()))?
                    .to_rgb8();
                Ok(Some(match resize {
                    Some(r) if (img.width(), img.height()) != (r.w, r.h) => {
                        image::imageops::resize(&img, r.w, r.h, FilterType::Triangle)
                    }
                    _ => img,
                }))
            }
            FrameSource::Raw(s) => s.next_frame().await,
        }
    }

    pub async fn close(self) {
        if let FrameSource::Raw(s) = self {
            s.close().await;
        }
    }
}

fn capture_command(kind: &SourceKind, res: Resolution, cap: &CaptureConfig) -> Command {
    let scale = format!("scale={}:{}", res.w, res.h);
    let size = res.to_string();
    match kind {
        SourceKind::Usb(idx) => {
            let mut cmd = Command::new(&cap.ffmpeg);
            cmd.args(["-hide_banner", "-loglevel", "error", "-f", "video4linux2", "-video_size", size.as_str()])
                .arg("-i")
                .arg(format!("/dev/video{}", idx))
                .args(["-vf", scale.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
            cmd
        }
        SourceKind::Picamera(idx) => {
            // libcamera only emits YUV/MJPEG; ffmpeg converts to rgb24
            let pipeline = format!(
                "{lc} -n -t 0 --camera {idx} --width {w} --height {h} --codec mjpeg -o - | \
                 {ff} -hide_banner -loglevel error -f mjpeg -i - -vf {scale} -f rawvideo -pix_fmt rgb24 -",
                lc = cap.libcamera,
                ff = cap.ffmpeg,
                w = res.w,
                h = res.h,
            );
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(pipeline);
            cmd
        }
        SourceKind::Video(path) | SourceKind::Image(path) | SourceKind::Folder(path) => {
            let mut cmd = Command::new(&cap.ffmpeg);
            cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
                .arg(path)
                .args(["-vf", scale.as_str(), "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
            cmd
        }
    }
}

impl RawStream {
    pub fn spawn(mut cmd: Command, res: Resolution) -> Result<Self> {
        let frame_len = res.frame_len().with_context(|| format!("frame size {} too large", res))?;
        debug!("source: spawning {:?}", cmd.as_std());
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn capture process")?;
        let stdout = child.stdout.take().context("capture stdout not piped")?;
        Ok(Self { child, stdout, res, frame_len, frames: 0 })
    }

    pub fn resolution(&self) -> Resolution { self.res }

    pub async fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("source: stream ended after {} frames", self.frames);
                return Ok(None);
            }
            Err(e) => return Err(e).context("read frame"),
        }
        self.frames += 1;
        let img = RgbImage::from_raw(self.res.w, self.res.h, buf).context("frame buffer size")?;
        Ok(Some(img))
    }

    pub async fn close(mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("source: failed to stop capture process: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmpdir(name: &str) -> PathBuf {
        let d = std::env::temp_dir().join(format!("signwatch-source-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        d
    }

    #[test]
    fn resolution_parsing() {
        assert_eq!("640x480".parse::<Resolution>(), Ok(Resolution { w: 640, h: 480 }));
        assert_eq!("1280X720".parse::<Resolution>(), Ok(Resolution { w: 1280, h: 720 }));
        for bad in ["640", "640x", "x480", "0x480", "axb", "640x480x2"] {
            assert!(bad.parse::<Resolution>().is_err(), "{bad}");
        }
    }

    #[test]
    fn oversized_resolution_is_rejected() {
        assert_eq!(
            "40000x40000".parse::<Resolution>(),
            Err(SourceError::InvalidResolution("40000x40000".into()))
        );
        assert!("8192x8193".parse::<Resolution>().is_err());
        assert!(Resolution::new(0, 480).is_err());

        let max = Resolution::new(MAX_DIMENSION, MAX_DIMENSION).unwrap();
        assert_eq!(max.frame_len(), Some(8192 * 8192 * 3));
    }

    #[test]
    fn capture_size_from_config_is_checked() {
        let cap = CaptureConfig { width: 40000, height: 40000, ..Default::default() };
        assert!(FrameSource::open(&SourceKind::Usb(0), None, &cap).is_err());
    }

    #[test]
    fn camera_strings() {
        assert_eq!(SourceKind::parse("usb0"), Ok(SourceKind::Usb(0)));
        assert_eq!(SourceKind::parse("picamera1"), Ok(SourceKind::Picamera(1)));
        assert_eq!(SourceKind::parse("usbX"), Err(SourceError::BadIndex("usbX".into())));
        assert!(matches!(SourceKind::parse("rtsp://cam"), Err(SourceError::Invalid(_))));
        assert!(SourceKind::Usb(0).supports_record());
        assert!(!SourceKind::Picamera(0).supports_record());
    }

    #[test]
    fn files_classified_by_extension() {
        let d = tmpdir("ext");
        for f in ["a.JPG", "b.mp4", "c.txt"] {
            std::fs::write(d.join(f), b"x").unwrap();
        }
        assert!(matches!(SourceKind::parse(d.join("a.JPG").to_str().unwrap()), Ok(SourceKind::Image(_))));
        assert!(matches!(SourceKind::parse(d.join("b.mp4").to_str().unwrap()), Ok(SourceKind::Video(_))));
        assert_eq!(
            SourceKind::parse(d.join("c.txt").to_str().unwrap()),
            Err(SourceError::UnsupportedExtension(".txt".into()))
        );
        assert!(matches!(SourceKind::parse(d.to_str().unwrap()), Ok(SourceKind::Folder(_))));
        let _ = std::fs::remove_dir_all(&d);
    }

    #[tokio::test]
    async fn folder_yields_sorted_images_then_ends() {
        let d = tmpdir("folder");
        RgbImage::new(4, 2).save(d.join("b.png")).unwrap();
        RgbImage::new(8, 4).save(d.join("a.png")).unwrap();
        std::fs::write(d.join("notes.txt"), b"skip").unwrap();

        let kind = SourceKind::parse(d.to_str().unwrap()).unwrap();
        let mut src = FrameSource::open(&kind, None, &CaptureConfig::default()).unwrap();
        assert_eq!(src.next_frame().await.unwrap().unwrap().width(), 8);
        assert_eq!(src.next_frame().await.unwrap().unwrap().width(), 4);
        assert!(src.next_frame().await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&d);
    }

    #[tokio::test]
    async fn image_resized_to_requested_resolution() {
        let d = tmpdir("resize");
        let p = d.join("one.png");
        RgbImage::new(10, 10).save(&p).unwrap();
        let mut src = FrameSource::open(
            &SourceKind::Image(p),
            Some(Resolution { w: 32, h: 16 }),
            &CaptureConfig::default(),
        )
        .unwrap();
        let f = src.next_frame().await.unwrap().unwrap();
        assert_eq!((f.width(), f.height()), (32, 16));
        let _ = std::fs::remove_dir_all(&d);
    }

    #[tokio::test]
    async fn raw_stream_reads_whole_frames_until_eof() {
        // 2x1 frames, 6 bytes each; the trailing partial frame is discarded
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 'abcdefghijklmn'");
        let mut s = RawStream::spawn(cmd, Resolution { w: 2, h: 1 }).unwrap();
        assert_eq!(s.next_frame().await.unwrap().unwrap().as_raw(), b"abcdef");
        assert_eq!(s.next_frame().await.unwrap().unwrap().as_raw(), b"ghijkl");
        assert!(s.next_frame().await.unwrap().is_none());
        s.close().await;
    }
}

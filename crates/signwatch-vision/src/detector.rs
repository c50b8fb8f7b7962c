use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{nms_filter, postprocess_ultralytics, Detection, Detector, VisionConfig};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: String, // "script" | "command"
    pub script: Option<PathBuf>,
    pub program: Option<String>,
    pub args: Vec<String>,
    pub output_layout: String, // "detections" | "ultralytics"
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "script".into(),
            script: None,
            program: None,
            args: Vec::new(),
            output_layout: "detections".into(),
        }
    }
}

pub fn detector_from_config(cfg: &DetectorConfig, vision: &VisionConfig) -> Result<Box<dyn Detector>> {
    match cfg.backend.as_str() {
        "script" => {
            let path = cfg.script.as_ref().context("detector.script missing (backend=script)")?;
            Ok(Box::new(ScriptedDetector::load(path)?))
        }
        "command" => {
            let program = cfg.program.clone().context("detector.program missing (backend=command)")?;
            Ok(Box::new(CommandDetector::new(program, cfg.args.clone(), &cfg.output_layout, vision)?))
        }
        other => anyhow::bail!("unknown detector.backend: {}", other),
    }
}

#[derive(Debug, Deserialize)]
struct ScriptLine {
    frame: u64,
    detections: Vec<Detection>,
}

/// Replays detections recorded per frame index, one JSON object per line:
/// `{"frame": 3, "detections": [{"label": "stop", "conf": 0.9, "bbox": [..]}]}`.
/// Frames without a line produce no detections.
pub struct ScriptedDetector {
    frames: HashMap<u64, Vec<Detection>>,
    next: u64,
}

impl ScriptedDetector {
    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read detector script {}", path.display()))?;
        let det = Self::parse(&s)?;
        info!("vision: loaded detector script {} ({} frames)", path.display(), det.frames.len());
        Ok(det)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut frames: HashMap<u64, Vec<Detection>> = HashMap::new();
        for (n, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') { continue; }
            let l: ScriptLine = serde_json::from_str(line).with_context(|| format!("script line {}", n + 1))?;
            frames.entry(l.frame).or_default().extend(l.detections);
        }
        Ok(Self { frames, next: 0 })
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        let idx = self.next;
        self.next += 1;
        Ok(self.frames.get(&idx).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputLayout {
    Detections,
    Ultralytics,
}

#[derive(Debug, Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// Runs an external detector per frame: PNG on stdin, JSON on stdout.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    layout: OutputLayout,
    vision: VisionConfig,
}

impl CommandDetector {
    pub fn new(program: String, args: Vec<String>, layout: &str, vision: &VisionConfig) -> Result<Self> {
        let layout = match layout {
            "detections" => OutputLayout::Detections,
            "ultralytics" => {
                anyhow::ensure!(!vision.class_names.is_empty(), "vision.class_names required for ultralytics output");
                OutputLayout::Ultralytics
            }
            other => anyhow::bail!("unsupported detector.output_layout: {}", other),
        };
        Ok(Self { program, args, layout, vision: vision.clone() })
    }

    fn decode(&self, stdout: &[u8], w: u32, h: u32) -> Result<Vec<Detection>> {
        match self.layout {
            OutputLayout::Detections => serde_json::from_slice(stdout).context("parse detector json"),
            OutputLayout::Ultralytics => {
                let t: RawTensor = serde_json::from_slice(stdout).context("parse tensor json")?;
                let (num_preds, stride) = match t.shape.as_slice() {
                    [1, n, s] => (*n, *s),
                    [n, s] => (*n, *s),
                    other => anyhow::bail!("unexpected output dims {:?}", other),
                };
                let expected = 5 + self.vision.class_names.len();
                anyhow::ensure!(stride == expected, "stride mismatch: got {}, expected {}", stride, expected);
                let dets = postprocess_ultralytics(
                    &t.data,
                    num_preds,
                    &self.vision.class_names,
                    self.vision.conf_threshold,
                    w,
                    h,
                );
                Ok(nms_filter(dets, self.vision.nms_iou_threshold, self.vision.max_detections))
            }
        }
    }
}

impl Detector for CommandDetector {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let mut png = Vec::new();
        frame.write_to(&mut Cursor::new(&mut png), ImageFormat::Png).context("encode frame")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("run detector {}", self.program))?;
        {
            let mut stdin = child.stdin.take().context("detector stdin not piped")?;
            stdin.write_all(&png).context("write frame to detector")?;
        }
        let out = child.wait_with_output().context("wait for detector")?;
        anyhow::ensure!(out.status.success(), "detector {} exited with {}", self.program, out.status);

        let dets = self.decode(&out.stdout, frame.width(), frame.height())?;
        debug!("vision: detector returned {} boxes", dets.len());
        Ok(dets)
    }
}

/// A frame handed back together with the detections computed for it.
pub type DetectOutput = (RgbImage, Result<Vec<Detection>>);

/// Runs a [`Detector`] on the blocking pool, one frame at a time, so the
/// caller's event loop keeps polling while a model or child process works.
pub struct DetectorWorker {
    frames: mpsc::Sender<RgbImage>,
    results: mpsc::Receiver<DetectOutput>,
    task: JoinHandle<()>,
    busy: bool,
}

impl DetectorWorker {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(mut detector: Box<dyn Detector>) -> Self {
        let (frames, mut frame_rx) = mpsc::channel::<RgbImage>(1);
        let (out_tx, results) = mpsc::channel::<DetectOutput>(1);
        let task = tokio::task::spawn_blocking(move || {
            while let Some(frame) = frame_rx.blocking_recv() {
                let dets = detector.detect(&frame);
                if out_tx.blocking_send((frame, dets)).is_err() {
                    break;
                }
            }
            debug!("vision: detector worker stopped");
        });
        Self { frames, results, task, busy: false }
    }

    /// True while a submitted frame has not been collected yet.
    pub fn is_busy(&self) -> bool { self.busy }

    pub fn submit(&mut self, frame: RgbImage) -> Result<()> {
        anyhow::ensure!(!self.busy, "detector already has a frame in flight");
        self.frames.try_send(frame).map_err(|_| anyhow::anyhow!("detector worker stopped"))?;
        self.busy = true;
        Ok(())
    }

    /// Waits for the in-flight frame. `None` if nothing was submitted or the
    /// worker is gone.
    pub async fn next_result(&mut self) -> Option<DetectOutput> {
        if !self.busy {
            return None;
        }
        let out = self.results.recv().await;
        self.busy = false;
        out
    }

    /// Stops accepting frames and waits for the current one to finish.
    pub async fn shutdown(self) {
        let Self { frames, results, task, .. } = self;
        drop(frames);
        drop(results);
        if let Err(e) = task.await {
            warn!("vision: detector worker join failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_replays_by_frame_index() {
        let mut d = ScriptedDetector::parse(
            r#"
            # frame 0 empty
            {"frame": 1, "detections": [{"label": "stop", "conf": 0.9, "bbox": [0, 0, 10, 10]}]}
            {"frame": 1, "detections": [{"label": "yield", "conf": 0.6, "bbox": [5, 5, 9, 9]}]}
            "#,
        )
        .unwrap();
        let frame = RgbImage::new(4, 4);
        assert!(d.detect(&frame).unwrap().is_empty());
        let labels: Vec<_> = d.detect(&frame).unwrap().into_iter().map(|d| d.label).collect();
        assert_eq!(labels, vec!["stop", "yield"]);
        assert!(d.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn bad_script_line_reports_position() {
        let err = ScriptedDetector::parse("{\"frame\": 0}\n").err().unwrap();
        assert!(format!("{:#}", err).contains("script line 1"));
    }

    #[test]
    fn command_detector_reads_json_from_stdout() {
        let json = r#"[{"label":"caution accident area","class_id":2,"conf":0.77,"bbox":[1,1,3,3]}]"#;
        let mut d = CommandDetector::new(
            "sh".into(),
            vec!["-c".into(), format!("cat >/dev/null; echo '{}'", json)],
            "detections",
            &VisionConfig::default(),
        )
        .unwrap();
        let dets = d.detect(&RgbImage::new(8, 8)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "caution accident area");
        assert_eq!(dets[0].class_id, 2);
    }

    #[test]
    fn ultralytics_output_goes_through_nms() {
        let vision = VisionConfig { class_names: vec!["stop".into()], ..Default::default() };
        let d = CommandDetector::new("true".into(), vec![], "ultralytics", &vision).unwrap();
        let out = br#"{"shape":[1,3,6],"data":[
            0.5,0.5,0.2,0.2,0.9,0.9,
            0.51,0.5,0.2,0.2,0.9,0.8,
            0.1,0.1,0.2,0.2,0.3,0.9]}"#;
        let dets = d.decode(out, 100, 100).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].conf - 0.81).abs() < 1e-5);

        let bad = br#"{"shape":[1,3,7],"data":[]}"#;
        assert!(d.decode(bad, 100, 100).is_err());
    }

    struct Slow {
        gate: std::sync::mpsc::Receiver<()>,
    }

    impl Detector for Slow {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
            let _ = self.gate.recv();
            anyhow::ensure!(frame.width() > 1, "frame too small");
            Ok(vec![Detection { label: "stop".into(), class_id: 0, conf: 0.9, bbox: [0.0, 0.0, 1.0, 1.0].into() }])
        }
    }

    #[tokio::test]
    async fn worker_detects_off_the_async_loop() {
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let mut w = DetectorWorker::spawn(Box::new(Slow { gate: gate_rx }));

        w.submit(RgbImage::new(4, 4)).unwrap();
        assert!(w.is_busy());
        assert!(w.submit(RgbImage::new(4, 4)).is_err());

        // the detector is parked; the runtime still runs other work
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), w.next_result()).await;
        assert!(waited.is_err());
        assert!(w.is_busy());

        gate_tx.send(()).unwrap();
        let (frame, dets) = w.next_result().await.unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(dets.unwrap()[0].label, "stop");
        assert!(!w.is_busy());

        gate_tx.send(()).unwrap();
        w.submit(RgbImage::new(1, 1)).unwrap();
        let (_, dets) = w.next_result().await.unwrap();
        assert!(dets.is_err());

        assert!(w.next_result().await.is_none());
        drop(gate_tx);
        w.shutdown().await;
    }

    #[test]
    fn config_requires_backend_inputs() {
        let vision = VisionConfig::default();
        assert!(detector_from_config(&DetectorConfig::default(), &vision).is_err());
        let cfg = DetectorConfig { backend: "command".into(), output_layout: "yolo".into(), program: Some("x".into()), ..Default::default() };
        assert!(detector_from_config(&cfg, &vision).is_err());
        assert!(CommandDetector::new("x".into(), vec![], "ultralytics", &vision).is_err());
    }
}

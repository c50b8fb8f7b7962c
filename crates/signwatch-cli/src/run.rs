use anyhow::Result;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};

use signwatch_notify::{Scheduler, SchedulerEvent};
use signwatch_speech::{SpeechDispatcher, SpeechStats, Speaker};
use signwatch_vision::annotate::{annotate, LabelFont};
use signwatch_vision::detector::{detector_from_config, DetectorWorker};
use signwatch_vision::record::Recorder;
use signwatch_vision::region::crop_region;
use signwatch_vision::source::{FrameSource, Resolution, SourceKind};
use signwatch_vision::{filter_confident, Detection, Detector};

use crate::controls::{self, Control};
use crate::hud::Hud;
use crate::Config;

/// Cropped sign thumbnail; `None` when the region could not be cut out.
pub type SignImage = Option<Arc<RgbImage>>;

// sleep target when nothing is pending
const IDLE_WAIT: Duration = Duration::from_secs(3600);

pub async fn run(cfg: &Config, source: &str, res: Option<Resolution>, record: bool) -> Result<()> {
    let kind = SourceKind::parse(source)?;
    if record {
        crate::check_record(&kind, res)?;
    }
    info!("run: starting on {}", kind);

    let detector = detector_from_config(&cfg.detector, &cfg.vision)?;
    let speaker: Arc<dyn Speaker> = Arc::from(signwatch_speech::speaker_from_config(&cfg.speech)?);

    let mut source = FrameSource::open(&kind, res, &cfg.capture)?;
    let recorder = match (record, res) {
        (true, Some(r)) => Some(Recorder::start(&cfg.record, r)?),
        _ => None,
    };

    let (ctl_tx, ctl_rx) = mpsc::channel::<Control>(16);
    let stdin_task = controls::spawn_stdin_reader(ctl_tx);

    let mut pipeline = Pipeline::new(cfg, detector, speaker, recorder);
    if cfg.run.show_settings {
        pipeline.hud.print_settings(pipeline.scheduler.config());
    }

    let outcome = pipeline.event_loop(&mut source, kind.is_stream(), ctl_rx).await;

    stdin_task.abort();
    source.close().await;
    let stats = pipeline.shutdown().await;
    info!("run: done (spoken={} failed={} dropped={})", stats.spoken, stats.failed, stats.dropped);
    outcome
}

struct Pipeline<'a> {
    cfg: &'a Config,
    detect: DetectorWorker,
    scheduler: Scheduler<SignImage>,
    speech: SpeechDispatcher,
    hud: Hud,
    font: Option<LabelFont>,
    recorder: Option<Recorder>,
    start: Instant,
}

impl<'a> Pipeline<'a> {
    /// Must be called from inside a tokio runtime.
    fn new(
        cfg: &'a Config,
        detector: Box<dyn Detector>,
        speaker: Arc<dyn Speaker>,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            cfg,
            detect: DetectorWorker::spawn(detector),
            scheduler: Scheduler::new(cfg.notify.clone()),
            speech: SpeechDispatcher::spawn(speaker, cfg.speech.queue_depth),
            hud: Hud::new(cfg.run.show_settings),
            font: LabelFont::discover(cfg.vision.label_font.as_deref()),
            recorder,
            start: Instant::now(),
        }
    }

    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Instant to wake at for the scheduler's next deadline.
    fn wake_at(&self) -> Instant {
        self.scheduler
            .next_deadline()
            .and_then(|t| Duration::try_from_secs_f64(t.max(0.0)).ok())
            .and_then(|d| self.start.checked_add(d))
            .unwrap_or_else(|| Instant::now() + IDLE_WAIT)
    }

    async fn event_loop(
        &mut self,
        source: &mut FrameSource,
        streaming: bool,
        mut ctl_rx: mpsc::Receiver<Control>,
    ) -> Result<()> {
        let mut frames = tokio::time::interval(Duration::from_millis(self.cfg.run.frame_interval_ms));
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut controls_open = true;
        let mut paused = false;
        // still images advance on demand, or on every tick once stdin is gone
        let mut want_frame = true;

        loop {
            let wake = self.wake_at();
            let detecting = self.detect.is_busy();
            let advance = !paused && !detecting && (streaming || want_frame || !controls_open);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("run: interrupted");
                    break;
                }
                cmd = ctl_rx.recv(), if controls_open => match cmd {
                    Some(Control::Quit) => break,
                    Some(Control::Pause) => {
                        paused = !paused;
                        info!("run: {}", if paused { "paused" } else { "resumed" });
                    }
                    Some(Control::Next) => want_frame = true,
                    Some(c) => self.apply_control(c),
                    None => controls_open = false,
                },
                _ = tokio::time::sleep_until(wake) => {}
                out = self.detect.next_result(), if detecting => match out {
                    Some((frame, dets)) => self.process_frame(frame, dets).await,
                    None => {
                        warn!("run: detector worker stopped");
                        break;
                    }
                },
                _ = frames.tick(), if advance => {
                    match source.next_frame().await {
                        Ok(Some(frame)) => {
                            if let Err(e) = self.detect.submit(frame) {
                                warn!("run: {:#}", e);
                                break;
                            }
                        }
                        Ok(None) => {
                            info!("run: source exhausted");
                            break;
                        }
                        Err(e) => {
                            warn!("run: unable to read frame: {:#}", e);
                            break;
                        }
                    }
                    want_frame = false;
                }
            }

            let now = self.now();
            self.scheduler.tick(now);
            self.flush_events();
        }
        Ok(())
    }

    fn apply_control(&mut self, c: Control) {
        let s = &mut self.scheduler;
        match c {
            Control::ToggleNotifications => s.toggle_notifications(),
            Control::ToggleAudio => {
                s.toggle_audio();
                if !s.config().audio {
                    self.speech.clear();
                }
            }
            Control::ToggleReminders => s.toggle_reminders(),
            Control::CycleInterval => s.cycle_reminder_interval(),
            Control::SetInterval(iv) => s.set_reminder_interval(iv),
            Control::ToggleSettings => {
                self.hud.toggle_settings(self.scheduler.config());
                return;
            }
            Control::Capture => {
                if let Err(e) = self.hud.save_capture(&self.cfg.run.capture_dir) {
                    warn!("run: capture failed: {:#}", e);
                }
                return;
            }
            Control::Pause | Control::Quit | Control::Next => return,
        }
        self.hud.refresh(self.scheduler.config());
        self.flush_events();
    }

    async fn process_frame(&mut self, mut frame: RgbImage, dets: Result<Vec<Detection>>) {
        let dets = match dets {
            Ok(d) => d,
            Err(e) => {
                warn!("run: detection failed: {:#}", e);
                Vec::new()
            }
        };
        let dets = filter_confident(dets, self.cfg.vision.conf_threshold);
        let now = self.now();

        for d in &dets {
            info!("run: detected {} ({}%)", d.label, (d.conf * 100.0) as u32);
            let thumb = match crop_region(&frame, &d.bbox, self.cfg.vision.thumbnail_height) {
                Ok(t) => Some(Arc::new(t)),
                Err(e) => {
                    warn!("run: no thumbnail for {}: {}", d.label, e);
                    None
                }
            };
            self.scheduler.on_detection(&d.label, d.conf, thumb, now);
        }
        self.flush_events();

        annotate(&mut frame, &dets, self.font.as_ref());
        if let Some(rec) = self.recorder.as_mut() {
            if let Err(e) = rec.write(&frame).await {
                warn!("run: recording stopped: {:#}", e);
                self.recorder = None;
            }
        }
        self.hud.set_frame(frame);
    }

    fn flush_events(&mut self) {
        for ev in self.scheduler.drain_events() {
            if let SchedulerEvent::Speak { label } = &ev {
                self.speech.say(label);
            }
            self.hud.on_event(&ev);
        }
    }

    /// Finishes the recording and waits for the detector and speech workers.
    async fn shutdown(self) -> SpeechStats {
        let Pipeline { detect, speech, recorder, .. } = self;
        if let Some(rec) = recorder {
            if let Err(e) = rec.finish().await {
                warn!("run: recorder did not finish cleanly: {:#}", e);
            }
        }
        detect.shutdown().await;
        speech.shutdown().await
    }
}

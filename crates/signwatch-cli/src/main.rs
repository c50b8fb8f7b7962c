mod controls;
mod hud;
mod run;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use signwatch_notify::{NotifyConfig, ReminderInterval};
use signwatch_speech::SpeechConfig;
use signwatch_vision::detector::DetectorConfig;
use signwatch_vision::record::RecordConfig;
use signwatch_vision::source::{list_images, CaptureConfig, Resolution, SourceKind};
use signwatch_vision::VisionConfig;

#[derive(Debug, Parser)]
#[command(name = "signwatch", version, about = "signwatch - spoken traffic sign alerts and reminders")]
struct Cli {
    /// Optional TOML config; every field has a default.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run detection on a source and announce signs.
    Run(RunArgs),
    /// Validate configuration and external tools.
    Doctor,
    /// Show how a --source string is interpreted.
    Sources { source: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool { self == Switch::On }
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Image file, image folder, video file, usbN or picameraN.
    #[arg(long)]
    source: String,

    /// Minimum confidence for a detection to count.
    #[arg(long)]
    thresh: Option<f32>,

    /// Display/processing resolution, WxH.
    #[arg(long)]
    resolution: Option<String>,

    /// Record annotated video (video and usb sources, needs --resolution).
    #[arg(long)]
    record: bool,

    #[arg(long, value_enum)]
    notification: Option<Switch>,

    #[arg(long, value_enum)]
    audio: Option<Switch>,

    #[arg(long, value_enum)]
    reminder: Option<Switch>,

    /// Seconds before a reminder is shown: 15 or 30.
    #[arg(long = "reminder-duration", value_parser = parse_interval)]
    reminder_duration: Option<ReminderInterval>,

    /// JSON-lines detection script (detector backend "script").
    #[arg(long, conflicts_with = "detector_cmd")]
    detector_script: Option<PathBuf>,

    /// External detector program (detector backend "command").
    #[arg(long)]
    detector_cmd: Option<String>,
}

fn parse_interval(s: &str) -> Result<ReminderInterval, String> {
    s.parse().map_err(|e: signwatch_notify::ConfigError| e.to_string())
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    notify: NotifyConfig,
    vision: VisionConfig,
    detector: DetectorConfig,
    speech: SpeechConfig,
    capture: CaptureConfig,
    record: RecordConfig,
    run: RunCfg,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
struct RunCfg {
    frame_interval_ms: u64,
    show_settings: bool,
    capture_dir: PathBuf,
}

impl Default for RunCfg {
    fn default() -> Self {
        Self { frame_interval_ms: 30, show_settings: true, capture_dir: PathBuf::from(".") }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

/// Folds command-line flags into the file config and returns the requested
/// resolution, if any.
fn apply_overrides(cfg: &mut Config, args: &RunArgs) -> Result<Option<Resolution>> {
    if let Some(t) = args.thresh { cfg.vision.conf_threshold = t; }
    if let Some(s) = args.notification { cfg.notify.notifications = s.enabled(); }
    if let Some(s) = args.audio { cfg.notify.audio = s.enabled(); }
    if let Some(s) = args.reminder { cfg.notify.reminders = s.enabled(); }
    if let Some(iv) = args.reminder_duration { cfg.notify.reminder_interval = iv; }
    if let Some(p) = &args.detector_script {
        cfg.detector.backend = "script".into();
        cfg.detector.script = Some(p.clone());
    }
    if let Some(p) = &args.detector_cmd {
        cfg.detector.backend = "command".into();
        cfg.detector.program = Some(p.clone());
    }

    let res = match &args.resolution {
        Some(s) => Some(s.parse::<Resolution>()?),
        None => None,
    };
    validate(cfg)?;
    Ok(res)
}

fn validate(cfg: &Config) -> Result<()> {
    cfg.notify.validate()?;
    let t = cfg.vision.conf_threshold;
    anyhow::ensure!(t > 0.0 && t <= 1.0, "vision.conf_threshold must be in (0, 1], got {}", t);
    anyhow::ensure!(cfg.vision.thumbnail_height > 0, "vision.thumbnail_height must be > 0");
    anyhow::ensure!(cfg.run.frame_interval_ms > 0, "run.frame_interval_ms must be > 0");
    anyhow::ensure!(cfg.record.fps > 0, "record.fps must be > 0");
    Resolution::new(cfg.capture.width, cfg.capture.height).context("capture.width/height")?;
    Ok(())
}

fn check_record(kind: &SourceKind, res: Option<Resolution>) -> Result<()> {
    anyhow::ensure!(kind.supports_record(), "recording only works for video and usb camera sources");
    anyhow::ensure!(res.is_some(), "--record needs --resolution to record at");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Command::Run(args) => {
            let res = apply_overrides(&mut cfg, &args)?;
            run::run(&cfg, &args.source, res, args.record).await?
        }
        Command::Doctor => doctor(&cfg).await?,
        Command::Sources { source } => sources(&cfg, &source)?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    validate(cfg)?;

    match cfg.detector.backend.as_str() {
        "script" => {
            if let Some(p) = &cfg.detector.script {
                anyhow::ensure!(p.is_file(), "detector.script {} not found", p.display());
            } else {
                warn!("doctor: detector.script not set; pass --detector-script to `run`");
            }
        }
        "command" => {
            anyhow::ensure!(
                cfg.detector.program.as_ref().map(|s| !s.is_empty()).unwrap_or(false),
                "detector.program missing"
            );
        }
        other => anyhow::bail!("unknown detector.backend: {}", other),
    }

    signwatch_speech::speaker_from_config(&cfg.speech)?;
    if cfg.speech.backend == "command" && !tool_available(&cfg.speech.program, "--version").await {
        warn!("doctor: {} not runnable; audio announcements will fail", cfg.speech.program);
    }
    if !tool_available(&cfg.capture.ffmpeg, "-version").await {
        warn!("doctor: {} not runnable; video and camera sources unavailable", cfg.capture.ffmpeg);
    }

    info!(
        "doctor: important signs: {}",
        cfg.notify.important_signs.join(", ")
    );
    info!("doctor: OK");
    Ok(())
}

async fn tool_available(program: &str, probe: &str) -> bool {
    tokio::process::Command::new(program)
        .arg(probe)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

fn sources(cfg: &Config, source: &str) -> Result<()> {
    let kind = SourceKind::parse(source)?;
    println!("{}", kind);
    match &kind {
        SourceKind::Folder(dir) => println!("images: {}", list_images(dir)?.len()),
        k if k.is_stream() => println!(
            "stream: default {}x{}, record={}",
            cfg.capture.width,
            cfg.capture.height,
            if k.supports_record() { "yes" } else { "no" }
        ),
        _ => {}
    }
    Ok(())
}

pub mod dispatch;

use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::debug;

pub use dispatch::{SpeechDispatcher, SpeechStats};

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub backend: String, // "command" | "silent"
    pub program: String,
    /// Words per minute, passed as `-s`.
    pub rate: u32,
    pub extra_args: Vec<String>,
    pub queue_depth: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: "command".into(),
            program: "espeak-ng".into(),
            rate: 150,
            extra_args: Vec::new(),
            queue_depth: 4,
        }
    }
}

/// Blocking text-to-speech. Callers must keep it off the frame loop.
pub trait Speaker: Send + Sync {
    fn speak(&self, text: &str) -> Result<()>;
}

/// Speaks by running an external TTS program once per utterance.
#[derive(Debug, Clone)]
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(cfg: &SpeechConfig) -> Self {
        let mut args = vec!["-s".to_string(), cfg.rate.to_string()];
        args.extend(cfg.extra_args.iter().cloned());
        Self { program: cfg.program.clone(), args }
    }

    pub fn program(&self) -> &str { &self.program }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        debug!("speech: {} {:?}", self.program, text);
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("run {}", self.program))?;
        anyhow::ensure!(status.success(), "{} exited with {}", self.program, status);
        Ok(())
    }
}

/// Logs instead of speaking (audio hardware absent, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

impl Speaker for SilentSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        tracing::info!("speech: (silent) {}", text);
        Ok(())
    }
}

pub fn speaker_from_config(cfg: &SpeechConfig) -> Result<Box<dyn Speaker>> {
    match cfg.backend.as_str() {
        "command" => Ok(Box::new(CommandSpeaker::new(cfg))),
        "silent" => Ok(Box::new(SilentSpeaker)),
        other => anyhow::bail!("unknown speech.backend: {}", other),
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Speaker;

#[derive(Debug, Default)]
struct Counters {
    spoken: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    // bumped by `clear`; requests queued under an older value are skipped
    generation: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechStats {
    pub spoken: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Feeds a single speech worker. Utterances are spoken one at a time in
/// request order; `say` never waits.
pub struct SpeechDispatcher {
    tx: mpsc::Sender<(u64, String)>,
    counters: Arc<Counters>,
    worker: JoinHandle<()>,
}

impl SpeechDispatcher {
    /// Must be called from inside a tokio runtime.
    pub fn spawn(speaker: Arc<dyn Speaker>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<(u64, String)>(queue_depth.max(1));
        let counters = Arc::new(Counters::default());

        let c = counters.clone();
        let worker = tokio::spawn(async move {
            while let Some((epoch, text)) = rx.recv().await {
                if epoch != c.generation.load(Ordering::Acquire) {
                    c.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("speech: skipping cleared {:?}", text);
                    continue;
                }
                let sp = speaker.clone();
                let t = text.clone();
                match tokio::task::spawn_blocking(move || sp.speak(&t)).await {
                    Ok(Ok(())) => {
                        c.spoken.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        c.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("speech: failed to speak {:?}: {:#}", text, e);
                    }
                    Err(e) => {
                        c.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("speech: speaker task aborted: {}", e);
                    }
                }
            }
            debug!("speech: worker stopped");
        });

        Self { tx, counters, worker }
    }

    /// Queues `text`. Returns false when the request was dropped.
    pub fn say(&self, text: &str) -> bool {
        let epoch = self.counters.generation.load(Ordering::Acquire);
        match self.tx.try_send((epoch, text.to_string())) {
            Ok(()) => true,
            Err(TrySendError::Full((_, t))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("speech: queue full, dropping {:?}", t);
                false
            }
            Err(TrySendError::Closed((_, t))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("speech: worker gone, dropping {:?}", t);
                false
            }
        }
    }

    /// Discards every queued utterance. One already being spoken finishes.
    pub fn clear(&self) {
        self.counters.generation.fetch_add(1, Ordering::AcqRel);
        debug!("speech: queue cleared");
    }

    pub fn stats(&self) -> SpeechStats {
        SpeechStats {
            spoken: self.counters.spoken.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Lets queued utterances finish, then stops the worker.
    pub async fn shutdown(self) -> SpeechStats {
        let Self { tx, counters, worker } = self;
        drop(tx);
        if let Err(e) = worker.await {
            warn!("speech: worker join failed: {}", e);
        }
        SpeechStats {
            spoken: counters.spoken.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc as std_mpsc, Mutex};

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
    }

    impl Speaker for Recorder {
        fn speak(&self, text: &str) -> anyhow::Result<()> {
            anyhow::ensure!(text != "broken", "engine unavailable");
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct Gated {
        started: Mutex<std_mpsc::Sender<()>>,
        gate: Mutex<std_mpsc::Receiver<()>>,
        spoken: Mutex<Vec<String>>,
    }

    impl Speaker for Gated {
        fn speak(&self, text: &str) -> anyhow::Result<()> {
            let _ = self.started.lock().unwrap().send(());
            let _ = self.gate.lock().unwrap().recv();
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn speaks_in_order_and_survives_failures() {
        let rec = Arc::new(Recorder::default());
        let d = SpeechDispatcher::spawn(rec.clone(), 8);
        assert!(d.say("stop"));
        assert!(d.say("broken"));
        assert!(d.say("max speed 100km/h"));

        let stats = d.shutdown().await;
        assert_eq!(stats, SpeechStats { spoken: 2, failed: 1, dropped: 0 });
        assert_eq!(*rec.spoken.lock().unwrap(), vec!["stop", "max speed 100km/h"]);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let sp = Arc::new(Gated {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
            spoken: Mutex::new(Vec::new()),
        });
        let d = SpeechDispatcher::spawn(sp.clone(), 1);

        assert!(d.say("a"));
        tokio::task::spawn_blocking(move || started_rx.recv()).await.unwrap().unwrap();

        assert!(d.say("b"));
        assert!(!d.say("c"));
        assert_eq!(d.stats().dropped, 1);

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        let stats = d.shutdown().await;
        assert_eq!(stats.spoken, 2);
        assert_eq!(*sp.spoken.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn clear_discards_queued_speech() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let (gate_tx, gate_rx) = std_mpsc::channel();
        let sp = Arc::new(Gated {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
            spoken: Mutex::new(Vec::new()),
        });
        let d = SpeechDispatcher::spawn(sp.clone(), 4);

        assert!(d.say("stop"));
        tokio::task::spawn_blocking(move || started_rx.recv()).await.unwrap().unwrap();
        assert!(d.say("yield"));
        assert!(d.say("max speed 100km/h"));
        d.clear();
        assert!(d.say("caution accident area"));

        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        let stats = d.shutdown().await;
        assert_eq!(*sp.spoken.lock().unwrap(), vec!["stop", "caution accident area"]);
        assert_eq!(stats, SpeechStats { spoken: 2, failed: 0, dropped: 2 });
    }
}

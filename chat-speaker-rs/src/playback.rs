//! Utterance queue and the playback coordinator.
//!
//! Per utterance: QUEUED → ANNOUNCED → AWAITING_ARTIFACT → PLAYING → DISPOSED
//!
//! The coordinator is one task that owns the receiving end of the queue and
//! handles a single utterance at a time, so two utterances never overlap and
//! the artifact path is only ever touched by one consumer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PlaybackConfig;
use crate::error::ArtifactError;
use crate::history::{HistoryLog, UtteranceRecord};
use crate::overlay::OverlayChannel;
use crate::voice::VoiceSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceState {
    Queued,
    Announced,
    AwaitingArtifact,
    Playing,
    Disposed,
}

impl std::fmt::Display for UtteranceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Announced => write!(f, "ANNOUNCED"),
            Self::AwaitingArtifact => write!(f, "AWAITING_ARTIFACT"),
            Self::Playing => write!(f, "PLAYING"),
            Self::Disposed => write!(f, "DISPOSED"),
        }
    }
}

/// How an utterance left the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOutcome {
    Played,
    TimedOut,
    SkippedNoVoice,
    Failed,
}

impl std::fmt::Display for PlaybackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Played => write!(f, "played"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::SkippedNoVoice => write!(f, "skipped_no_voice"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub enqueued_at: Instant,
}

/// Producer side of the utterance queue. Cheap to clone.
#[derive(Clone)]
pub struct UtteranceQueue {
    tx: mpsc::UnboundedSender<Utterance>,
    pending: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

/// Consumer side, owned by the coordinator.
pub struct UtteranceReceiver {
    rx: mpsc::UnboundedReceiver<Utterance>,
    pending: Arc<AtomicUsize>,
}

impl UtteranceQueue {
    pub fn new() -> (Self, UtteranceReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let queue = Self {
            tx,
            pending: pending.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (queue, UtteranceReceiver { rx, pending })
    }

    /// Enqueue `text`. Returns false once the coordinator has gone away.
    pub fn push(&self, text: impl Into<String>) -> bool {
        let utterance = Utterance {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            text: text.into(),
            enqueued_at: Instant::now(),
        };
        let id = utterance.id;

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(utterance).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Utterance queue closed, dropping utterance #{id}");
            return false;
        }
        debug!("Utterance #{id}: {}", UtteranceState::Queued);
        true
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

impl UtteranceReceiver {
    pub async fn next(&mut self) -> Option<Utterance> {
        let utterance = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(utterance)
    }
}

/// Waits for the externally rendered artifact at its well-known path.
///
/// Once present, the artifact is renamed to a private `<name>.playing` path
/// before it is played, so the renderer is free to write the next one while
/// the current one is still playing.
pub struct ArtifactWatcher {
    path: PathBuf,
    claimed: PathBuf,
    interval: Duration,
    attempts: u32,
}

impl ArtifactWatcher {
    pub fn new(path: PathBuf, interval: Duration, attempts: u32) -> Self {
        let mut name = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".playing");
        let claimed = path.with_file_name(name);
        Self {
            path,
            claimed,
            interval,
            attempts,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Present means the renderer has written at least one byte.
    pub async fn is_present(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Poll until the artifact exists, at most `attempts` times.
    pub async fn wait(&self) -> Result<(), ArtifactError> {
        for _ in 0..self.attempts {
            if self.is_present().await {
                return Ok(());
            }
            tokio::time::sleep(self.interval).await;
        }
        if self.is_present().await {
            return Ok(());
        }
        Err(ArtifactError::Timeout {
            path: self.path.clone(),
            waited: self.interval * self.attempts,
        })
    }

    /// Move the artifact off the well-known path. Returns the path to play.
    pub async fn claim(&self) -> Result<&Path, ArtifactError> {
        tokio::fs::rename(&self.path, &self.claimed)
            .await
            .map_err(|source| ArtifactError::Claim {
                path: self.path.clone(),
                source,
            })?;
        Ok(&self.claimed)
    }

    /// Delete the claimed artifact once it has been played.
    pub async fn release(&self) {
        remove_artifact(&self.claimed).await;
    }

    /// Delete whatever sits at the well-known path.
    pub async fn dispose(&self) {
        remove_artifact(&self.path).await;
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove artifact {}: {e}", path.display()),
    }
}

/// In-flight token: the speaking flag is set while one of these is alive.
struct SpeakingGuard {
    flag: Arc<AtomicBool>,
}

impl SpeakingGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Self {
        let was_speaking = flag.swap(true, Ordering::SeqCst);
        debug_assert!(!was_speaking, "two utterances in flight");
        Self { flag: flag.clone() }
    }
}

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackReport {
    pub outcome: PlaybackOutcome,
    pub artifact_wait: Duration,
    pub playback: Duration,
    pub overlay_viewers: usize,
}

impl PlaybackReport {
    fn new(outcome: PlaybackOutcome) -> Self {
        Self {
            outcome,
            artifact_wait: Duration::ZERO,
            playback: Duration::ZERO,
            overlay_viewers: 0,
        }
    }
}

pub struct PlaybackCoordinator {
    rx: UtteranceReceiver,
    overlay: OverlayChannel,
    voice: Option<Arc<dyn VoiceSink>>,
    watcher: ArtifactWatcher,
    announce_without_voice: bool,
    speaking: Arc<AtomicBool>,
    history: Option<HistoryLog>,
}

impl PlaybackCoordinator {
    pub fn new(
        rx: UtteranceReceiver,
        overlay: OverlayChannel,
        voice: Option<Arc<dyn VoiceSink>>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            rx,
            overlay,
            voice,
            watcher: ArtifactWatcher::new(
                config.artifact_path.clone(),
                config.poll_interval(),
                config.poll_attempts,
            ),
            announce_without_voice: config.announce_without_voice,
            speaking: Arc::new(AtomicBool::new(false)),
            history: None,
        }
    }

    pub fn with_history(mut self, history: HistoryLog) -> Self {
        self.history = Some(history);
        self
    }

    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        self.speaking.clone()
    }

    /// Drain the queue in order until it closes or `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Playback coordinator ready (artifact: {}, voice: {})",
            self.watcher.path().display(),
            if self.voice.is_some() { "on" } else { "off" }
        );

        loop {
            let utterance = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.rx.next() => match next {
                    Some(u) => u,
                    None => break,
                },
            };

            let queued = utterance.enqueued_at.elapsed();
            let report = self.process(&utterance).await;
            debug!("Utterance #{}: {}", utterance.id, report.outcome);

            if let Some(history) = &self.history {
                history.save(&UtteranceRecord {
                    timestamp: chrono::Local::now()
                        .format("%Y-%m-%dT%H:%M:%S%.3f")
                        .to_string(),
                    text: utterance.text,
                    outcome: report.outcome,
                    queued_ms: queued.as_millis() as i64,
                    artifact_wait_ms: report.artifact_wait.as_millis() as i64,
                    playback_ms: report.playback.as_millis() as i64,
                    overlay_viewers: report.overlay_viewers,
                });
            }
        }

        info!("Playback coordinator stopped");
    }

    /// Take one utterance all the way through to disposal.
    pub async fn process(&self, utterance: &Utterance) -> PlaybackReport {
        let _speaking = SpeakingGuard::acquire(&self.speaking);
        let id = utterance.id;
        info!("Speaking: {}", utterance.text);

        let voice = self.voice.as_ref().filter(|v| v.is_connected());

        if voice.is_none() && !self.announce_without_voice {
            debug!("Utterance #{id}: no voice connection, skipping");
            self.watcher.dispose().await;
            return PlaybackReport::new(PlaybackOutcome::SkippedNoVoice);
        }

        let overlay_viewers = self.overlay.broadcast(&utterance.text);
        transition(id, UtteranceState::Queued, UtteranceState::Announced);

        let Some(voice) = voice else {
            debug!("Utterance #{id}: no voice connection, overlay only");
            // Whatever the renderer writes for this utterance must not be
            // played for the next one.
            self.watcher.dispose().await;
            return PlaybackReport {
                overlay_viewers,
                ..PlaybackReport::new(PlaybackOutcome::SkippedNoVoice)
            };
        };

        transition(id, UtteranceState::Announced, UtteranceState::AwaitingArtifact);
        let t_wait = Instant::now();
        if let Err(e) = self.watcher.wait().await {
            error!("Utterance #{id} abandoned: {e}");
            return PlaybackReport {
                artifact_wait: t_wait.elapsed(),
                overlay_viewers,
                ..PlaybackReport::new(PlaybackOutcome::TimedOut)
            };
        }
        let artifact_wait = t_wait.elapsed();

        let artifact = match self.watcher.claim().await {
            Ok(path) => path,
            Err(e) => {
                error!("Utterance #{id}: {e}");
                return PlaybackReport {
                    artifact_wait,
                    overlay_viewers,
                    ..PlaybackReport::new(PlaybackOutcome::Failed)
                };
            }
        };

        transition(id, UtteranceState::AwaitingArtifact, UtteranceState::Playing);
        let t_play = Instant::now();
        let outcome = match voice.play(artifact).await {
            Ok(idle) => {
                if idle.await.is_err() {
                    warn!("Utterance #{id}: voice sink dropped the idle notification");
                }
                PlaybackOutcome::Played
            }
            Err(e) => {
                error!("Utterance #{id}: playback failed: {e}");
                PlaybackOutcome::Failed
            }
        };
        let playback = t_play.elapsed();

        self.watcher.release().await;
        transition(id, UtteranceState::Playing, UtteranceState::Disposed);

        PlaybackReport {
            outcome,
            artifact_wait,
            playback,
            overlay_viewers,
        }
    }
}

fn transition(id: u64, from: UtteranceState, to: UtteranceState) {
    debug!("Utterance #{id}: {from} → {to}");
}

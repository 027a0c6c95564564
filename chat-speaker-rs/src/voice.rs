//! Voice output: the sink a rendered artifact is played into.
//!
//! `play` starts playback and hands back an idle signal that resolves once
//! the resource has finished.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::VoiceError;

/// Fires exactly once when the current resource stops playing.
pub type IdleSignal = oneshot::Receiver<()>;

#[async_trait]
pub trait VoiceSink: Send + Sync {
    /// Whether a live voice connection exists right now.
    fn is_connected(&self) -> bool;

    /// Start playing the artifact at `artifact`.
    async fn play(&self, artifact: &Path) -> Result<IdleSignal, VoiceError>;
}

/// Plays artifacts on the default audio output device.
///
/// There is no session to lose: once the device opens it is treated as
/// connected for the rest of the process. A device that disappears later is
/// not detected here.
pub struct AudioDeviceSink {
    // Kept alive for the process lifetime; dropping it silences every sink.
    stream: OutputStream,
}

impl AudioDeviceSink {
    pub fn open() -> Result<Self, VoiceError> {
        let stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| VoiceError::Open(e.to_string()))?;
        info!("Audio output opened");
        Ok(Self { stream })
    }
}

#[async_trait]
impl VoiceSink for AudioDeviceSink {
    /// Always true; see the type docs.
    fn is_connected(&self) -> bool {
        true
    }

    async fn play(&self, artifact: &Path) -> Result<IdleSignal, VoiceError> {
        let file = File::open(artifact)?;
        let source = Decoder::new(BufReader::new(file)).map_err(|e| VoiceError::Decode {
            path: artifact.to_path_buf(),
            message: e.to_string(),
        })?;

        let sink = Sink::connect_new(self.stream.mixer());
        sink.append(source);
        debug!("Playing {}", artifact.display());

        let (idle_tx, idle_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            sink.sleep_until_end();
            let _ = idle_tx.send(());
        });

        Ok(idle_rx)
    }
}

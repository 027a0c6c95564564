//! Service wiring: chat → buffer → scheduler → summarizer → queue →
//! coordinator → {overlay, voice}.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{self, ApiState};
use crate::buffer::ChatBuffer;
use crate::chat::TwitchChat;
use crate::config::Config;
use crate::history::HistoryLog;
use crate::overlay::OverlayChannel;
use crate::playback::{PlaybackCoordinator, UtteranceQueue};
use crate::scheduler::BatchScheduler;
use crate::summarizer::SummaryClient;
use crate::voice::{AudioDeviceSink, VoiceSink};

pub struct SpeakerService {
    config: Config,
    text_only: bool,
}

impl SpeakerService {
    pub fn new(mut config: Config, text_only: bool) -> Self {
        if text_only {
            config.playback.announce_without_voice = true;
        }
        Self { config, text_only }
    }

    /// Missing audio output is not fatal: overlay and summaries keep working.
    fn open_voice(&self) -> Option<Arc<dyn VoiceSink>> {
        if self.text_only || !self.config.voice.enabled {
            info!("Voice output disabled, running overlay-only");
            return None;
        }
        match AudioDeviceSink::open() {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                error!("{e}; continuing without voice output");
                None
            }
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let shutdown = CancellationToken::new();
        let config = &self.config;

        let buffer = Arc::new(ChatBuffer::new());
        let overlay = OverlayChannel::new(config.overlay.capacity);
        let (queue, receiver) = UtteranceQueue::new();
        let voice = self.open_voice();
        let voice_connected = voice.as_ref().is_some_and(|v| v.is_connected());

        let mut coordinator =
            PlaybackCoordinator::new(receiver, overlay.clone(), voice, &config.playback);
        if config.history.enabled {
            coordinator = coordinator.with_history(HistoryLog::new(config.history.dir.clone()));
        }
        let speaking = coordinator.speaking_flag();

        let overlay_server = overlay.clone();
        let bind = config.overlay.bind.clone();
        let ws_port = config.overlay.ws_port;
        let ws_shutdown = shutdown.clone();
        tokio::spawn(async move { overlay_server.serve(&bind, ws_port, ws_shutdown).await });

        let api_state = ApiState {
            queue: queue.clone(),
            overlay,
            speaking,
            voice_connected,
        };
        let static_dir = config.overlay.static_dir.clone();
        let bind = config.overlay.bind.clone();
        let http_port = config.overlay.http_port;
        let api_shutdown = shutdown.clone();
        tokio::spawn(async move {
            api::serve(api_state, &static_dir, &bind, http_port, api_shutdown).await;
        });

        tokio::spawn(coordinator.run(shutdown.clone()));

        let summarizer = Arc::new(SummaryClient::new(&config.summarizer));
        let scheduler = BatchScheduler::new(buffer.clone(), summarizer, queue, &config.batch);
        tokio::spawn(scheduler.run(shutdown.clone()));

        let chat = TwitchChat::new(config.twitch.clone(), buffer);
        let chat_shutdown = shutdown.clone();
        tokio::spawn(async move { chat.run(chat_shutdown).await });

        info!("Service ready, summarizing chat every {:?}", config.batch.interval());

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
        shutdown.cancel();

        Ok(())
    }
}

//! Batch scheduler: drains the chat buffer on a fixed period and hands each
//! batch to the summarizer.
//!
//! Every firing spawns its own summarization task, so a slow or failing
//! request never delays the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::buffer::ChatBuffer;
use crate::config::BatchConfig;
use crate::playback::UtteranceQueue;
use crate::summarizer::SummaryClient;

pub struct BatchScheduler {
    buffer: Arc<ChatBuffer>,
    summarizer: Arc<SummaryClient>,
    queue: UtteranceQueue,
    interval: Duration,
    delimiter: String,
}

impl BatchScheduler {
    pub fn new(
        buffer: Arc<ChatBuffer>,
        summarizer: Arc<SummaryClient>,
        queue: UtteranceQueue,
        config: &BatchConfig,
    ) -> Self {
        Self {
            buffer,
            summarizer,
            queue,
            interval: config.interval(),
            delimiter: config.delimiter.clone(),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        // First firing is one full period after startup.
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Batch scheduler running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.fire();
                }
            }
        }
    }

    /// One timer firing. Returns the spawned summarization task, or `None`
    /// when there was nothing to summarize.
    pub fn fire(&self) -> Option<JoinHandle<()>> {
        let lines = self.buffer.drain_all();
        if lines.is_empty() {
            return None;
        }

        let batch = lines.join(&self.delimiter);
        let summarizer = self.summarizer.clone();
        let queue = self.queue.clone();

        Some(tokio::spawn(async move {
            match summarizer.summarize(&batch).await {
                Ok(Some(summary)) => {
                    info!("Summary: {summary}");
                    queue.push(summary);
                }
                Ok(None) => {}
                Err(e) => error!("Error summarizing batch of {} lines: {e}", lines.len()),
            }
        }))
    }
}

//! Utterance history and daily reporting.
//!
//! Stores one JSON line per utterance in `{dir}/{YYYY-MM-DD}.jsonl`.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, error};

use crate::playback::PlaybackOutcome;

/// Record of a single utterance's trip through the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub timestamp: String,
    pub text: String,
    pub outcome: PlaybackOutcome,
    pub queued_ms: i64,
    pub artifact_wait_ms: i64,
    pub playback_ms: i64,
    pub overlay_viewers: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryLog {
    dir: PathBuf,
}

impl HistoryLog {
    /// Use `dir`, or `~/.chat-speaker-history` when none is configured.
    pub fn new(dir: Option<PathBuf>) -> Self {
        let dir = dir.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chat-speaker-history")
        });
        Self { dir }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        let date_str = if date == "today" {
            Local::now().format("%Y-%m-%d").to_string()
        } else {
            date.to_string()
        };
        self.dir.join(format!("{date_str}.jsonl"))
    }

    /// Append a record to today's file.
    pub fn save(&self, record: &UtteranceRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            error!("Failed to create history dir: {e}");
            return;
        }

        let path = self.file_for("today");
        match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(mut file) => match serde_json::to_string(record) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        error!("Failed to write history record: {e}");
                    } else {
                        debug!("Saved utterance record to {}", path.display());
                    }
                }
                Err(e) => error!("Failed to serialize record: {e}"),
            },
            Err(e) => error!("Failed to open history file: {e}"),
        }
    }

    pub fn load(&self, date: &str) -> Vec<UtteranceRecord> {
        let path = self.file_for(date);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => return Vec::new(),
        };

        std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(&line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed history line: {e}");
                    None
                }
            })
            .collect()
    }

    /// Dates with history, newest first.
    pub fn list_dates(&self) -> Vec<String> {
        let mut dates: Vec<String> = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let name = entry.ok()?.file_name().to_string_lossy().to_string();
                name.strip_suffix(".jsonl").map(str::to_string)
            })
            .collect();
        dates.sort();
        dates.reverse();
        dates
    }

    pub fn report(&self, date: &str) -> String {
        let records = self.load(date);
        if records.is_empty() {
            return format!("No utterances recorded for {date}.");
        }

        let total = records.len();
        let played: Vec<&UtteranceRecord> = records
            .iter()
            .filter(|r| r.outcome == PlaybackOutcome::Played)
            .collect();

        let mut by_outcome: BTreeMap<String, usize> = BTreeMap::new();
        for r in &records {
            *by_outcome.entry(r.outcome.to_string()).or_insert(0) += 1;
        }

        let avg = |f: fn(&UtteranceRecord) -> i64| -> f64 {
            if played.is_empty() {
                0.0
            } else {
                played.iter().map(|r| f(r) as f64).sum::<f64>() / played.len() as f64
            }
        };

        let mut report = format!(
            "# Utterance Report for {date}\n\n\
            - Total utterances: {total}\n\
            - Played: {}\n\
            - Avg artifact wait: {:.0}ms\n\
            - Avg playback: {:.0}ms\n\n\
            ## Outcomes\n",
            played.len(),
            avg(|r| r.artifact_wait_ms),
            avg(|r| r.playback_ms),
        );
        for (outcome, count) in &by_outcome {
            report.push_str(&format!("- {outcome}: {count}\n"));
        }
        report
    }
}

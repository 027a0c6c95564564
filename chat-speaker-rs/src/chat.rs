//! Twitch chat ingestion over IRC-over-WebSocket.
//!
//! Joins one channel, answers PINGs, and appends every PRIVMSG not sent by
//! our own account to the chat buffer. Reconnects after a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ChatBuffer;
use crate::config::TwitchConfig;
use crate::error::ChatError;

/// The parts of an IRC line the ingestion cares about.
#[derive(Debug, PartialEq, Eq)]
pub enum IrcEvent<'a> {
    Ping(&'a str),
    Privmsg { nick: &'a str, text: &'a str },
    Other,
}

/// Parse one raw IRC line (without the trailing CRLF).
pub fn parse_line(line: &str) -> IrcEvent<'_> {
    let mut rest = line.trim_end_matches(|c: char| c == '\r' || c == '\n');

    // IRCv3 tags
    if rest.starts_with('@') {
        match rest.split_once(' ') {
            Some((_, after)) => rest = after,
            None => return IrcEvent::Other,
        }
    }

    if let Some(server) = rest.strip_prefix("PING ") {
        return IrcEvent::Ping(server);
    }

    let Some(prefixed) = rest.strip_prefix(':') else {
        return IrcEvent::Other;
    };
    let Some((prefix, command)) = prefixed.split_once(' ') else {
        return IrcEvent::Other;
    };
    let Some(params) = command.strip_prefix("PRIVMSG ") else {
        return IrcEvent::Other;
    };
    let Some((_target, text)) = params.split_once(" :") else {
        return IrcEvent::Other;
    };

    let nick = prefix.split('!').next().unwrap_or(prefix);
    // `/me` messages arrive wrapped as CTCP ACTION.
    let text = text
        .strip_prefix("\u{1}ACTION ")
        .and_then(|t| t.strip_suffix('\u{1}'))
        .unwrap_or(text);

    IrcEvent::Privmsg { nick, text }
}

pub struct TwitchChat {
    config: TwitchConfig,
    buffer: Arc<ChatBuffer>,
}

impl TwitchChat {
    pub fn new(config: TwitchConfig, buffer: Arc<ChatBuffer>) -> Self {
        Self { config, buffer }
    }

    fn channel(&self) -> String {
        format!("#{}", self.config.channel.trim_start_matches('#').to_lowercase())
    }

    /// Without a token we log in anonymously, which Twitch allows for reading.
    fn login_lines(&self) -> Vec<String> {
        let token = self.config.token.trim();
        let mut lines = Vec::with_capacity(3);

        if token.is_empty() || self.config.username.trim().is_empty() {
            let suffix = chrono::Local::now().timestamp_subsec_micros() % 100_000;
            lines.push(format!("NICK justinfan{suffix}"));
        } else {
            let pass = if token.starts_with("oauth:") {
                token.to_string()
            } else {
                format!("oauth:{token}")
            };
            lines.push(format!("PASS {pass}"));
            lines.push(format!("NICK {}", self.config.username.to_lowercase()));
        }
        lines.push(format!("JOIN {}", self.channel()));
        lines
    }

    fn is_self(&self, nick: &str) -> bool {
        !self.config.username.is_empty() && nick.eq_ignore_ascii_case(&self.config.username)
    }

    /// Handle one line; returns the reply to send, if any.
    fn handle_line(&self, line: &str) -> Option<String> {
        match parse_line(line) {
            IrcEvent::Ping(server) => Some(format!("PONG {server}")),
            IrcEvent::Privmsg { nick, text } => {
                if !self.is_self(nick) {
                    debug!("Twitch <{nick}>: {text}");
                    self.buffer.append(text);
                }
                None
            }
            IrcEvent::Other => None,
        }
    }

    /// Stay connected until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        if self.config.channel.trim().is_empty() {
            warn!("No Twitch channel configured, chat ingestion disabled");
            return;
        }

        let reconnect = Duration::from_secs(self.config.reconnect_secs.max(1));
        loop {
            match self.session(&shutdown).await {
                Ok(()) => break,
                Err(e) => warn!("Twitch chat: {e}, reconnecting in {reconnect:?}"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(reconnect) => {}
            }
        }
        info!("Twitch chat stopped");
    }

    /// One connection. `Ok` only when shut down deliberately.
    async fn session(&self, shutdown: &CancellationToken) -> Result<(), ChatError> {
        let (stream, _) = tokio_tungstenite::connect_async(self.config.server.as_str()).await?;
        let (mut write, mut read) = stream.split();

        for line in self.login_lines() {
            write.send(Message::Text(line)).await?;
        }
        info!("Joined Twitch chat {}", self.channel());

        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    for line in text.split("\r\n").filter(|l| !l.is_empty()) {
                        if let Some(reply) = self.handle_line(line) {
                            write.send(Message::Text(reply)).await?;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Err(ChatError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(username: &str, token: &str) -> TwitchChat {
        TwitchChat::new(
            TwitchConfig {
                username: username.into(),
                token: token.into(),
                channel: "#DeadlockStreamer".into(),
                ..TwitchConfig::default()
            },
            Arc::new(ChatBuffer::new()),
        )
    }

    #[test]
    fn parses_privmsg_with_and_without_tags() {
        assert_eq!(
            parse_line(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :push blue lane"),
            IrcEvent::Privmsg {
                nick: "viewer",
                text: "push blue lane"
            }
        );
        assert_eq!(
            parse_line(
                "@badge-info=;color=#FF0000;display-name=Viewer :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :walker low: help\r\n"
            ),
            IrcEvent::Privmsg {
                nick: "viewer",
                text: "walker low: help"
            }
        );
    }

    #[test]
    fn unwraps_action_messages() {
        assert_eq!(
            parse_line(":v!v@v.tmi.twitch.tv PRIVMSG #chan :\u{1}ACTION rotates mid\u{1}"),
            IrcEvent::Privmsg {
                nick: "v",
                text: "rotates mid"
            }
        );
    }

    #[test]
    fn parses_ping_and_ignores_everything_else() {
        assert_eq!(parse_line("PING :tmi.twitch.tv"), IrcEvent::Ping(":tmi.twitch.tv"));
        assert_eq!(parse_line(":tmi.twitch.tv 001 justinfan1 :Welcome, GLHF!"), IrcEvent::Other);
        assert_eq!(parse_line(":v!v@v JOIN #chan"), IrcEvent::Other);
        assert_eq!(parse_line("garbage"), IrcEvent::Other);
    }

    #[test]
    fn own_messages_are_not_buffered() {
        let chat = chat("CoachBot", "oauth:abc");
        assert!(chat.handle_line(":coachbot!coachbot@coachbot.tmi.twitch.tv PRIVMSG #chan :hi").is_none());
        assert!(chat.handle_line(":viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #chan :defend").is_none());
        assert_eq!(chat.buffer.drain_all(), vec!["defend"]);
    }

    #[test]
    fn ping_gets_pong() {
        let chat = chat("", "");
        assert_eq!(
            chat.handle_line("PING :tmi.twitch.tv").as_deref(),
            Some("PONG :tmi.twitch.tv")
        );
    }

    #[test]
    fn authenticated_login_adds_oauth_prefix_and_lowercases() {
        let lines = chat("CoachBot", "abc123").login_lines();
        assert_eq!(
            lines,
            vec!["PASS oauth:abc123", "NICK coachbot", "JOIN #deadlockstreamer"]
        );
    }

    #[test]
    fn anonymous_login_without_token() {
        let lines = chat("", "").login_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NICK justinfan"));
        assert_eq!(lines[1], "JOIN #deadlockstreamer");
    }
}

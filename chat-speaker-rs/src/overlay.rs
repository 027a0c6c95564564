//! Overlay channel: fan-out of utterance text to connected viewers.
//!
//! Each WebSocket viewer holds its own broadcast receiver, created when it
//! connects. Nothing is replayed to late joiners and nothing is retried.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct OverlayChannel {
    tx: broadcast::Sender<String>,
}

impl OverlayChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send `text` to every open viewer. Returns how many viewers it reached.
    pub fn broadcast(&self, text: &str) -> usize {
        match self.tx.send(text.to_string()) {
            Ok(count) => {
                debug!("Overlay broadcast to {count} viewers");
                count
            }
            Err(_) => {
                debug!("Overlay broadcast with no viewers connected");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn router(self) -> Router {
        Router::new().route("/", get(handle_upgrade)).with_state(self)
    }

    /// Serve the overlay socket on `{bind}:{port}` until `shutdown` fires.
    pub async fn serve(self, bind: &str, port: u16, shutdown: CancellationToken) {
        let addr = format!("{bind}:{port}");
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!("Failed to bind overlay socket on {addr}: {e}");
                return;
            }
        };
        info!("Overlay WebSocket listening on ws://{addr}");
        self.serve_on(listener, shutdown).await;
    }

    pub async fn serve_on(self, listener: TcpListener, shutdown: CancellationToken) {
        let app = self.router();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            warn!("Overlay server error: {e}");
        }
    }
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(overlay): State<OverlayChannel>,
) -> impl IntoResponse {
    let rx = overlay.subscribe();
    info!("Overlay viewer connected ({} total)", overlay.viewer_count());
    ws.on_upgrade(move |socket| forward_to_viewer(socket, rx))
}

async fn forward_to_viewer(socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Overlay viewer lagged, dropped {skipped} messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Overlay viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn wait_for_viewers(overlay: &OverlayChannel, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while overlay.viewer_count() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("viewer count never reached {n}"));
    }

    async fn start(overlay: &OverlayChannel) -> (SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(overlay.clone().serve_on(listener, shutdown.clone()));
        (addr, shutdown)
    }

    #[test]
    fn broadcast_without_viewers_is_silently_dropped() {
        let overlay = OverlayChannel::new(8);
        assert_eq!(overlay.broadcast("nobody home"), 0);
    }

    #[test]
    fn late_subscriber_never_sees_earlier_broadcasts() {
        let overlay = OverlayChannel::new(8);
        let mut early = overlay.subscribe();
        overlay.broadcast("first");
        let mut late = overlay.subscribe();
        overlay.broadcast("second");

        assert_eq!(early.try_recv().unwrap(), "first");
        assert_eq!(early.try_recv().unwrap(), "second");
        assert_eq!(late.try_recv().unwrap(), "second");
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn dropped_subscriber_is_skipped() {
        let overlay = OverlayChannel::new(8);
        let kept = overlay.subscribe();
        drop(overlay.subscribe());
        assert_eq!(overlay.broadcast("hi"), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn websocket_viewer_receives_only_broadcasts_after_connecting() {
        let overlay = OverlayChannel::new(8);
        let (addr, shutdown) = start(&overlay).await;

        overlay.broadcast("before anyone joined");

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        wait_for_viewers(&overlay, 1).await;

        assert_eq!(overlay.broadcast("Defend blue walker now."), 1);
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, WsMessage::Text("Defend blue walker now.".into()));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn serves_on_the_configured_bind_host() {
        let port = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let overlay = OverlayChannel::new(8);
        let shutdown = CancellationToken::new();
        tokio::spawn(overlay.clone().serve("127.0.0.1", port, shutdown.clone()));

        let connected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok((client, _)) =
                    tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/")).await
                {
                    break client;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(connected.is_ok());
        wait_for_viewers(&overlay, 1).await;
        shutdown.cancel();
    }

    #[tokio::test]
    async fn closed_viewer_is_removed_and_broadcast_continues() {
        let overlay = OverlayChannel::new(8);
        let (addr, shutdown) = start(&overlay).await;

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        wait_for_viewers(&overlay, 1).await;

        client.close(None).await.unwrap();
        wait_for_viewers(&overlay, 0).await;

        assert_eq!(overlay.broadcast("still fine"), 0);
        shutdown.cancel();
    }
}

//! WebSocket implementation of the push channel transport.

use super::connection::{CloseReason, PushSession, PushTransport, SessionEvent, TransportError};
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

/// Connects to the generator's WebSocket endpoint.
///
/// Text frames become [`SessionEvent::Message`]. A close frame is a deliberate
/// server close; a read error is a transport failure. Pings are answered by
/// tungstenite while reading.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint {
                url,
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn session_event(message: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<SessionEvent> {
    match message {
        Ok(Message::Text(text)) => Some(SessionEvent::Message(text.as_str().to_owned())),
        Ok(Message::Close(frame)) => {
            if let Some(frame) = frame {
                tracing::debug!(code = %frame.code, reason = %frame.reason, "Server closed push channel");
            }
            Some(SessionEvent::Closed(CloseReason::Server))
        }
        Ok(Message::Binary(bin)) => {
            tracing::debug!(len = bin.len(), "Ignoring binary push frame");
            None
        }
        Ok(_) => None,
        Err(e) => Some(SessionEvent::Closed(CloseReason::Transport(e.to_string()))),
    }
}

impl PushTransport for WebSocketTransport {
    fn connect(&self) -> BoxFuture<'static, Result<PushSession, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            tracing::info!("Connecting to push channel: {}", url);
            let (ws_stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let session = ws_stream.filter_map(|message| async move { session_event(message) });
            Ok(session.boxed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_http_endpoint() {
        assert!(matches!(
            WebSocketTransport::new("http://localhost:5000"),
            Err(TransportError::InvalidEndpoint { .. })
        ));
        assert_eq!(
            WebSocketTransport::new("ws://localhost:5000/ws").unwrap().url(),
            "ws://localhost:5000/ws"
        );
    }

    #[test]
    fn test_frames_map_to_session_events() {
        assert_eq!(
            session_event(Ok(Message::Text("{}".into()))),
            Some(SessionEvent::Message("{}".to_string()))
        );
        assert_eq!(
            session_event(Ok(Message::Close(None))),
            Some(SessionEvent::Closed(CloseReason::Server))
        );
        assert_eq!(session_event(Ok(Message::Ping(Vec::new().into()))), None);
        assert!(matches!(
            session_event(Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)),
            Some(SessionEvent::Closed(CloseReason::Transport(_)))
        ));
    }
}

//! # Stream Transport
//!
//! The stream client only needs "open a URL, then read frames until the
//! stream ends". [`Connector`] captures exactly that, so the reconnect state
//! machine can run against a scripted transport in tests and against
//! `tokio-tungstenite` in production.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use super::frame::Frame;

/// Frames of one open connection. The stream ending means the peer closed.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// A pending connection attempt.
pub type ConnectFuture = BoxFuture<'static, Result<FrameStream, TransportError>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
}

/// Opens connections to the streaming endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> ConnectFuture;
}

impl<T: Connector + ?Sized> Connector for Arc<T> {
    fn connect(&self, url: &str) -> ConnectFuture {
        (**self).connect(url)
    }
}

/// # WebSocket Connector
///
/// Production transport. Text and binary messages become [`Frame`]s; ping,
/// pong and close control frames are consumed here (tungstenite answers pings
/// on its own while reading).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let url = url.to_string();
        async move {
            let (ws_stream, _response) = connect_async(url.as_str()).await?;

            let frames = ws_stream.filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.to_string()))),
                    Ok(Message::Binary(bin)) => Some(Ok(Frame::Binary(bin.to_vec()))),
                    Ok(Message::Close(frame)) => {
                        log::debug!("Close frame from stream endpoint: {:?}", frame);
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                }
            });

            Ok(frames.boxed())
        }
        .boxed()
    }
}

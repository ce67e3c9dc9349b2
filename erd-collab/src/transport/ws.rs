//! WebSocket link to a relay. Frames travel as JSON text messages.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Connector, Link};
use crate::error::{ProtocolError, TransportError};
use crate::protocol::Frame;

#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (mut writer, mut reader) = stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

            // Writer task: forward outgoing frames until the transport drops
            // its sender, then close the socket.
            tokio::spawn(async move {
                while let Some(frame) = out_rx.recv().await {
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            log::warn!("Failed to encode {} frame: {e}", frame.event());
                            continue;
                        }
                    };
                    if writer.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = writer.close().await;
            });

            // Reader task: decode text frames; dropping `in_tx` signals loss.
            tokio::spawn(async move {
                while let Some(msg) = reader.next().await {
                    match msg {
                        Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                            Ok(frame) => {
                                if in_tx.send(frame).is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Dropping malformed relay frame: {e}"),
                        },
                        Ok(Message::Binary(_)) => {
                            log::warn!("Dropping relay frame: {}", ProtocolError::Binary);
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                log::debug!("WebSocket reader finished");
            });

            log::debug!("WebSocket connected to {url}");
            Ok(Link {
                outgoing: out_tx,
                incoming: in_rx,
            })
        })
    }
}

//! Transport seam for the live channel: one call opens one connection and
//! hands back its text-frame halves.

use std::pin::Pin;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::config::ClientSettings;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub struct ChannelConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Performs the handshake. The returned stream ends (or yields an error)
    /// when the connection closes for any reason.
    async fn connect(&self, token: &str) -> Result<ChannelConnection>;
}

pub struct WsConnector {
    settings: ClientSettings,
}

impl WsConnector {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<ChannelConnection> {
        let url = self.settings.channel_url(token)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .context("failed to connect websocket")?;
        let (ws_writer, ws_reader) = ws_stream.split();

        let sink = ws_writer
            .sink_map_err(anyhow::Error::from)
            .with(|text: String| future::ready(Ok::<_, anyhow::Error>(Message::Text(text))));

        let stream = ws_reader.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket close frame received");
                    Some(Err(anyhow!("server closed the channel")))
                }
                Ok(_) => None,
                Err(err) => Some(Err(anyhow::Error::from(err))),
            })
        });

        Ok(ChannelConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

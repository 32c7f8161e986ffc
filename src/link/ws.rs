use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector};
use tracing::{debug, info, warn};

use super::{tls, ConnectTarget, Link, LinkConnector};
use crate::error::{Error, Result};

const PROTOO_SUBPROTOCOL: &str = "protoo";
const INCOMING_BUFFER: usize = 100;

/// WebSocket link speaking the `protoo` subprotocol.
pub struct WsLink {
    outgoing: parking_lot::Mutex<Option<mpsc::UnboundedSender<String>>>,
    incoming: Mutex<mpsc::Receiver<String>>,
    reader: JoinHandle<()>,
}

impl WsLink {
    pub async fn connect(target: &ConnectTarget) -> Result<Self> {
        let url = target.url();
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(PROTOO_SUBPROTOCOL),
        );

        let connector = Connector::Rustls(tls::client_config(target.verify_tls)?);
        let (ws_stream, _) = connect_async_tls_with_config(request, None, false, Some(connector))
            .await
            .map_err(|e| Error::Connection(format!("{url}: {e}")))?;
        info!(%url, "link established");

        let (mut write, mut read) = ws_stream.split();
        let (incoming_tx, incoming_rx) = mpsc::channel(INCOMING_BUFFER);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();

        // Handle outgoing messages
        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "failed to write frame");
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("dropping non utf-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "server closed the link");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "link read failed");
                        break;
                    }
                };
                if incoming_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            outgoing: parking_lot::Mutex::new(Some(outgoing_tx)),
            incoming: Mutex::new(incoming_rx),
            reader,
        })
    }
}

#[async_trait]
impl Link for WsLink {
    fn send(&self, message: String) -> Result<()> {
        let outgoing = self.outgoing.lock();
        let tx = outgoing.as_ref().ok_or(Error::Closed)?;
        tx.send(message).map_err(|_| Error::Closed)
    }

    async fn recv(&self) -> Option<String> {
        self.incoming.lock().await.recv().await
    }

    async fn close(&self) {
        // Dropping the sender lets the writer flush and send a close frame.
        self.outgoing.lock().take();
        self.reader.abort();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl LinkConnector for WsConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn Link>> {
        Ok(Arc::new(WsLink::connect(target).await?))
    }
}

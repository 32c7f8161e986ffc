use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::media::{MediaKind, TransportNegotiator};
use crate::signaling::{ConnectWebRtcTransport, Produce, ProduceData, Signaler};

/// Forwards a transport's negotiation callbacks to the room server.
pub(crate) struct SignalingNegotiator {
    signaler: Arc<Signaler>,
    transport_id: String,
}

impl SignalingNegotiator {
    pub fn new(signaler: Arc<Signaler>, transport_id: impl Into<String>) -> Self {
        Self {
            signaler,
            transport_id: transport_id.into(),
        }
    }
}

#[async_trait]
impl TransportNegotiator for SignalingNegotiator {
    async fn connect(&self, dtls_parameters: Value) -> anyhow::Result<()> {
        self.signaler
            .request(&ConnectWebRtcTransport {
                transport_id: self.transport_id.clone(),
                dtls_parameters,
            })
            .await?;
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
    ) -> anyhow::Result<String> {
        let produced = self
            .signaler
            .request(&Produce {
                transport_id: self.transport_id.clone(),
                kind,
                rtp_parameters,
                app_data,
            })
            .await?;
        Ok(produced.id)
    }

    async fn produce_data(
        &self,
        sctp_stream_parameters: Value,
        label: String,
        protocol: String,
        app_data: Value,
    ) -> anyhow::Result<String> {
        let produced = self
            .signaler
            .request(&ProduceData {
                transport_id: self.transport_id.clone(),
                label,
                protocol,
                sctp_stream_parameters,
                app_data,
            })
            .await?;
        Ok(produced.id)
    }
}

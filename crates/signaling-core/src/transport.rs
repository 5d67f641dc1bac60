//! Offer/answer exchange with the signaling endpoint

use async_trait::async_trait;
use crate::error::{SignalingError, SignalingResult};
use crate::types::SessionDescription;
use reqwest::Client;
use tracing::debug;

/// One request/response exchange carrying an offer and returning the answer
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn exchange(
        &self,
        url: &str,
        offer: &SessionDescription,
    ) -> SignalingResult<SessionDescription>;
}

/// JSON over HTTP POST
#[derive(Debug, Clone)]
pub struct HttpSignalingTransport {
    client: Client,
}

impl HttpSignalingTransport {
    pub fn new() -> SignalingResult<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    /// Transport over an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalingTransport for HttpSignalingTransport {
    async fn exchange(
        &self,
        url: &str,
        offer: &SessionDescription,
    ) -> SignalingResult<SessionDescription> {
        debug!("Posting {} to {}", offer.sdp_type, url);
        let response = self.client.post(url).json(offer).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SignalingError::rejected(status.as_u16(), body));
        }

        let body = response.text().await?;
        serde_json::from_str::<SessionDescription>(&body).map_err(|e| {
            SignalingError::transport(format!("unreadable answer from {}: {}", url, e))
        })
    }
}

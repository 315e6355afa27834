//! Client-side result aggregator.
//!
//! Creates a campaign over REST, opens the result stream, authenticates,
//! binds the campaign, and fans decoded frames out onto two unbounded
//! sequences (results, errors). A cancellation token governs the whole
//! lifetime: cancelling closes the socket and both sequences go silent.

use anyhow::{Context, Result, anyhow, bail};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::campaigns::{Campaign, DistributedQueryResult};
use crate::targets::TargetSpec;
use crate::ws::{ClientFrame, ServerFrame};

/// What to run: literal SQL or a saved query id, plus explicit targets.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<u64>,
    pub selected: TargetSpec,
}

/// Problems surfaced on the error sequence. None of these terminate the
/// result sequence unless the connection itself is gone.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("server reported: {0}")]
    Server(String),

    #[error("connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Deserialize)]
struct RunQueryResponseBody {
    campaign: Campaign,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Live handle on one running campaign.
#[derive(Debug)]
pub struct LiveQueryHandle {
    pub campaign: Campaign,
    results_rx: mpsc::UnboundedReceiver<DistributedQueryResult>,
    errors_rx: mpsc::UnboundedReceiver<StreamError>,
    cancel: CancellationToken,
}

impl LiveQueryHandle {
    /// Result sequence. Yields `None` once the stream is finished or
    /// cancelled.
    pub fn results(&mut self) -> &mut mpsc::UnboundedReceiver<DistributedQueryResult> {
        &mut self.results_rx
    }

    /// Error sequence, independent of results.
    pub fn errors(&mut self) -> &mut mpsc::UnboundedReceiver<StreamError> {
        &mut self.errors_rx
    }

    /// Stop streaming. Equivalent to cancelling the token passed to
    /// [`LiveQueryClient::run`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Client for the campaign creation endpoint and the result stream.
#[derive(Debug, Clone)]
pub struct LiveQueryClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl LiveQueryClient {
    /// Create a new client against e.g. `http://localhost:8412`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Create a campaign and stream its results until cancelled.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        request: RunRequest,
    ) -> Result<LiveQueryHandle> {
        let campaign = self.create_campaign(&request).await?;
        debug!("campaign {} created, opening stream", campaign.id);

        let ws_url = format!(
            "{}/api/v1/results/websocket",
            websocket_base(&self.base_url)?
        );
        let (mut socket, _) = connect_async(&ws_url)
            .await
            .context("connecting result stream")?;

        send_frame(
            &mut socket,
            &ClientFrame::Auth {
                token: self.token.clone(),
            },
        )
        .await?;
        send_frame(
            &mut socket,
            &ClientFrame::SelectCampaign {
                campaign_id: campaign.id,
            },
        )
        .await?;

        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let loop_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        let _ = socket.close(None).await;
                        break;
                    }
                    msg = socket.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerFrame>(&text) {
                                Ok(ServerFrame::Result(result)) => {
                                    let _ = results_tx.send(result);
                                }
                                Ok(ServerFrame::Error { message }) => {
                                    let _ = errors_tx.send(StreamError::Server(message));
                                }
                                Err(err) => {
                                    let _ =
                                        errors_tx.send(StreamError::Decode(err.to_string()));
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            // A close the client did not ask for is a
                            // failure, not a normal end of stream.
                            if !loop_cancel.is_cancelled() {
                                let _ = errors_tx.send(StreamError::Connection(
                                    "connection closed by server".to_string(),
                                ));
                            }
                            break;
                        }
                        // Pongs are queued automatically on read.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("result stream connection error: {}", err);
                            let _ = errors_tx.send(StreamError::Connection(err.to_string()));
                            break;
                        }
                    }
                }
            }
            // Dropping the senders closes both sequences.
        });

        Ok(LiveQueryHandle {
            campaign,
            results_rx,
            errors_rx,
            cancel,
        })
    }

    /// Synchronous campaign creation; failures return before any stream is
    /// opened.
    async fn create_campaign(&self, request: &RunRequest) -> Result<Campaign> {
        let url = format!("{}/api/v1/queries/run", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .context("creating campaign")?;

        if !response.status().is_success() {
            let status = response.status();
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.to_string(),
            };
            bail!("campaign creation failed: {}", message);
        }

        let body: RunQueryResponseBody =
            response.json().await.context("decoding campaign")?;
        Ok(body.campaign)
    }
}

async fn send_frame<S>(socket: &mut S, frame: &ClientFrame) -> Result<()>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(frame).context("encoding frame")?;
    socket
        .send(Message::Text(json.into()))
        .await
        .context("sending frame")?;
    Ok(())
}

fn websocket_base(base_url: &str) -> Result<String> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{}", rest))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{}", rest))
    } else {
        Err(anyhow!("unsupported base url: {}", base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_base() {
        assert_eq!(
            websocket_base("http://localhost:8412").unwrap(),
            "ws://localhost:8412"
        );
        assert_eq!(
            websocket_base("https://liveq.example.com").unwrap(),
            "wss://liveq.example.com"
        );
        assert!(websocket_base("ftp://nope").is_err());
    }
}

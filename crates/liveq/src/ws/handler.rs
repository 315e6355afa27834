//! Server side of the result stream protocol.

use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use log::{debug, info, warn};
use tokio::time::{Instant, interval, sleep_until, timeout};

use crate::api::state::AppState;
use crate::auth::Viewer;
use crate::bus::{ResultRecvError, ResultSubscription};

use super::types::{ClientFrame, ServerFrame};

/// WebSocket upgrade handler.
///
/// GET /api/v1/results/websocket
///
/// Authentication happens in-band with the first frame, not through the
/// bearer-token extractor, so this route sits outside the REST auth path.
pub async fn results_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// Run one connection through the protocol state machine. Returning drops
/// the socket and any bus subscription synchronously.
async fn handle_stream(mut socket: WebSocket, state: AppState) {
    let ws_config = state.config.websocket.clone();

    let Some(viewer) = authenticate(&mut socket, &state, ws_config.auth_timeout_secs).await else {
        return;
    };
    info!("result stream authenticated for {}", viewer.username);

    let deadline = Instant::now() + Duration::from_secs(ws_config.session_timeout_secs);
    let mut ping = interval(Duration::from_secs(ws_config.ping_interval_secs));
    ping.tick().await;

    // One campaign binding at a time; replaced wholesale on re-select.
    let mut subscription: Option<ResultSubscription> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::SelectCampaign { campaign_id }) => {
                            debug!(
                                "{} bound to campaign {}",
                                viewer.username, campaign_id
                            );
                            subscription =
                                Some(state.bus.subscribe(&campaign_id.to_string()));
                        }
                        Ok(ClientFrame::Auth { .. }) => {
                            warn!("ws protocol error: auth frame after authentication");
                            break;
                        }
                        Err(err) => {
                            warn!("ws protocol error: malformed frame: {}", err);
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Binary(_))) => {
                    warn!("ws protocol error: binary frame");
                    break;
                }
                Some(Err(err)) => {
                    warn!("ws read error: {}", err);
                    break;
                }
            },

            received = next_result(&mut subscription) => match received {
                Ok(result) => {
                    let frame = ServerFrame::Result(result);
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!("failed to serialize result frame: {}", err);
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(ResultRecvError::Lagged(skipped)) => {
                    let frame = ServerFrame::Error {
                        message: format!("{} results dropped: subscriber too slow", skipped),
                    };
                    if let Ok(json) = serde_json::to_string(&frame) {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(ResultRecvError::Closed) => {
                    subscription = None;
                }
            },

            _ = ping.tick() => {
                if socket.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }

            _ = sleep_until(deadline) => {
                info!("result stream for {} hit session timeout", viewer.username);
                break;
            }
        }
    }

    debug!("result stream for {} closed", viewer.username);
}

/// First-frame authentication. Anything other than a valid `auth` frame
/// within the timeout closes the connection.
async fn authenticate(
    socket: &mut WebSocket,
    state: &AppState,
    timeout_secs: u64,
) -> Option<Viewer> {
    let first = timeout(Duration::from_secs(timeout_secs), socket.recv()).await;
    match first {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Auth { token }) => match state.auth.verify(&token) {
                Some(viewer) => Some(viewer),
                None => {
                    warn!("ws auth rejected: unknown token");
                    None
                }
            },
            Ok(_) => {
                warn!("ws protocol error: expected auth as first frame");
                None
            }
            Err(err) => {
                warn!("ws protocol error: malformed auth frame: {}", err);
                None
            }
        },
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => None,
        Ok(Some(Ok(_))) => {
            warn!("ws protocol error: non-text first frame");
            None
        }
        Ok(Some(Err(err))) => {
            warn!("ws read error during auth: {}", err);
            None
        }
        Err(_) => {
            warn!("ws auth timed out");
            None
        }
    }
}

/// Pends forever while unbound so the select loop stays parked on client
/// frames until a campaign is selected.
async fn next_result(
    subscription: &mut Option<ResultSubscription>,
) -> Result<crate::campaigns::DistributedQueryResult, ResultRecvError> {
    match subscription {
        Some(active) => active.recv().await,
        None => futures::future::pending().await,
    }
}

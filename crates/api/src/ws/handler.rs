use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use fetchplane_core::error::CoreError;
use fetchplane_core::progress::ProgressEvent;
use fetchplane_core::types::{DbId, JobId};

use crate::engine::progress::Subscription;
use crate::error::{AppError, AppResult};
use crate::handlers::jobs::find_and_authorize;
use crate::middleware::auth::AuthUser;
use crate::state::AppState;

/// Browsers cannot set headers on a WebSocket handshake, so the access
/// token may also arrive as `?token=`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// GET /api/v1/jobs/{id}/stream
///
/// Upgrade to a WebSocket that carries the job's progress events as JSON
/// text frames. The first frame is the current snapshot. The stream closes
/// after a terminal snapshot.
pub async fn job_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let token = crate::middleware::bearer_token(&headers)
        .map(str::to_owned)
        .or(query.token)
        .ok_or_else(|| AppError::Core(CoreError::Unauthorized("Missing access token".into())))?;
    let auth = AuthUser::from_token(&token, &state.config.jwt)?;

    find_and_authorize(&state.pool, job_id, &auth, "watch").await?;
    let subscription = state.progress_hub.subscribe(job_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id, job_id, subscription)))
}

/// Manage a single stream after upgrade.
///
/// Splits the socket, registers the connection with `WsManager`, spawns a
/// sender task that merges control frames with progress events, and reads
/// inbound frames until the client goes away.
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user_id: DbId,
    job_id: JobId,
    mut events: Subscription,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let ws_manager = state.ws_manager;

    let mut control = ws_manager.add(conn_id.clone(), user_id, job_id).await;
    let watchers = ws_manager.watchers_of(job_id).await;
    tracing::info!(
        conn_id = %conn_id,
        job_id = %job_id,
        user_id,
        watchers,
        "Job stream opened",
    );

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                msg = control.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => {
                        let terminal = matches!(
                            &event,
                            ProgressEvent::Snapshot(s) if s.status.is_terminal()
                        );
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to encode progress event");
                                continue;
                            }
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                        if terminal {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                        continue;
                    }
                    // Actor evicted or shutting down.
                    None => Message::Close(None),
                },
            };

            let closing = matches!(frame, Message::Close(_));
            if sink.send(frame).await.is_err() || closing {
                break;
            }
        }
        tracing::debug!(conn_id = %sender_conn_id, "Job stream sink closed");
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(conn_id = %conn_id, "Pong received");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(conn_id = %conn_id, job_id = %job_id, "Job stream closed");
}

// WebSocket handler: handshake, then a bidirectional pump between the
// socket and the game server.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AppState;
use crate::engine::game::ClientCommand;

/// WebSocket upgrade handler for the game connection.
pub async fn ws_game(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: AppState) {
    // The first message must be the hello handshake; anything else drops
    // the connection before it touches the game.
    let (identity, name) = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(ClientCommand::Hello { identity, name }) => break (identity, name),
                    _ => {
                        tracing::debug!("closing connection: first message was not hello");
                        return;
                    }
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            _ => return,
        }
    };

    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.game_server.connect(conn_id, identity, name, tx).await;

    loop {
        tokio::select! {
            // Outbound message from the game server
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            // Client disconnected
                            break;
                        }
                    }
                    // Sender dropped: this session was kicked
                    None => {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            // Inbound client command
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => state.game_server.handle_command(conn_id, cmd).await,
                            Err(err) => {
                                tracing::debug!(conn_id = %conn_id, %err, "ignoring malformed command");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.game_server.disconnect(conn_id).await;
}

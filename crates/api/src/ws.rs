use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::broadcast::error::RecvError;

use crate::state::{AppState, SocketMessage};

pub async fn prices_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_prices(socket, state))
}

async fn stream_prices(mut socket: WebSocket, state: AppState) {
    let mut prices = state.subscribe_prices();
    let status = state.engine().status();
    let connected = SocketMessage::Connected {
        running: status.running,
        tracked: status.tracked,
    };
    if send_message(&mut socket, &connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
            event = prices.recv() => {
                match event {
                    Ok(event) => {
                        if send_message(&mut socket, &SocketMessage::Price(event)).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "price socket lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => return,
                }
            }
        }
    }
}

async fn send_message(socket: &mut WebSocket, message: &SocketMessage) -> Result<(), ()> {
    let payload = serde_json::to_string(message).map_err(|_| ())?;
    socket.send(Message::Text(payload)).await.map_err(|_| ())
}

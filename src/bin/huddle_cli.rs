use std::error::Error;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{self, AsyncBufReadExt};
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8080".to_string());
    let room = args.next().unwrap_or_else(|| "lobby".to_string());
    let player = args.next().unwrap_or_else(|| "player1".to_string());

    // 1. Connect and upgrade to WebSocket.
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr)).await?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    // 2. Join the room.
    let join = format!(
        r#"{{"type":"join","room":{},"player":{}}}"#,
        serde_json::Value::String(room.clone()),
        serde_json::Value::String(player.clone()),
    );
    ws_tx.send(Message::Text(join.into())).await?;

    // 3. Print everything the room sends us.
    tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            if let Message::Text(text) = msg {
                println!("<< {}", text);
            }
        }
    });

    println!("Joined '{}' as '{}'.", room, player);
    println!("Type a line and press Enter to broadcast it as an update:");

    // 4. Each stdin line becomes an update broadcast to the room.
    let stdin = io::BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let update = format!(
            r#"{{"type":"update","say":{}}}"#,
            serde_json::Value::String(line),
        );
        ws_tx.send(Message::Text(update.into())).await?;
    }

    Ok(())
}

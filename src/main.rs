use huddle::{DEFAULT_RELAY_PORT, RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(DEFAULT_RELAY_PORT);
    let bind_addr = format!("0.0.0.0:{}", port);

    println!("   Huddle Presence Relay");
    println!("   Binding to {}", bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RelayServer::bind(&bind_addr, RelayConfig::default()).await?;
    server.run().await
}

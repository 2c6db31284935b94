mod config;
mod error;
mod messages;
mod models;
mod router;
mod server;

use log::{info, warn};

use config::ServerConfig;
use server::Server;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    info!("Loaded configuration: {config:?}");

    let server = Server::new(&config);
    let _sweeper = server.spawn_sweeper(config.sweep_interval);

    let routes = server::routes(server);

    match config.tls_paths() {
        Some((cert, key)) => {
            info!("Starting secure chat server (HTTPS/WSS) on {}", config.addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(config.addr)
                .await;
        }
        None => {
            if config.tls_cert.is_some() || config.tls_key.is_some() {
                warn!("TLS not fully configured, falling back to HTTP/WS");
            }
            info!("Chat server running on {} (ws at /ws, stats at /stats)", config.addr);
            warp::serve(routes).run(config.addr).await;
        }
    }
}

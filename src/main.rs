mod api;
mod classifier;
mod config;
mod evidence;
mod import;
mod proxy;
mod session;
mod validation;
mod xray;

use crate::api::build_api;
use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env();
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    let router = build_api(config).await;
    println!("evimport listening on {}", addr);
    axum::serve(listener, router).await.unwrap();
}

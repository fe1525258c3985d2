#![warn(clippy::all, clippy::pedantic)]

use std::env::var;
use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tracing::info;
use uppe_scheduler::{RedisStateStore, StateStore};

mod error;
mod routes;

use error::AppError;
use logger::init_tracing;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let redis_url = var("UPPE_REDIS_URL").map_err(|_| AppError::MissingEnv("UPPE_REDIS_URL"))?;
    let addr: SocketAddr = var("UPPE_HTTP_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.into()).parse()?;

    let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&redis_url)?);
    run_server(addr, store).await
}

async fn run_server(addr: SocketAddr, store: Arc<dyn StateStore>) -> Result<(), AppError> {
    let store = web::Data::from(store);
    info!("Health server listening on {addr}");

    HttpServer::new(move || App::new().app_data(store.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}

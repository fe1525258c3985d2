use actix_web::{HttpResponse, get, web};
use serde::Serialize;
use uppe_scheduler::StateStore;

use crate::error::AppError;

macros_utils::routes! {
    route leader_route,
    route schedule_route,
}

#[derive(Debug, Serialize)]
struct LeaderBody {
    leader: Option<String>,
}

/// Replica currently holding the leader lock, `null` when nobody does
#[get("/leader")]
pub async fn leader_route(store: web::Data<dyn StateStore>) -> Result<HttpResponse, AppError> {
    let leader = store.current_leader().await?;
    Ok(HttpResponse::Ok().json(LeaderBody { leader }))
}

/// Depth of the due and lease sets
#[get("/schedule")]
pub async fn schedule_route(store: web::Data<dyn StateStore>) -> Result<HttpResponse, AppError> {
    let counts = store.counts().await?;
    Ok(HttpResponse::Ok().json(counts))
}

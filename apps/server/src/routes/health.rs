use actix_web::{HttpResponse, Responder, get};

macros_utils::routes! {
    route liveness_route,
}

/// Liveness probe for the replica fleet's health checks.
/// Answers 200 with an empty body as long as the process serves requests.
#[get("/")]
pub async fn liveness_route() -> impl Responder {
    HttpResponse::Ok().finish()
}

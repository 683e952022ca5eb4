use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};
use argocd_operator::controllers::argocd_controller::State;
use prometheus::{Encoder, TextEncoder};
use tracing::warn;

#[get("/metrics")]
pub async fn metrics(state: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = state.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => {
            warn!("failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

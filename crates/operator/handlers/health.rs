use actix_web::{get, web::Data, HttpRequest, HttpResponse, Responder};
use argocd_operator::controllers::argocd_controller::State;

#[get("/health")]
pub async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

/// Time of the last reconciliation, as seen by the controller
#[get("/")]
pub async fn index(state: Data<State>, _req: HttpRequest) -> impl Responder {
    let diagnostics = state.diagnostics().await;
    HttpResponse::Ok().json(&diagnostics)
}

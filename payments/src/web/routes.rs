// orderflow/payments/src/web/routes.rs

use actix_web::middleware::from_fn;
use actix_web::web;

use crate::web::csrf::{issue_csrf_token_handler, require_csrf_token};
use crate::web::handlers::{offsite_handlers, payment_handlers};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg
    .route("/health", web::get().to(health_check_handler))
    .service(
      web::scope("/payments")
        .route("/csrf-token", web::get().to(issue_csrf_token_handler))
        // Off-site gateways send the customer back here; no anti-forgery token is available.
        .service(
          web::resource("/complete-payment")
            .route(web::get().to(payment_handlers::complete_payment_handler))
            .route(web::post().to(payment_handlers::complete_payment_handler)),
        )
        .service(
          web::resource("/pay")
            .wrap(from_fn(require_csrf_token))
            .route(web::post().to(payment_handlers::pay_handler)),
        )
        .service(
          web::scope("/transactions")
            .wrap(from_fn(require_csrf_token))
            .route("/{id}/capture", web::post().to(payment_handlers::capture_handler))
            .route("/{id}/refund", web::post().to(payment_handlers::refund_handler)),
        ),
    )
    .route(
      "/mock-offsite/checkout",
      web::get().to(offsite_handlers::hosted_checkout_handler),
    );
}

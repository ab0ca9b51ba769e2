// orderflow/payments/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use orderflow_payments::config::AppConfig;
use orderflow_payments::gateways::mock::{DummyGateway, OffsiteGateway};
use orderflow_payments::gateways::GatewayRegistry;
use orderflow_payments::seed::seed_demo_data;
use orderflow_payments::services::calculator::{FlatShipping, OrderCalculator};
use orderflow_payments::state::AppState;
use orderflow_payments::store::Stores;
use orderflow_payments::web::configure_app_routes;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

const DUMMY_GATEWAY_ID: i64 = 1;
const OFFSITE_GATEWAY_ID: i64 = 2;

fn init_tracing(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

async fn connect_stores(config: &AppConfig) -> std::io::Result<Stores> {
  let Some(database_url) = config.database_url.as_deref() else {
    tracing::warn!("DATABASE_URL not set; using in-memory stores.");
    return Ok(Stores::in_memory());
  };

  let pool = PgPool::connect(database_url).await.map_err(|e| {
    tracing::error!(error = %e, "Failed to connect to the database.");
    IoError::new(ErrorKind::Other, e)
  })?;
  sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
    tracing::error!(error = %e, "Failed to run database migrations.");
    IoError::new(ErrorKind::Other, e)
  })?;
  tracing::info!("Connected to the database and applied migrations.");
  Ok(Stores::postgres(pool))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let log_json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
  init_tracing(log_json);

  tracing::info!("Starting payments server...");

  let app_config = AppConfig::from_env().map_err(|e| {
    tracing::error!(error = %e, "Failed to load application configuration.");
    IoError::new(ErrorKind::InvalidInput, e.to_string())
  })?;

  let stores = connect_stores(&app_config).await?;

  let gateways = GatewayRegistry::new()
    .with(Arc::new(DummyGateway::new(DUMMY_GATEWAY_ID)))
    .with(Arc::new(OffsiteGateway::new(
      OFFSITE_GATEWAY_ID,
      app_config.mock_offsite_checkout_url.clone(),
    )));
  let calculator = OrderCalculator::new().with_adjuster(Arc::new(FlatShipping { amount: dec!(5.00) }));

  if app_config.seed_db {
    let currency = app_config.primary_currency().to_string();
    if let Err(e) = seed_demo_data(&stores, &calculator, &currency, DUMMY_GATEWAY_ID).await {
      tracing::error!(error = %e, "Failed to seed demo data.");
    }
  }

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  let app_state = AppState::build(app_config, stores, gateways, calculator);
  tracing::info!(gateways = ?app_state.gateways.ids(), "Payment pipelines registered.");

  tracing::info!("Binding server to {}...", server_address);
  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}

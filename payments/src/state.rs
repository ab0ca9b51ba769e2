// orderflow/payments/src/state.rs
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::gateways::GatewayRegistry;
use crate::pipelines;
use crate::services::calculator::OrderCalculator;
use crate::services::ledger::TransactionLedger;
use crate::services::orchestrator::PaymentOrchestrator;
use crate::services::payments::PaymentService;
use crate::services::price_guard::OrderPriceGuard;
use crate::store::Stores;
use orderflow::FlowRegistry;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub stores: Stores,
  pub gateways: Arc<GatewayRegistry>,
  pub price_guard: OrderPriceGuard,
  pub payments: PaymentService,
  pub flow: Arc<FlowRegistry<AppError>>,
  pub config: Arc<AppConfig>,
}

impl AppState {
  /// Wires services over `stores` and registers the payment pipelines.
  pub fn build(config: AppConfig, stores: Stores, gateways: GatewayRegistry, calculator: OrderCalculator) -> Self {
    let config = Arc::new(config);
    let gateways = Arc::new(gateways);
    let ledger = TransactionLedger::new(stores.transactions.clone(), config.payment_currencies.clone());
    let payments = PaymentService::new(
      stores.orders.clone(),
      stores.histories.clone(),
      stores.payment_sources.clone(),
      ledger,
      gateways.clone(),
      config.clone(),
    );
    let price_guard = OrderPriceGuard::new(Arc::new(calculator), stores.orders.clone());

    let state = Self {
      stores,
      gateways,
      price_guard,
      payments,
      flow: Arc::new(FlowRegistry::<AppError>::new()),
      config,
    };
    pipelines::register_all_pipelines(&state.flow, &state);
    state
  }

  pub fn orchestrator(&self) -> PaymentOrchestrator {
    PaymentOrchestrator::new(self.clone())
  }
}

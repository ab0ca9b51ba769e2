// orderflow/payments/src/services/mod.rs

pub mod calculator;
pub mod ledger;
pub mod orchestrator;
pub mod payments;
pub mod price_guard;
pub mod requester;

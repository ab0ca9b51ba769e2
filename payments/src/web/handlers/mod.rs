// orderflow/payments/src/web/handlers/mod.rs

pub mod offsite_handlers;
pub mod payment_handlers;

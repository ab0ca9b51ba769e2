// orderflow/payments/src/lib.rs

//! Order payment pipeline and transaction ledger, served over actix-web.

pub mod config;
pub mod errors;
pub mod gateways;
pub mod models;
pub mod pipelines;
pub mod seed;
pub mod services;
pub mod state;
pub mod store;
pub mod web;

// orderflow/payments/src/models/mod.rs

//! Data structures persisted by the payment stores.

pub mod currency;
pub mod order;
pub mod order_history;
pub mod payment_source;
pub mod transaction;

pub use currency::PaymentCurrency;
pub use order::{Adjustment, AdjustmentKind, LineItem, Order, OrderProjection, PaidStatus, RecalculationMode};
pub use order_history::OrderHistory;
pub use payment_source::{NewPaymentSource, PaymentSource};
pub use transaction::{Transaction, TransactionOutcome, TransactionStatus, TransactionType};

// orderflow/payments/src/store/mod.rs

//! Persistence ports used by the payment services, with in-memory and PostgreSQL backends.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::errors::Result;
use crate::models::{NewPaymentSource, Order, OrderHistory, PaymentSource, Transaction, TransactionOutcome, TransactionStatus};

#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Stores a new order and returns it with its id assigned.
  async fn insert(&self, order: Order) -> Result<Order>;
  async fn find_by_id(&self, id: i64) -> Result<Option<Order>>;
  async fn find_by_number(&self, number: &str) -> Result<Option<Order>>;
  async fn find_by_customer(&self, customer_id: i64) -> Result<Vec<Order>>;
  async fn find_by_email(&self, email: &str) -> Result<Vec<Order>>;
  /// Persists `order` only if the stored version still equals `order.version`, then bumps
  /// the version on both sides. A stale version yields `AppError::Conflict`.
  async fn save(&self, order: &mut Order) -> Result<()>;
}

/// Decides, from an order's transactions as they stand at insert time, whether a child row may
/// be added.
pub type ChildAdmission<'a> = &'a (dyn Fn(&[Transaction]) -> bool + Send + Sync);

#[async_trait]
pub trait TransactionStore: Send + Sync {
  async fn insert(&self, transaction: Transaction) -> Result<Transaction>;
  /// Inserts a capture or refund row if `admit` accepts the order's current transactions.
  /// Inserts below the same parent are serialized with the check. `None` when refused.
  async fn insert_child(&self, child: Transaction, admit: ChildAdmission<'_>) -> Result<Option<Transaction>>;
  async fn find_by_id(&self, id: i64) -> Result<Option<Transaction>>;
  async fn find_by_hash(&self, hash: &str) -> Result<Option<Transaction>>;
  /// All transactions of an order, oldest first.
  async fn find_by_order(&self, order_id: i64) -> Result<Vec<Transaction>>;
  /// Atomically applies `outcome` if the row's current status is one of `from`.
  /// Returns `None` when the row was already in another state.
  async fn transition(
    &self,
    id: i64,
    from: &[TransactionStatus],
    outcome: &TransactionOutcome,
  ) -> Result<Option<Transaction>>;
  /// Takes over a `processing` row whose last update is older than `stale_before`, refreshing
  /// its timestamp. `None` when the row is not processing or was touched more recently.
  async fn reclaim_stale(&self, id: i64, stale_before: DateTime<Utc>) -> Result<Option<Transaction>>;
}

#[async_trait]
pub trait PaymentSourceStore: Send + Sync {
  async fn insert(&self, source: NewPaymentSource) -> Result<PaymentSource>;
  async fn find_by_id(&self, id: i64) -> Result<Option<PaymentSource>>;
  async fn find_by_user(&self, user_id: i64) -> Result<Vec<PaymentSource>>;
}

#[async_trait]
pub trait OrderHistoryStore: Send + Sync {
  async fn insert(&self, history: OrderHistory) -> Result<OrderHistory>;
  async fn find_by_order(&self, order_id: i64) -> Result<Vec<OrderHistory>>;
}

/// The set of stores the application runs against.
#[derive(Clone)]
pub struct Stores {
  pub orders: Arc<dyn OrderStore>,
  pub transactions: Arc<dyn TransactionStore>,
  pub payment_sources: Arc<dyn PaymentSourceStore>,
  pub histories: Arc<dyn OrderHistoryStore>,
}

impl Stores {
  pub fn in_memory() -> Self {
    Self {
      orders: Arc::new(memory::InMemoryOrderStore::new()),
      transactions: Arc::new(memory::InMemoryTransactionStore::new()),
      payment_sources: Arc::new(memory::InMemoryPaymentSourceStore::new()),
      histories: Arc::new(memory::InMemoryOrderHistoryStore::new()),
    }
  }

  pub fn postgres(pool: sqlx::PgPool) -> Self {
    let store = postgres::PgStore::new(pool);
    Self {
      orders: Arc::new(store.clone()),
      transactions: Arc::new(store.clone()),
      payment_sources: Arc::new(store.clone()),
      histories: Arc::new(store),
    }
  }
}

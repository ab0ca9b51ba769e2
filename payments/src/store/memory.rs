// orderflow/payments/src/store/memory.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ChildAdmission, OrderHistoryStore, OrderStore, PaymentSourceStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::{NewPaymentSource, Order, OrderHistory, PaymentSource, Transaction, TransactionOutcome, TransactionStatus};

struct Table<T> {
  rows: RwLock<HashMap<i64, T>>,
  next_id: AtomicI64,
}

impl<T> Default for Table<T> {
  fn default() -> Self {
    Self { rows: RwLock::new(HashMap::new()), next_id: AtomicI64::new(0) }
  }
}

impl<T> Table<T> {
  fn allocate_id(&self) -> i64 {
    self.next_id.fetch_add(1, Ordering::SeqCst) + 1
  }
}

/// Orders kept in a process-local map. Validation errors are stripped on write.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
  table: Arc<Table<Order>>,
}

impl InMemoryOrderStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
  async fn insert(&self, mut order: Order) -> Result<Order> {
    order.id = self.table.allocate_id();
    order.version = 1;
    order.errors.clear();
    self.table.rows.write().await.insert(order.id, order.clone());
    Ok(order)
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<Order>> {
    Ok(self.table.rows.read().await.get(&id).cloned())
  }

  async fn find_by_number(&self, number: &str) -> Result<Option<Order>> {
    let rows = self.table.rows.read().await;
    Ok(rows.values().find(|o| o.number == number).cloned())
  }

  async fn find_by_customer(&self, customer_id: i64) -> Result<Vec<Order>> {
    let rows = self.table.rows.read().await;
    let mut orders: Vec<Order> = rows
      .values()
      .filter(|o| o.is_completed && o.customer_id == Some(customer_id))
      .cloned()
      .collect();
    orders.sort_by_key(|o| o.id);
    Ok(orders)
  }

  async fn find_by_email(&self, email: &str) -> Result<Vec<Order>> {
    let rows = self.table.rows.read().await;
    let mut orders: Vec<Order> = rows
      .values()
      .filter(|o| o.is_completed && o.email_matches(Some(email)))
      .cloned()
      .collect();
    orders.sort_by_key(|o| o.id);
    Ok(orders)
  }

  async fn save(&self, order: &mut Order) -> Result<()> {
    let mut rows = self.table.rows.write().await;
    let stored = rows
      .get(&order.id)
      .ok_or_else(|| AppError::NotFound(format!("Order {} does not exist", order.id)))?;
    if stored.version != order.version {
      return Err(AppError::Conflict(format!(
        "Order {} was modified concurrently (expected version {}, found {})",
        order.id, order.version, stored.version
      )));
    }
    order.version += 1;
    order.date_updated = Utc::now();
    let mut row = order.clone();
    row.errors.clear();
    rows.insert(order.id, row);
    Ok(())
  }
}

#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
  table: Arc<Table<Transaction>>,
}

impl InMemoryTransactionStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
  async fn insert(&self, mut transaction: Transaction) -> Result<Transaction> {
    let mut rows = self.table.rows.write().await;
    if rows.values().any(|t| t.hash == transaction.hash) {
      return Err(AppError::Conflict("Duplicate transaction hash".to_string()));
    }
    transaction.id = self.table.allocate_id();
    rows.insert(transaction.id, transaction.clone());
    Ok(transaction)
  }

  async fn insert_child(&self, mut child: Transaction, admit: ChildAdmission<'_>) -> Result<Option<Transaction>> {
    let mut rows = self.table.rows.write().await;
    let mut siblings: Vec<Transaction> = rows.values().filter(|t| t.order_id == child.order_id).cloned().collect();
    siblings.sort_by_key(|t| t.id);
    if !admit(&siblings) {
      return Ok(None);
    }
    child.id = self.table.allocate_id();
    rows.insert(child.id, child.clone());
    Ok(Some(child))
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<Transaction>> {
    Ok(self.table.rows.read().await.get(&id).cloned())
  }

  async fn find_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
    let rows = self.table.rows.read().await;
    Ok(rows.values().find(|t| t.hash == hash).cloned())
  }

  async fn find_by_order(&self, order_id: i64) -> Result<Vec<Transaction>> {
    let rows = self.table.rows.read().await;
    let mut transactions: Vec<Transaction> = rows.values().filter(|t| t.order_id == order_id).cloned().collect();
    transactions.sort_by_key(|t| t.id);
    Ok(transactions)
  }

  async fn transition(
    &self,
    id: i64,
    from: &[TransactionStatus],
    outcome: &TransactionOutcome,
  ) -> Result<Option<Transaction>> {
    let mut rows = self.table.rows.write().await;
    let Some(row) = rows.get_mut(&id) else {
      return Err(AppError::NotFound(format!("Transaction {} does not exist", id)));
    };
    if !from.contains(&row.status) || !row.status.can_transition_to(outcome.status) {
      return Ok(None);
    }
    row.apply_outcome(outcome, Utc::now());
    Ok(Some(row.clone()))
  }

  async fn reclaim_stale(&self, id: i64, stale_before: DateTime<Utc>) -> Result<Option<Transaction>> {
    let mut rows = self.table.rows.write().await;
    let Some(row) = rows.get_mut(&id) else {
      return Err(AppError::NotFound(format!("Transaction {} does not exist", id)));
    };
    if row.status != TransactionStatus::Processing || row.date_updated >= stale_before {
      return Ok(None);
    }
    row.date_updated = Utc::now();
    Ok(Some(row.clone()))
  }
}

#[derive(Default, Clone)]
pub struct InMemoryPaymentSourceStore {
  table: Arc<Table<PaymentSource>>,
}

impl InMemoryPaymentSourceStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl PaymentSourceStore for InMemoryPaymentSourceStore {
  async fn insert(&self, source: NewPaymentSource) -> Result<PaymentSource> {
    let source = PaymentSource {
      id: self.table.allocate_id(),
      user_id: source.user_id,
      gateway_id: source.gateway_id,
      token: source.token,
      description: source.description,
      response: source.response,
      date_created: Utc::now(),
    };
    self.table.rows.write().await.insert(source.id, source.clone());
    Ok(source)
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<PaymentSource>> {
    Ok(self.table.rows.read().await.get(&id).cloned())
  }

  async fn find_by_user(&self, user_id: i64) -> Result<Vec<PaymentSource>> {
    let rows = self.table.rows.read().await;
    let mut sources: Vec<PaymentSource> = rows.values().filter(|s| s.user_id == user_id).cloned().collect();
    sources.sort_by_key(|s| s.id);
    Ok(sources)
  }
}

#[derive(Default, Clone)]
pub struct InMemoryOrderHistoryStore {
  table: Arc<Table<OrderHistory>>,
}

impl InMemoryOrderHistoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl OrderHistoryStore for InMemoryOrderHistoryStore {
  async fn insert(&self, mut history: OrderHistory) -> Result<OrderHistory> {
    history.id = self.table.allocate_id();
    self.table.rows.write().await.insert(history.id, history.clone());
    Ok(history)
  }

  async fn find_by_order(&self, order_id: i64) -> Result<Vec<OrderHistory>> {
    let rows = self.table.rows.read().await;
    let mut entries: Vec<OrderHistory> = rows.values().filter(|h| h.order_id == order_id).cloned().collect();
    entries.sort_by_key(|h| h.id);
    Ok(entries)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{LineItem, TransactionType};
  use rust_decimal_macros::dec;

  #[tokio::test]
  async fn stale_order_saves_are_rejected() {
    let store = InMemoryOrderStore::new();
    let mut first = store.insert(Order::new_cart("USD")).await.unwrap();
    let mut second = first.clone();

    first.line_items.push(LineItem::new(1, "Mug", 1, dec!(12.00)));
    store.save(&mut first).await.unwrap();
    assert_eq!(first.version, 2);

    second.email = Some("late@example.com".into());
    let err = store.save(&mut second).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(second.version, 1);

    let stored = store.find_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(stored.total_qty(), 1);
    assert!(stored.email.is_none());
  }

  #[tokio::test]
  async fn order_errors_are_not_persisted() {
    let store = InMemoryOrderStore::new();
    let mut order = store.insert(Order::new_cart("USD")).await.unwrap();
    order.add_error("totalPrice", "changed");
    store.save(&mut order).await.unwrap();
    assert!(order.has_errors());
    assert!(!store.find_by_id(order.id).await.unwrap().unwrap().has_errors());
  }

  #[tokio::test]
  async fn completed_orders_are_found_by_customer_and_email() {
    let store = InMemoryOrderStore::new();
    let mut paid = Order::new_cart("USD");
    paid.customer_id = Some(5);
    paid.email = Some("five@example.com".into());
    paid.mark_as_complete(Utc::now());
    let paid = store.insert(paid).await.unwrap();

    let mut cart = Order::new_cart("USD");
    cart.customer_id = Some(5);
    cart.email = Some("five@example.com".into());
    store.insert(cart).await.unwrap();

    let by_customer = store.find_by_customer(5).await.unwrap();
    assert_eq!(by_customer.iter().map(|o| o.id).collect::<Vec<_>>(), vec![paid.id]);
    let by_email = store.find_by_email("FIVE@example.com").await.unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(store.find_by_number(&paid.number).await.unwrap().map(|o| o.id), Some(paid.id));
  }

  #[tokio::test]
  async fn transition_applies_only_from_allowed_states() {
    let store = InMemoryTransactionStore::new();
    let tx = store.insert(Transaction::new(1, 1, TransactionType::Purchase)).await.unwrap();

    let claimed = store
      .transition(tx.id, &[TransactionStatus::Pending], &TransactionOutcome::status(TransactionStatus::Processing))
      .await
      .unwrap();
    assert_eq!(claimed.map(|t| t.status), Some(TransactionStatus::Processing));

    let again = store
      .transition(tx.id, &[TransactionStatus::Pending], &TransactionOutcome::status(TransactionStatus::Processing))
      .await
      .unwrap();
    assert!(again.is_none());

    let done = store
      .transition(tx.id, &[TransactionStatus::Processing], &TransactionOutcome::failed("declined"))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(done.status, TransactionStatus::Failed);
    assert_eq!(store.find_by_hash(&tx.hash).await.unwrap().unwrap().status, TransactionStatus::Failed);
  }

  #[tokio::test]
  async fn child_inserts_see_earlier_children() {
    let store = InMemoryTransactionStore::new();
    let parent = store.insert(Transaction::new(1, 1, TransactionType::Purchase)).await.unwrap();
    let only_child = |rows: &[Transaction]| !rows.iter().any(|t| t.parent_id == Some(parent.id));

    let mut first = Transaction::new(1, 1, TransactionType::Refund);
    first.parent_id = Some(parent.id);
    assert!(store.insert_child(first, &only_child).await.unwrap().is_some());

    let mut second = Transaction::new(1, 1, TransactionType::Refund);
    second.parent_id = Some(parent.id);
    assert!(store.insert_child(second, &only_child).await.unwrap().is_none());
    assert_eq!(store.find_by_order(1).await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn only_stale_processing_rows_are_reclaimed() {
    let store = InMemoryTransactionStore::new();
    let tx = store.insert(Transaction::new(1, 1, TransactionType::Purchase)).await.unwrap();
    assert!(store.reclaim_stale(tx.id, Utc::now()).await.unwrap().is_none());

    store
      .transition(tx.id, &[TransactionStatus::Pending], &TransactionOutcome::status(TransactionStatus::Processing))
      .await
      .unwrap();
    let long_ago = Utc::now() - chrono::Duration::seconds(60);
    assert!(store.reclaim_stale(tx.id, long_ago).await.unwrap().is_none());

    let later = Utc::now() + chrono::Duration::seconds(1);
    let reclaimed = store.reclaim_stale(tx.id, later).await.unwrap().unwrap();
    assert_eq!(reclaimed.status, TransactionStatus::Processing);
    assert!(store.reclaim_stale(tx.id, reclaimed.date_updated).await.unwrap().is_none());
  }
}

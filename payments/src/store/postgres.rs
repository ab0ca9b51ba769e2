// orderflow/payments/src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgExecutor, PgPool};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use super::{ChildAdmission, OrderHistoryStore, OrderStore, PaymentSourceStore, TransactionStore};
use crate::errors::{AppError, Result};
use crate::models::{
  Adjustment, LineItem, NewPaymentSource, Order, OrderHistory, PaymentSource, RecalculationMode, Transaction,
  TransactionOutcome, TransactionStatus,
};

/// All four stores over one connection pool.
#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

const ORDER_COLUMNS: &str = "id, number, email, customer_id, currency, payment_currency, line_items, adjustments, \
  total_paid, gateway_id, payment_source_id, billing_address_id, shipping_address_id, shipping_method_handle, \
  is_completed, is_active_cart, recalculation_mode, register_user_on_order_complete, return_url, cancel_url, \
  field_values, date_ordered, date_paid, date_created, date_updated, version";

const TRANSACTION_COLUMNS: &str = "id, hash, order_id, parent_id, gateway_id, user_id, kind, status, amount, \
  currency, payment_amount, payment_currency, payment_rate, reference, code, message, note, response, \
  date_created, date_updated";

#[derive(FromRow)]
struct OrderRow {
  id: i64,
  number: String,
  email: Option<String>,
  customer_id: Option<i64>,
  currency: String,
  payment_currency: String,
  line_items: Json<Vec<LineItem>>,
  adjustments: Json<Vec<Adjustment>>,
  total_paid: Decimal,
  gateway_id: Option<i64>,
  payment_source_id: Option<i64>,
  billing_address_id: Option<i64>,
  shipping_address_id: Option<i64>,
  shipping_method_handle: Option<String>,
  is_completed: bool,
  is_active_cart: bool,
  recalculation_mode: RecalculationMode,
  register_user_on_order_complete: bool,
  return_url: Option<String>,
  cancel_url: Option<String>,
  field_values: Json<BTreeMap<String, Value>>,
  date_ordered: Option<DateTime<Utc>>,
  date_paid: Option<DateTime<Utc>>,
  date_created: DateTime<Utc>,
  date_updated: DateTime<Utc>,
  version: i64,
}

impl From<OrderRow> for Order {
  fn from(row: OrderRow) -> Self {
    Order {
      id: row.id,
      number: row.number,
      email: row.email,
      customer_id: row.customer_id,
      currency: row.currency,
      payment_currency: row.payment_currency,
      line_items: row.line_items.0,
      adjustments: row.adjustments.0,
      total_paid: row.total_paid,
      gateway_id: row.gateway_id,
      payment_source_id: row.payment_source_id,
      billing_address_id: row.billing_address_id,
      shipping_address_id: row.shipping_address_id,
      shipping_method_handle: row.shipping_method_handle,
      is_completed: row.is_completed,
      is_active_cart: row.is_active_cart,
      recalculation_mode: row.recalculation_mode,
      register_user_on_order_complete: row.register_user_on_order_complete,
      return_url: row.return_url,
      cancel_url: row.cancel_url,
      field_values: row.field_values.0,
      date_ordered: row.date_ordered,
      date_paid: row.date_paid,
      date_created: row.date_created,
      date_updated: row.date_updated,
      version: row.version,
      errors: BTreeMap::new(),
    }
  }
}

#[async_trait]
impl OrderStore for PgStore {
  #[instrument(name = "pg::order_insert", skip(self, order), fields(number = %order.number))]
  async fn insert(&self, order: Order) -> Result<Order> {
    let sql = format!(
      "INSERT INTO orders (number, email, customer_id, currency, payment_currency, line_items, adjustments, \
       total_paid, gateway_id, payment_source_id, billing_address_id, shipping_address_id, shipping_method_handle, \
       is_completed, is_active_cart, recalculation_mode, register_user_on_order_complete, return_url, cancel_url, \
       field_values, date_ordered, date_paid, version) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, 1) \
       RETURNING {}",
      ORDER_COLUMNS
    );
    let row = sqlx::query_as::<_, OrderRow>(&sql)
      .bind(&order.number)
      .bind(&order.email)
      .bind(order.customer_id)
      .bind(&order.currency)
      .bind(&order.payment_currency)
      .bind(Json(&order.line_items))
      .bind(Json(&order.adjustments))
      .bind(order.total_paid)
      .bind(order.gateway_id)
      .bind(order.payment_source_id)
      .bind(order.billing_address_id)
      .bind(order.shipping_address_id)
      .bind(&order.shipping_method_handle)
      .bind(order.is_completed)
      .bind(order.is_active_cart)
      .bind(order.recalculation_mode)
      .bind(order.register_user_on_order_complete)
      .bind(&order.return_url)
      .bind(&order.cancel_url)
      .bind(Json(&order.field_values))
      .bind(order.date_ordered)
      .bind(order.date_paid)
      .fetch_one(&self.pool)
      .await?;
    Ok(row.into())
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    let row = sqlx::query_as::<_, OrderRow>(&sql).bind(id).fetch_optional(&self.pool).await?;
    Ok(row.map(Order::from))
  }

  async fn find_by_number(&self, number: &str) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE number = $1", ORDER_COLUMNS);
    let row = sqlx::query_as::<_, OrderRow>(&sql).bind(number).fetch_optional(&self.pool).await?;
    Ok(row.map(Order::from))
  }

  async fn find_by_customer(&self, customer_id: i64) -> Result<Vec<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE customer_id = $1 AND is_completed ORDER BY id",
      ORDER_COLUMNS
    );
    let rows = sqlx::query_as::<_, OrderRow>(&sql).bind(customer_id).fetch_all(&self.pool).await?;
    Ok(rows.into_iter().map(Order::from).collect())
  }

  async fn find_by_email(&self, email: &str) -> Result<Vec<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE LOWER(email) = LOWER($1) AND is_completed ORDER BY id",
      ORDER_COLUMNS
    );
    let rows = sqlx::query_as::<_, OrderRow>(&sql).bind(email.trim()).fetch_all(&self.pool).await?;
    Ok(rows.into_iter().map(Order::from).collect())
  }

  #[instrument(name = "pg::order_save", skip(self, order), fields(order_id = order.id, version = order.version))]
  async fn save(&self, order: &mut Order) -> Result<()> {
    let updated: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
      "UPDATE orders SET email = $3, customer_id = $4, payment_currency = $5, line_items = $6, adjustments = $7, \
       total_paid = $8, gateway_id = $9, payment_source_id = $10, billing_address_id = $11, \
       shipping_address_id = $12, shipping_method_handle = $13, is_completed = $14, is_active_cart = $15, \
       recalculation_mode = $16, register_user_on_order_complete = $17, return_url = $18, cancel_url = $19, \
       field_values = $20, date_ordered = $21, date_paid = $22, date_updated = NOW(), version = version + 1 \
       WHERE id = $1 AND version = $2 \
       RETURNING version, date_updated",
    )
    .bind(order.id)
    .bind(order.version)
    .bind(&order.email)
    .bind(order.customer_id)
    .bind(&order.payment_currency)
    .bind(Json(&order.line_items))
    .bind(Json(&order.adjustments))
    .bind(order.total_paid)
    .bind(order.gateway_id)
    .bind(order.payment_source_id)
    .bind(order.billing_address_id)
    .bind(order.shipping_address_id)
    .bind(&order.shipping_method_handle)
    .bind(order.is_completed)
    .bind(order.is_active_cart)
    .bind(order.recalculation_mode)
    .bind(order.register_user_on_order_complete)
    .bind(&order.return_url)
    .bind(&order.cancel_url)
    .bind(Json(&order.field_values))
    .bind(order.date_ordered)
    .bind(order.date_paid)
    .fetch_optional(&self.pool)
    .await?;

    match updated {
      Some((version, date_updated)) => {
        order.version = version;
        order.date_updated = date_updated;
        Ok(())
      }
      None => {
        debug!("Order save matched no row at the expected version");
        Err(AppError::Conflict(format!(
          "Order {} was modified concurrently (expected version {})",
          order.id, order.version
        )))
      }
    }
  }
}

async fn insert_transaction<'e, E: PgExecutor<'e>>(executor: E, transaction: &Transaction) -> Result<Transaction> {
  let sql = format!(
    "INSERT INTO transactions (hash, order_id, parent_id, gateway_id, user_id, kind, status, amount, currency, \
     payment_amount, payment_currency, payment_rate, reference, code, message, note, response) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
     RETURNING {}",
    TRANSACTION_COLUMNS
  );
  let row = sqlx::query_as::<_, Transaction>(&sql)
    .bind(&transaction.hash)
    .bind(transaction.order_id)
    .bind(transaction.parent_id)
    .bind(transaction.gateway_id)
    .bind(transaction.user_id)
    .bind(transaction.kind)
    .bind(transaction.status)
    .bind(transaction.amount)
    .bind(&transaction.currency)
    .bind(transaction.payment_amount)
    .bind(&transaction.payment_currency)
    .bind(transaction.payment_rate)
    .bind(&transaction.reference)
    .bind(&transaction.code)
    .bind(&transaction.message)
    .bind(&transaction.note)
    .bind(&transaction.response)
    .fetch_one(executor)
    .await?;
  Ok(row)
}

#[async_trait]
impl TransactionStore for PgStore {
  #[instrument(name = "pg::transaction_insert", skip(self, transaction), fields(hash = %transaction.hash))]
  async fn insert(&self, transaction: Transaction) -> Result<Transaction> {
    insert_transaction(&self.pool, &transaction).await
  }

  /// Locks the parent row for the duration of the check and the insert.
  #[instrument(name = "pg::transaction_insert_child", skip(self, child, admit), fields(parent_id = ?child.parent_id))]
  async fn insert_child(&self, child: Transaction, admit: ChildAdmission<'_>) -> Result<Option<Transaction>> {
    let parent_id = child
      .parent_id
      .ok_or_else(|| AppError::Internal("Child transaction has no parent".to_string()))?;
    let mut db_tx = self.pool.begin().await?;
    let locked: Option<(i64,)> = sqlx::query_as("SELECT id FROM transactions WHERE id = $1 FOR UPDATE")
      .bind(parent_id)
      .fetch_optional(&mut *db_tx)
      .await?;
    if locked.is_none() {
      return Err(AppError::NotFound(format!("Transaction {} does not exist", parent_id)));
    }
    let sql = format!("SELECT {} FROM transactions WHERE order_id = $1 ORDER BY id", TRANSACTION_COLUMNS);
    let siblings = sqlx::query_as::<_, Transaction>(&sql)
      .bind(child.order_id)
      .fetch_all(&mut *db_tx)
      .await?;
    if !admit(&siblings) {
      db_tx.rollback().await?;
      debug!("Child transaction refused by admission check");
      return Ok(None);
    }
    let row = insert_transaction(&mut *db_tx, &child).await?;
    db_tx.commit().await?;
    Ok(Some(row))
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
    Ok(sqlx::query_as::<_, Transaction>(&sql).bind(id).fetch_optional(&self.pool).await?)
  }

  async fn find_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE hash = $1", TRANSACTION_COLUMNS);
    Ok(sqlx::query_as::<_, Transaction>(&sql).bind(hash).fetch_optional(&self.pool).await?)
  }

  async fn find_by_order(&self, order_id: i64) -> Result<Vec<Transaction>> {
    let sql = format!("SELECT {} FROM transactions WHERE order_id = $1 ORDER BY id", TRANSACTION_COLUMNS);
    Ok(sqlx::query_as::<_, Transaction>(&sql).bind(order_id).fetch_all(&self.pool).await?)
  }

  #[instrument(name = "pg::transaction_transition", skip(self, from, outcome), fields(next = ?outcome.status))]
  async fn transition(
    &self,
    id: i64,
    from: &[TransactionStatus],
    outcome: &TransactionOutcome,
  ) -> Result<Option<Transaction>> {
    let allowed: Vec<TransactionStatus> = from
      .iter()
      .copied()
      .filter(|s| s.can_transition_to(outcome.status))
      .collect();
    if allowed.is_empty() {
      return Ok(None);
    }
    let sql = format!(
      "UPDATE transactions SET status = $2, reference = COALESCE($3, reference), code = COALESCE($4, code), \
       message = COALESCE($5, message), response = COALESCE($6, response), date_updated = NOW() \
       WHERE id = $1 AND status = ANY($7) \
       RETURNING {}",
      TRANSACTION_COLUMNS
    );
    let row = sqlx::query_as::<_, Transaction>(&sql)
      .bind(id)
      .bind(outcome.status)
      .bind(&outcome.reference)
      .bind(&outcome.code)
      .bind(&outcome.message)
      .bind(&outcome.response)
      .bind(&allowed)
      .fetch_optional(&self.pool)
      .await?;
    Ok(row)
  }

  async fn reclaim_stale(&self, id: i64, stale_before: DateTime<Utc>) -> Result<Option<Transaction>> {
    let sql = format!(
      "UPDATE transactions SET date_updated = NOW() \
       WHERE id = $1 AND status = 'processing' AND date_updated < $2 \
       RETURNING {}",
      TRANSACTION_COLUMNS
    );
    Ok(
      sqlx::query_as::<_, Transaction>(&sql)
        .bind(id)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await?,
    )
  }
}

#[async_trait]
impl PaymentSourceStore for PgStore {
  async fn insert(&self, source: NewPaymentSource) -> Result<PaymentSource> {
    let row = sqlx::query_as::<_, PaymentSource>(
      "INSERT INTO payment_sources (user_id, gateway_id, token, description, response) \
       VALUES ($1, $2, $3, $4, $5) \
       RETURNING id, user_id, gateway_id, token, description, response, date_created",
    )
    .bind(source.user_id)
    .bind(source.gateway_id)
    .bind(&source.token)
    .bind(&source.description)
    .bind(&source.response)
    .fetch_one(&self.pool)
    .await?;
    Ok(row)
  }

  async fn find_by_id(&self, id: i64) -> Result<Option<PaymentSource>> {
    Ok(
      sqlx::query_as::<_, PaymentSource>(
        "SELECT id, user_id, gateway_id, token, description, response, date_created FROM payment_sources WHERE id = $1",
      )
      .bind(id)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  async fn find_by_user(&self, user_id: i64) -> Result<Vec<PaymentSource>> {
    Ok(
      sqlx::query_as::<_, PaymentSource>(
        "SELECT id, user_id, gateway_id, token, description, response, date_created \
         FROM payment_sources WHERE user_id = $1 ORDER BY id",
      )
      .bind(user_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}

#[async_trait]
impl OrderHistoryStore for PgStore {
  async fn insert(&self, history: OrderHistory) -> Result<OrderHistory> {
    let row = sqlx::query_as::<_, OrderHistory>(
      "INSERT INTO order_histories (order_id, customer_id, message, prev_paid_status, new_paid_status) \
       VALUES ($1, $2, $3, $4, $5) \
       RETURNING id, order_id, customer_id, message, prev_paid_status, new_paid_status, date_created",
    )
    .bind(history.order_id)
    .bind(history.customer_id)
    .bind(&history.message)
    .bind(history.prev_paid_status)
    .bind(history.new_paid_status)
    .fetch_one(&self.pool)
    .await?;
    Ok(row)
  }

  async fn find_by_order(&self, order_id: i64) -> Result<Vec<OrderHistory>> {
    Ok(
      sqlx::query_as::<_, OrderHistory>(
        "SELECT id, order_id, customer_id, message, prev_paid_status, new_paid_status, date_created \
         FROM order_histories WHERE order_id = $1 ORDER BY id",
      )
      .bind(order_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}

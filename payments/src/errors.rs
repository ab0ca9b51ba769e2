// orderflow/payments/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orderflow::FlowError;
use serde_json::json;
use thiserror::Error;

use crate::services::price_guard::PriceField;

/// Why a payment attempt (or a completion callback) was refused.
///
/// These are expected outcomes of the payment flow. The orchestrator recovers them into a
/// user-facing payload instead of letting them escape as server errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
  #[error("Can not find an order to pay.")]
  OrderNotFound,

  #[error("Email required to make payments on a completed order.")]
  AuthorizationRequired,

  #[error("{0}")]
  OrderIncomplete(String),

  #[error("{0}")]
  UnsupportedCurrency(String),

  #[error("There is no gateway or payment source available for this order.")]
  NoGatewayAvailable,

  #[error("{0}")]
  PaymentSourceCreationFailed(String),

  #[error("Something changed with the order before payment, please review your order and submit payment again.")]
  OrderChangedDuringCheckout(Vec<PriceField>),

  #[error("{0}")]
  InvalidPaymentInput(String),

  /// Gateway message, preserved verbatim.
  #[error("{0}")]
  PaymentDeclined(String),

  #[error("Can not complete payment for missing transaction.")]
  TransactionNotFound,

  #[error("Payment completion is already in progress for this transaction.")]
  CompletionInProgress,

  #[error("Transaction can not be captured.")]
  TransactionNotCapturable,

  #[error("{0}")]
  TransactionNotRefundable(String),
}

impl PaymentError {
  /// Stable machine-readable code for API clients.
  pub fn code(&self) -> &'static str {
    match self {
      PaymentError::OrderNotFound => "order_not_found",
      PaymentError::AuthorizationRequired => "authorization_required",
      PaymentError::OrderIncomplete(_) => "order_incomplete",
      PaymentError::UnsupportedCurrency(_) => "unsupported_currency",
      PaymentError::NoGatewayAvailable => "no_gateway_available",
      PaymentError::PaymentSourceCreationFailed(_) => "payment_source_creation_failed",
      PaymentError::OrderChangedDuringCheckout(_) => "order_changed_during_checkout",
      PaymentError::InvalidPaymentInput(_) => "invalid_payment_input",
      PaymentError::PaymentDeclined(_) => "payment_declined",
      PaymentError::TransactionNotFound => "transaction_not_found",
      PaymentError::CompletionInProgress => "completion_in_progress",
      PaymentError::TransactionNotCapturable => "transaction_not_capturable",
      PaymentError::TransactionNotRefundable(_) => "transaction_not_refundable",
    }
  }

  pub fn status_code(&self) -> StatusCode {
    match self {
      PaymentError::OrderNotFound => StatusCode::NOT_FOUND,
      PaymentError::AuthorizationRequired => StatusCode::FORBIDDEN,
      PaymentError::PaymentDeclined(_) => StatusCode::PAYMENT_REQUIRED,
      PaymentError::TransactionNotFound => StatusCode::BAD_REQUEST,
      PaymentError::CompletionInProgress => StatusCode::CONFLICT,
      PaymentError::OrderChangedDuringCheckout(_) => StatusCode::CONFLICT,
      PaymentError::OrderIncomplete(_)
      | PaymentError::UnsupportedCurrency(_)
      | PaymentError::NoGatewayAvailable
      | PaymentError::PaymentSourceCreationFailed(_)
      | PaymentError::InvalidPaymentInput(_)
      | PaymentError::TransactionNotCapturable
      | PaymentError::TransactionNotRefundable(_) => StatusCode::UNPROCESSABLE_ENTITY,
    }
  }
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Payment(#[from] PaymentError),

  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  /// Optimistic concurrency check failed while saving a row.
  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl AppError {
  /// The payment refusal carried by this error, if it is one.
  pub fn as_payment(&self) -> Option<&PaymentError> {
    match self {
      AppError::Payment(e) => Some(e),
      _ => None,
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<PaymentError>() {
      Ok(payment_err) => AppError::Payment(payment_err),
      Err(err) => match err.downcast::<sqlx::Error>() {
        Ok(db_err) => AppError::Sqlx(db_err),
        Err(err) => AppError::Internal(err.to_string()),
      },
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Payment(e) => e.status_code(),
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Forbidden(_) => StatusCode::FORBIDDEN,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Conflict(_) => StatusCode::CONFLICT,
      AppError::Config(_)
      | AppError::Sqlx(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
    } else {
      tracing::warn!(application_error = %self, "Responding with error");
    }
    let body = match self {
      AppError::Payment(e) => json!({ "error": e.to_string(), "code": e.code() }),
      AppError::Validation(m) | AppError::Forbidden(m) | AppError::NotFound(m) | AppError::Conflict(m) => {
        json!({ "error": m })
      }
      AppError::Sqlx(_) => json!({ "error": "Database operation failed" }),
      AppError::Workflow { source } => {
        tracing::error!(workflow_error = ?source, "Workflow error details");
        json!({ "error": "Workflow processing error" })
      }
      AppError::Config(_) | AppError::Internal(_) => json!({ "error": "An internal error occurred" }),
    };
    HttpResponse::build(status).json(body)
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

//! Payment reconciliation and idempotency engine for the Toss Payments
//! gateway.
//!
//! Every gateway call outcome, including the ones where no response ever
//! arrived, is folded into one of four durable transaction states and
//! appended to a ledger keyed by the caller's transaction id. The same id
//! is forwarded to the provider as an idempotency token, so retrying a
//! failed call can never double-charge.

pub mod api;
pub mod classify;
pub mod client;
pub mod config;
pub mod engine;
pub mod ledger;

pub use classify::{classify_status, TransactionState};
pub use client::{GatewayCallError, TossClient, TossHttpClient};
pub use config::{Config, ConfigProvider, StaticConfigProvider, TossConfig};
pub use engine::{
    EngineError, OperationContext, PurchaseRequest, ReconciliationEngine, RefundRequest,
    TransactionResult,
};
pub use ledger::{LedgerStore, PgLedgerStore, TransactionKind};

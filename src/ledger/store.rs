//! Ledger store contract and record shapes
//!
//! The ledger is append-only: one attempt record per gateway call outcome,
//! including transport failures. The "current" state of a logical
//! transaction is the attempt with the highest record id, not the latest
//! timestamp, which sidesteps clock skew between writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::classify::{classify_status, TransactionState};
use crate::ledger::error::LedgerResult;

/// Kind of a logical transaction. Informational queries reuse the kind of
/// the attempt they refresh, so only these two are ever persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind {
    Purchase,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Refund => "REFUND",
        }
    }
}

/// A new attempt record, one per gateway call outcome.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub kind: TransactionKind,
    pub amount: i64,
    pub currency: String,
    /// Provider reference key. Null only when the provider never
    /// acknowledged the call and the caller knew no key either.
    pub payment_key: Option<String>,
    /// Provider-assigned secondary reference: the order id, or the cancel
    /// transaction key for refunds.
    pub order_id: Option<String>,
    pub provider_status: Option<String>,
    pub provider_method: Option<String>,
    pub receipt_url: Option<String>,
    /// Full provider response or sanitized error, kept for forensic replay.
    pub additional_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Uuid,
}

/// A persisted attempt record.
#[derive(Debug, Clone, FromRow)]
pub struct Attempt {
    pub record_id: i64,
    pub account_id: Uuid,
    pub payment_id: Uuid,
    pub transaction_id: Uuid,
    pub kind: String,
    pub amount: i64,
    pub currency: String,
    pub payment_key: Option<String>,
    pub order_id: Option<String>,
    pub provider_status: Option<String>,
    pub provider_method: Option<String>,
    pub receipt_url: Option<String>,
    pub additional_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub tenant_id: Uuid,
}

impl Attempt {
    /// Only `PURCHASE` and `REFUND` are ever written, via
    /// [`TransactionKind::as_str`].
    pub fn kind(&self) -> TransactionKind {
        if self.kind == "REFUND" {
            TransactionKind::Refund
        } else {
            TransactionKind::Purchase
        }
    }

    /// Derived transaction state of this attempt.
    pub fn state(&self) -> TransactionState {
        classify_status(self.provider_status.as_deref())
    }
}

/// A new billing credential record.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub billing_key: String,
    pub customer_key: String,
    pub is_default: bool,
    pub additional_data: Option<serde_json::Value>,
    pub tenant_id: Uuid,
}

/// A persisted billing credential. Soft-deleted, never hard-deleted, to
/// preserve the audit trail.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub record_id: i64,
    pub account_id: Uuid,
    pub payment_method_id: Uuid,
    pub billing_key: String,
    pub customer_key: String,
    pub is_default: bool,
    pub is_deleted: bool,
    pub additional_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tenant_id: Uuid,
}

/// Append-only transaction ledger plus billing credential storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one attempt record. Never updates in place.
    async fn append_attempt(&self, attempt: &NewAttempt) -> LedgerResult<Attempt>;

    /// Most recent attempt for a logical transaction, by record id.
    async fn latest_by_transaction(
        &self,
        transaction_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>>;

    /// Most recent attempt for a payment, by record id.
    async fn latest_by_payment(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>>;

    /// Most recent PURCHASE attempt whose raw status is `DONE` or
    /// `PARTIAL_CANCELED`. This is the refund-source lookup.
    async fn latest_successful_purchase(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>>;

    /// All attempts for a payment, oldest first.
    async fn attempts_for_payment(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Vec<Attempt>>;

    /// Insert a billing credential. When `is_default` is set, the default
    /// flag is cleared on all sibling credentials first, within the same
    /// database transaction.
    async fn add_credential(&self, credential: &NewCredential) -> LedgerResult<()>;

    /// Fetch a non-deleted credential by payment method id.
    async fn get_credential(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Credential>>;

    /// All non-deleted credentials for an account.
    async fn list_credentials(
        &self,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Vec<Credential>>;

    /// Soft-delete a credential. Returns false when nothing matched.
    async fn soft_delete_credential(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<bool>;

    /// Make one credential the account default: clears the flag on all
    /// siblings, then sets it, in one database transaction.
    async fn set_default_credential(
        &self,
        payment_method_id: Uuid,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt_with_status(status: Option<&str>) -> Attempt {
        Attempt {
            record_id: 1,
            account_id: Uuid::new_v4(),
            payment_id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            kind: "PURCHASE".to_string(),
            amount: 10000,
            currency: "KRW".to_string(),
            payment_key: Some("pk".to_string()),
            order_id: None,
            provider_status: status.map(|s| s.to_string()),
            provider_method: None,
            receipt_url: None,
            additional_data: None,
            created_at: Utc::now(),
            tenant_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn attempt_state_is_derived_from_raw_status() {
        assert_eq!(attempt_with_status(Some("DONE")).state(), TransactionState::Processed);
        assert_eq!(attempt_with_status(Some("ABORTED")).state(), TransactionState::Canceled);
        assert_eq!(attempt_with_status(None).state(), TransactionState::Pending);
    }

    #[test]
    fn kind_round_trips_through_storage_string() {
        let mut attempt = attempt_with_status(None);
        assert_eq!(attempt.kind(), TransactionKind::Purchase);
        attempt.kind = TransactionKind::Refund.as_str().to_string();
        assert_eq!(attempt.kind(), TransactionKind::Refund);
    }
}

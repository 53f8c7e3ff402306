//! Reconciliation engine
//!
//! Orchestrates one logical operation (purchase, refund, resync) against the
//! gateway client, feeds the outcome through the classifiers, persists an
//! attempt record for every call outcome, and returns a normalized
//! transaction result to the caller.
//!
//! Error propagation policy: validation errors fail fast before any gateway
//! call. Transport failures and provider errors are absorbed into normalized
//! `Pending`/`Error` results so the caller's retry machinery can proceed.
//! The one hard failure is a ledger write that fails after a successful
//! gateway call: money may have moved, so silence is unacceptable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classify::{
    classify_payment_error, classify_query_error, classify_status, TransactionState,
};
use crate::client::models::{
    BillingKeyPaymentRequest, BillingKeyRequest, PaymentCancelRequest, PaymentConfirmRequest,
    TossPayment,
};
use crate::client::{GatewayCallError, TossClient};
use crate::config::{ConfigProvider, TossConfig};
use crate::ledger::{
    Attempt, Credential, LedgerError, LedgerStore, NewAttempt, NewCredential, TransactionKind,
};

/// Fixed disposition code attached to results born from transport failures.
pub const NETWORK_ERROR_CODE: &str = "NETWORK_ERROR";

const DEFAULT_ORDER_NAME: &str = "Billing payment";
const DEFAULT_CANCEL_REASON: &str = "Customer requested refund";

/// Identifiers shared by every engine operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub account_id: Uuid,
    /// Groups multiple transactions: one purchase plus its refunds.
    pub payment_id: Uuid,
    /// Caller-supplied id of this logical transaction attempt. Doubles as
    /// the idempotency token passed to the provider.
    pub transaction_id: Uuid,
    pub payment_method_id: Uuid,
    pub tenant_id: Uuid,
}

/// Per-flow purchase variant, resolved once at the boundary.
#[derive(Debug, Clone)]
pub enum PurchaseRequest {
    /// Confirm a checkout-initiated payment by its provider key.
    DirectConfirm {
        payment_key: String,
        order_id: Option<String>,
    },
    /// Issue a billing key from a one-time auth key, store it, then charge.
    BillingKeyIssueAndCharge {
        auth_key: String,
        set_default: bool,
        charge: ChargeDetails,
    },
    /// Charge against a previously stored billing key.
    StoredBillingKeyCharge { charge: ChargeDetails },
}

#[derive(Debug, Clone, Default)]
pub struct ChargeDetails {
    pub order_id: Option<String>,
    pub order_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RefundRequest {
    /// Partial refund amount; `None` refunds the full remaining balance.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

/// Normalized outcome of one engine operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub transaction_id: Uuid,
    pub payment_id: Uuid,
    pub kind: TransactionKind,
    pub state: TransactionState,
    pub amount: i64,
    pub currency: String,
    pub gateway_error: Option<String>,
    pub gateway_error_code: Option<String>,
    /// Provider payment key.
    pub first_reference: Option<String>,
    /// Order id, or the latest cancel transaction key for refunds.
    pub second_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A precondition was violated locally; no gateway call was made.
    #[error("{code}: {message}")]
    Validation { code: &'static str, message: String },
    /// A gateway failure on a management operation (billing key issuance
    /// outside the purchase path), surfaced verbatim.
    #[error("{code}: {message}")]
    Gateway { code: String, message: String },
    /// A ledger write failed after the gateway call already completed.
    #[error("ledger failure: {0}")]
    Persistence(#[from] LedgerError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub const REFUND_ERROR: &str = "REFUND_ERROR";
pub const MISSING_BILLING_KEY: &str = "MISSING_BILLING_KEY";
pub const MISSING_PARAMETER: &str = "MISSING_PARAMETER";
pub const FORBIDDEN: &str = "FORBIDDEN";

pub struct ReconciliationEngine {
    client: Arc<dyn TossClient>,
    ledger: Arc<dyn LedgerStore>,
    config: Arc<dyn ConfigProvider>,
}

enum IssueOutcome {
    Issued {
        billing_key: String,
        customer_key: String,
    },
    Failed(TransactionResult),
}

impl ReconciliationEngine {
    pub fn new(
        client: Arc<dyn TossClient>,
        ledger: Arc<dyn LedgerStore>,
        config: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            client,
            ledger,
            config,
        }
    }

    /// Fetch a fresh configuration snapshot; never cached across calls.
    fn tenant_config(&self, tenant_id: Uuid) -> Result<TossConfig, EngineError> {
        let config = self.config.config_for_tenant(tenant_id);
        if config.secret_key.is_none() {
            return Err(EngineError::Configuration(format!(
                "Toss secret key is not configured for tenant {}",
                tenant_id
            )));
        }
        Ok(config)
    }

    /// Execute a purchase. At most one economic effect per transaction id:
    /// the id is forwarded as the provider idempotency token, and every
    /// outcome (including transport failures) appends an attempt record.
    pub async fn purchase(
        &self,
        ctx: &OperationContext,
        amount: i64,
        currency: &str,
        request: PurchaseRequest,
    ) -> Result<TransactionResult, EngineError> {
        info!(
            "purchase requested: payment_id={}, amount={}, currency={}",
            ctx.payment_id, amount, currency
        );
        let config = self.tenant_config(ctx.tenant_id)?;

        match request {
            PurchaseRequest::DirectConfirm {
                payment_key,
                order_id,
            } => {
                let confirm = PaymentConfirmRequest {
                    payment_key: payment_key.clone(),
                    order_id: order_id.unwrap_or_else(|| ctx.payment_id.to_string()),
                    amount,
                };
                let outcome = self
                    .client
                    .confirm_payment(&config, &confirm, &ctx.transaction_id.to_string())
                    .await;
                self.settle_payment_outcome(
                    ctx,
                    TransactionKind::Purchase,
                    amount,
                    currency,
                    Some(payment_key),
                    outcome,
                )
                .await
            }
            PurchaseRequest::BillingKeyIssueAndCharge {
                auth_key,
                set_default,
                charge,
            } => {
                // An already-stored credential short-circuits issuance.
                let existing = self
                    .ledger
                    .get_credential(ctx.payment_method_id, ctx.tenant_id)
                    .await?;
                let (billing_key, customer_key) = match existing {
                    Some(credential) => (credential.billing_key, credential.customer_key),
                    None => {
                        match self
                            .issue_and_store_credential(
                                ctx,
                                &config,
                                &auth_key,
                                set_default,
                                amount,
                                currency,
                            )
                            .await?
                        {
                            IssueOutcome::Issued {
                                billing_key,
                                customer_key,
                            } => (billing_key, customer_key),
                            IssueOutcome::Failed(result) => return Ok(result),
                        }
                    }
                };
                self.charge_with_billing_key(
                    ctx,
                    &config,
                    amount,
                    currency,
                    &billing_key,
                    &customer_key,
                    charge,
                )
                .await
            }
            PurchaseRequest::StoredBillingKeyCharge { charge } => {
                let credential = self
                    .ledger
                    .get_credential(ctx.payment_method_id, ctx.tenant_id)
                    .await?
                    .filter(|c| !c.billing_key.is_empty())
                    .ok_or_else(|| EngineError::Validation {
                        code: MISSING_BILLING_KEY,
                        message: format!(
                            "No billing key found for payment method {}",
                            ctx.payment_method_id
                        ),
                    })?;
                self.charge_with_billing_key(
                    ctx,
                    &config,
                    amount,
                    currency,
                    &credential.billing_key,
                    &credential.customer_key,
                    charge,
                )
                .await
            }
        }
    }

    async fn issue_and_store_credential(
        &self,
        ctx: &OperationContext,
        config: &TossConfig,
        auth_key: &str,
        set_default: bool,
        amount: i64,
        currency: &str,
    ) -> Result<IssueOutcome, EngineError> {
        let customer_key = ctx.payment_method_id.to_string();
        let request = BillingKeyRequest {
            customer_key,
            auth_key: auth_key.to_string(),
        };

        match self.client.issue_billing_key(config, &request).await {
            Ok(billing) => {
                info!("billing key issued: billing_key={}", mask_key(&billing.billing_key));
                let credential = NewCredential {
                    account_id: ctx.account_id,
                    payment_method_id: ctx.payment_method_id,
                    billing_key: billing.billing_key.clone(),
                    customer_key: billing.customer_key.clone(),
                    is_default: set_default,
                    additional_data: to_json(&billing),
                    tenant_id: ctx.tenant_id,
                };
                // The credential must survive a failed first charge, so a
                // failure to store it is a hard error before we charge.
                self.ledger.add_credential(&credential).await?;
                Ok(IssueOutcome::Issued {
                    billing_key: billing.billing_key,
                    customer_key: billing.customer_key,
                })
            }
            Err(GatewayCallError::Provider {
                code,
                message,
                http_status,
            }) => {
                error!(
                    "failed to issue billing key: code={}, message={}",
                    code, message
                );
                let state = classify_payment_error(http_status, Some(&code));
                self.append_silently(self.error_attempt(
                    ctx,
                    TransactionKind::Purchase,
                    amount,
                    currency,
                    None,
                    &code,
                    &message,
                    http_status,
                ))
                .await;
                Ok(IssueOutcome::Failed(self.error_result(
                    ctx,
                    TransactionKind::Purchase,
                    state,
                    amount,
                    currency,
                    &code,
                    &message,
                )))
            }
            Err(GatewayCallError::Transport { message }) => {
                error!("network error during billing key issuance: {}", message);
                self.append_silently(self.pending_attempt(
                    ctx,
                    TransactionKind::Purchase,
                    amount,
                    currency,
                    None,
                ))
                .await;
                Ok(IssueOutcome::Failed(self.pending_result(
                    ctx,
                    TransactionKind::Purchase,
                    amount,
                    currency,
                    None,
                    &message,
                )))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn charge_with_billing_key(
        &self,
        ctx: &OperationContext,
        config: &TossConfig,
        amount: i64,
        currency: &str,
        billing_key: &str,
        customer_key: &str,
        charge: ChargeDetails,
    ) -> Result<TransactionResult, EngineError> {
        let request = BillingKeyPaymentRequest {
            amount,
            order_id: charge.order_id.unwrap_or_else(|| ctx.payment_id.to_string()),
            order_name: charge
                .order_name
                .unwrap_or_else(|| DEFAULT_ORDER_NAME.to_string()),
            customer_key: customer_key.to_string(),
            customer_email: charge.customer_email,
            customer_name: charge.customer_name,
        };
        let outcome = self
            .client
            .charge_billing_key(config, billing_key, &request, &ctx.transaction_id.to_string())
            .await;
        self.settle_payment_outcome(ctx, TransactionKind::Purchase, amount, currency, None, outcome)
            .await
    }

    /// Execute a refund. All preconditions are validated before any gateway
    /// call; each violation is a distinct terminal error.
    pub async fn refund(
        &self,
        ctx: &OperationContext,
        currency: &str,
        request: RefundRequest,
    ) -> Result<TransactionResult, EngineError> {
        info!(
            "refund requested: payment_id={}, amount={:?}",
            ctx.payment_id, request.amount
        );

        let previous = self
            .ledger
            .latest_successful_purchase(ctx.payment_id, ctx.tenant_id)
            .await?;
        let previous = validate_refund(previous, request.amount, ctx.payment_id)?;
        // validate_refund guarantees the key is present
        let payment_key = previous.payment_key.clone().unwrap_or_default();

        let config = self.tenant_config(ctx.tenant_id)?;
        let cancel = PaymentCancelRequest {
            cancel_reason: request
                .reason
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string()),
            cancel_amount: request.amount,
        };
        let amount = request.amount.unwrap_or(previous.amount);

        let outcome = self
            .client
            .cancel_payment(&config, &payment_key, &cancel, &ctx.transaction_id.to_string())
            .await;
        self.settle_payment_outcome(
            ctx,
            TransactionKind::Refund,
            amount,
            currency,
            Some(payment_key),
            outcome,
        )
        .await
    }

    /// Re-query the provider for a payment whose latest local record is
    /// non-terminal, append the refreshed outcome, and return the result
    /// collection with the stale last element replaced. Safe to repeat.
    pub async fn resync(
        &self,
        account_id: Uuid,
        payment_id: Uuid,
        tenant_id: Uuid,
        payment_key_hint: Option<&str>,
    ) -> Result<Vec<TransactionResult>, EngineError> {
        let attempts = self.ledger.attempts_for_payment(payment_id, tenant_id).await?;
        let mut results = collapse_to_latest_per_transaction(&attempts);
        let Some(last) = results.last().cloned() else {
            return Ok(results);
        };
        if last.state.is_terminal() {
            return Ok(results);
        }

        // Fallback chain: caller hint, the stale result's reference, then a
        // fresh ledger lookup. Without a key there is nothing to query.
        let payment_key = match payment_key_hint
            .map(str::to_string)
            .or_else(|| last.first_reference.clone())
        {
            Some(key) => Some(key),
            None => match self.ledger.latest_by_payment(payment_id, tenant_id).await {
                Ok(record) => record.and_then(|r| r.payment_key),
                Err(e) => {
                    warn!("failed to retrieve payment key from ledger: {}", e);
                    None
                }
            },
        };
        let Some(payment_key) = payment_key else {
            warn!(
                "could not find payment key for payment_id={}, cannot resync",
                payment_id
            );
            return Ok(results);
        };

        let config = self.tenant_config(tenant_id)?;
        match self.client.get_payment(&config, &payment_key).await {
            Ok(payment) => {
                // A refund attempt while the provider still reports DONE
                // means the cancel request likely never arrived. Keep the
                // attempt PENDING so the refund can be retried, instead of
                // reinterpreting DONE as a successful refund.
                if last.kind == TransactionKind::Refund
                    && payment.status.as_deref() == Some("DONE")
                {
                    warn!(
                        "refund attempt but provider status is DONE; keeping PENDING for retry: payment_key={}",
                        payment_key
                    );
                    return Ok(results);
                }

                // For refunds the provider's totalAmount is the purchase
                // amount, not the refund amount.
                let amount = if last.kind == TransactionKind::Refund {
                    last.amount
                } else {
                    payment.total_amount.unwrap_or(last.amount)
                };
                let currency = payment
                    .currency
                    .clone()
                    .unwrap_or_else(|| last.currency.clone());
                let state = classify_status(payment.status.as_deref());
                let second_reference = match last.kind {
                    TransactionKind::Purchase => payment.order_id.clone(),
                    TransactionKind::Refund => payment
                        .latest_cancel_transaction_key()
                        .map(str::to_string),
                };

                let attempt = NewAttempt {
                    account_id,
                    payment_id,
                    transaction_id: last.transaction_id,
                    kind: last.kind,
                    amount,
                    currency: currency.clone(),
                    payment_key: payment.payment_key.clone().or(Some(payment_key.clone())),
                    order_id: payment.order_id.clone(),
                    provider_status: payment.status.clone(),
                    provider_method: payment.method.clone(),
                    receipt_url: payment.receipt_url().map(str::to_string),
                    additional_data: to_json(&payment),
                    created_at: Utc::now(),
                    tenant_id,
                };
                self.ledger.append_attempt(&attempt).await?;

                info!(
                    "resync updated: payment_key={}, status={:?}",
                    payment_key, payment.status
                );
                let updated = TransactionResult {
                    transaction_id: last.transaction_id,
                    payment_id,
                    kind: last.kind,
                    state,
                    amount,
                    currency,
                    gateway_error: None,
                    gateway_error_code: None,
                    first_reference: payment.payment_key.clone().or(Some(payment_key)),
                    second_reference,
                    created_at: Utc::now(),
                };
                *results.last_mut().expect("non-empty") = updated;
                Ok(results)
            }
            Err(GatewayCallError::Provider {
                code,
                message,
                http_status,
            }) => {
                error!(
                    "provider error during resync: code={}, message={}",
                    code, message
                );
                let state = classify_query_error(http_status, Some(&code));
                let attempt = NewAttempt {
                    account_id,
                    payment_id,
                    transaction_id: last.transaction_id,
                    kind: last.kind,
                    amount: last.amount,
                    currency: last.currency.clone(),
                    payment_key: Some(payment_key.clone()),
                    order_id: None,
                    provider_status: None,
                    provider_method: None,
                    receipt_url: None,
                    additional_data: Some(error_payload(&code, &message, http_status)),
                    created_at: Utc::now(),
                    tenant_id,
                };
                self.append_silently(attempt).await;

                let updated = TransactionResult {
                    transaction_id: last.transaction_id,
                    payment_id,
                    kind: last.kind,
                    state,
                    amount: last.amount,
                    currency: last.currency.clone(),
                    gateway_error: Some(message),
                    gateway_error_code: Some(code),
                    first_reference: Some(payment_key),
                    second_reference: None,
                    created_at: Utc::now(),
                };
                *results.last_mut().expect("non-empty") = updated;
                Ok(results)
            }
            Err(GatewayCallError::Transport { message }) => {
                error!("network error during resync: {}", message);
                Ok(results)
            }
        }
    }

    /// Latest recorded outcome of a logical transaction, without touching
    /// the provider. Returns `None` for a transaction id never attempted.
    pub async fn latest_result(
        &self,
        transaction_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<TransactionResult>, EngineError> {
        let attempt = self
            .ledger
            .latest_by_transaction(transaction_id, tenant_id)
            .await?;
        Ok(attempt.as_ref().map(result_from_attempt))
    }

    /// Register a payment method outside the purchase path: issue a billing
    /// key from a one-time auth key and store the credential.
    pub async fn add_payment_method(
        &self,
        account_id: Uuid,
        payment_method_id: Uuid,
        tenant_id: Uuid,
        auth_key: Option<&str>,
        card_number: Option<&str>,
        set_default: bool,
    ) -> Result<(), EngineError> {
        info!(
            "add_payment_method: account_id={}, payment_method_id={}",
            account_id, payment_method_id
        );

        if card_number.is_some() {
            return Err(EngineError::Validation {
                code: FORBIDDEN,
                message: "Raw card data billing key issuance requires a special contract with Toss Payments"
                    .to_string(),
            });
        }
        let auth_key = auth_key.ok_or_else(|| EngineError::Validation {
            code: MISSING_PARAMETER,
            message: "authKey is required for billing key issuance".to_string(),
        })?;

        let config = self.tenant_config(tenant_id)?;
        let request = BillingKeyRequest {
            customer_key: payment_method_id.to_string(),
            auth_key: auth_key.to_string(),
        };

        match self.client.issue_billing_key(&config, &request).await {
            Ok(billing) => {
                let credential = NewCredential {
                    account_id,
                    payment_method_id,
                    billing_key: billing.billing_key.clone(),
                    customer_key: billing.customer_key.clone(),
                    is_default: set_default,
                    additional_data: to_json(&billing),
                    tenant_id,
                };
                self.ledger.add_credential(&credential).await?;
                info!(
                    "billing key issued for payment_method_id={}",
                    payment_method_id
                );
                Ok(())
            }
            Err(GatewayCallError::Provider { code, message, .. }) => {
                error!(
                    "provider error during billing key issuance: code={}, message={}",
                    code, message
                );
                Err(EngineError::Gateway { code, message })
            }
            Err(GatewayCallError::Transport { message }) => {
                error!("network error during billing key issuance: {}", message);
                Err(EngineError::Gateway {
                    code: NETWORK_ERROR_CODE.to_string(),
                    message: format!("Failed to issue billing key: {}", message),
                })
            }
        }
    }

    pub async fn get_payment_method(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Option<Credential>, EngineError> {
        Ok(self.ledger.get_credential(payment_method_id, tenant_id).await?)
    }

    pub async fn list_payment_methods(
        &self,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<Vec<Credential>, EngineError> {
        Ok(self.ledger.list_credentials(account_id, tenant_id).await?)
    }

    pub async fn delete_payment_method(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<bool, EngineError> {
        let deleted = self
            .ledger
            .soft_delete_credential(payment_method_id, tenant_id)
            .await?;
        info!(
            "delete_payment_method: payment_method_id={}, deleted={}",
            payment_method_id, deleted
        );
        Ok(deleted)
    }

    pub async fn set_default_payment_method(
        &self,
        payment_method_id: Uuid,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> Result<(), EngineError> {
        self.ledger
            .set_default_credential(payment_method_id, account_id, tenant_id)
            .await?;
        info!(
            "set_default_payment_method: payment_method_id={}",
            payment_method_id
        );
        Ok(())
    }

    /// Shared settlement of a confirm/charge/cancel outcome: classify,
    /// persist exactly one attempt record, return the normalized result.
    async fn settle_payment_outcome(
        &self,
        ctx: &OperationContext,
        kind: TransactionKind,
        amount: i64,
        currency: &str,
        known_payment_key: Option<String>,
        outcome: Result<TossPayment, GatewayCallError>,
    ) -> Result<TransactionResult, EngineError> {
        match outcome {
            Ok(payment) => {
                let state = classify_status(payment.status.as_deref());
                let second_reference = match kind {
                    TransactionKind::Purchase => payment.order_id.clone(),
                    TransactionKind::Refund => payment
                        .latest_cancel_transaction_key()
                        .map(str::to_string),
                };
                let payment_key = payment.payment_key.clone().or(known_payment_key);

                let attempt = NewAttempt {
                    account_id: ctx.account_id,
                    payment_id: ctx.payment_id,
                    transaction_id: ctx.transaction_id,
                    kind,
                    amount,
                    currency: currency.to_string(),
                    payment_key: payment_key.clone(),
                    order_id: payment.order_id.clone(),
                    provider_status: payment.status.clone(),
                    provider_method: payment.method.clone(),
                    receipt_url: payment.receipt_url().map(str::to_string),
                    additional_data: to_json(&payment),
                    created_at: Utc::now(),
                    tenant_id: ctx.tenant_id,
                };
                // The charge succeeded at the provider; losing the record
                // now must surface as a hard failure, never be swallowed.
                self.ledger.append_attempt(&attempt).await?;

                info!(
                    "{:?} succeeded: payment_key={:?}, status={:?}",
                    kind, payment_key, payment.status
                );
                Ok(TransactionResult {
                    transaction_id: ctx.transaction_id,
                    payment_id: ctx.payment_id,
                    kind,
                    state,
                    amount,
                    currency: currency.to_string(),
                    gateway_error: None,
                    gateway_error_code: None,
                    first_reference: payment_key,
                    second_reference,
                    created_at: Utc::now(),
                })
            }
            Err(GatewayCallError::Provider {
                code,
                message,
                http_status,
            }) => {
                error!(
                    "provider error during {:?}: code={}, message={}",
                    kind, code, message
                );
                let state = classify_payment_error(http_status, Some(&code));
                self.append_silently(self.error_attempt(
                    ctx,
                    kind,
                    amount,
                    currency,
                    known_payment_key,
                    &code,
                    &message,
                    http_status,
                ))
                .await;
                Ok(self.error_result(ctx, kind, state, amount, currency, &code, &message))
            }
            Err(GatewayCallError::Transport { message }) => {
                error!("network error during {:?}: {}", kind, message);
                self.append_silently(self.pending_attempt(
                    ctx,
                    kind,
                    amount,
                    currency,
                    known_payment_key.clone(),
                ))
                .await;
                Ok(self.pending_result(ctx, kind, amount, currency, known_payment_key, &message))
            }
        }
    }

    /// Persist an attempt record, logging instead of propagating on failure.
    /// Used only where the caller already holds a terminal or pending result
    /// it must be able to act on.
    async fn append_silently(&self, attempt: NewAttempt) {
        if let Err(e) = self.ledger.append_attempt(&attempt).await {
            error!(
                "failed to persist attempt record for transaction {}: {}",
                attempt.transaction_id, e
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn error_attempt(
        &self,
        ctx: &OperationContext,
        kind: TransactionKind,
        amount: i64,
        currency: &str,
        payment_key: Option<String>,
        code: &str,
        message: &str,
        http_status: u16,
    ) -> NewAttempt {
        NewAttempt {
            account_id: ctx.account_id,
            payment_id: ctx.payment_id,
            transaction_id: ctx.transaction_id,
            kind,
            amount,
            currency: currency.to_string(),
            payment_key,
            order_id: None,
            provider_status: None,
            provider_method: None,
            receipt_url: None,
            additional_data: Some(error_payload(code, message, http_status)),
            created_at: Utc::now(),
            tenant_id: ctx.tenant_id,
        }
    }

    fn pending_attempt(
        &self,
        ctx: &OperationContext,
        kind: TransactionKind,
        amount: i64,
        currency: &str,
        payment_key: Option<String>,
    ) -> NewAttempt {
        NewAttempt {
            account_id: ctx.account_id,
            payment_id: ctx.payment_id,
            transaction_id: ctx.transaction_id,
            kind,
            amount,
            currency: currency.to_string(),
            // Keeping the caller-known key is what lets a later resync find
            // the payment even though this call never got an answer.
            payment_key,
            order_id: None,
            provider_status: None,
            provider_method: None,
            receipt_url: None,
            additional_data: None,
            created_at: Utc::now(),
            tenant_id: ctx.tenant_id,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn error_result(
        &self,
        ctx: &OperationContext,
        kind: TransactionKind,
        state: TransactionState,
        amount: i64,
        currency: &str,
        code: &str,
        message: &str,
    ) -> TransactionResult {
        TransactionResult {
            transaction_id: ctx.transaction_id,
            payment_id: ctx.payment_id,
            kind,
            state,
            amount,
            currency: currency.to_string(),
            gateway_error: Some(message.to_string()),
            gateway_error_code: Some(code.to_string()),
            first_reference: None,
            second_reference: None,
            created_at: Utc::now(),
        }
    }

    fn pending_result(
        &self,
        ctx: &OperationContext,
        kind: TransactionKind,
        amount: i64,
        currency: &str,
        payment_key: Option<String>,
        message: &str,
    ) -> TransactionResult {
        TransactionResult {
            transaction_id: ctx.transaction_id,
            payment_id: ctx.payment_id,
            kind,
            state: TransactionState::Pending,
            amount,
            currency: currency.to_string(),
            gateway_error: Some(message.to_string()),
            gateway_error_code: Some(NETWORK_ERROR_CODE.to_string()),
            first_reference: payment_key,
            second_reference: None,
            created_at: Utc::now(),
        }
    }
}

fn validate_refund(
    previous: Option<Attempt>,
    amount: Option<i64>,
    payment_id: Uuid,
) -> Result<Attempt, EngineError> {
    let previous = match previous {
        Some(p) if p.payment_key.is_some() => p,
        _ => {
            error!("cannot find original payment for refund: payment_id={}", payment_id);
            return Err(EngineError::Validation {
                code: REFUND_ERROR,
                message: format!("Original payment not found for payment_id={}", payment_id),
            });
        }
    };

    match previous.provider_status.as_deref() {
        Some("DONE") | Some("PARTIAL_CANCELED") => {}
        other => {
            error!(
                "cannot refund payment with status {:?}: payment_id={}",
                other, payment_id
            );
            return Err(EngineError::Validation {
                code: REFUND_ERROR,
                message: format!(
                    "Original payment is not in DONE or PARTIAL_CANCELED status, current status={:?}",
                    other
                ),
            });
        }
    }

    if let Some(amount) = amount {
        if amount <= 0 {
            return Err(EngineError::Validation {
                code: REFUND_ERROR,
                message: "Refund amount must be greater than zero".to_string(),
            });
        }
        if amount > previous.amount {
            error!(
                "refund amount {} exceeds original payment amount {}: payment_id={}",
                amount, previous.amount, payment_id
            );
            return Err(EngineError::Validation {
                code: REFUND_ERROR,
                message: format!(
                    "Refund amount {} exceeds original payment amount {}",
                    amount, previous.amount
                ),
            });
        }
    }

    Ok(previous)
}

/// Collapse the append-only attempt history to one result per logical
/// transaction: the attempt with the highest record id wins, collection
/// order follows each transaction's first appearance.
fn collapse_to_latest_per_transaction(attempts: &[Attempt]) -> Vec<TransactionResult> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut latest: HashMap<Uuid, &Attempt> = HashMap::new();
    for attempt in attempts {
        if !latest.contains_key(&attempt.transaction_id) {
            order.push(attempt.transaction_id);
        }
        latest.insert(attempt.transaction_id, attempt);
    }
    order
        .into_iter()
        .map(|id| result_from_attempt(latest[&id]))
        .collect()
}

fn result_from_attempt(attempt: &Attempt) -> TransactionResult {
    TransactionResult {
        transaction_id: attempt.transaction_id,
        payment_id: attempt.payment_id,
        kind: attempt.kind(),
        state: attempt.state(),
        amount: attempt.amount,
        currency: attempt.currency.clone(),
        gateway_error: None,
        gateway_error_code: None,
        first_reference: attempt.payment_key.clone(),
        second_reference: attempt.order_id.clone(),
        created_at: attempt.created_at,
    }
}

/// Sanitized forensic payload for a provider error.
fn error_payload(code: &str, message: &str, http_status: u16) -> serde_json::Value {
    serde_json::json!({
        "errorCode": code,
        "errorMessage": mask_card_numbers(message),
        "statusCode": http_status,
    })
}

fn to_json<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

/// Show only the first and last four characters of a sensitive key.
pub fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &key[..4], &key[key.len() - 4..])
}

/// Mask card-number-like digit sequences in free-form provider messages
/// before they land in the forensic payload.
pub fn mask_card_numbers(message: &str) -> String {
    static GROUPED: OnceLock<Regex> = OnceLock::new();
    static LONG_RUN: OnceLock<Regex> = OnceLock::new();
    let grouped = GROUPED.get_or_init(|| {
        Regex::new(r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b").expect("valid regex")
    });
    let long_run = LONG_RUN.get_or_init(|| Regex::new(r"\b\d{13,19}\b").expect("valid regex"));

    let masked = grouped.replace_all(message, "****-****-****-****");
    long_run.replace_all(&masked, "****").into_owned()
}

//! Toss Payments API request and response shapes
//!
//! Response structs keep the full documented payload because the entire
//! response is persisted as the forensic payload of an attempt record.
//! Unknown fields are ignored and most fields are optional: the API adds
//! fields over time and error paths omit most of them.

use serde::{Deserialize, Serialize};

/// A payment object as returned by `/v1/payments/*` and `/v1/billing/*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossPayment {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub payment_key: Option<String>,
    #[serde(rename = "type", default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub order_name: Option<String>,
    #[serde(rename = "mId", default)]
    pub m_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub total_amount: Option<i64>,
    #[serde(default)]
    pub balance_amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub requested_at: Option<String>,
    #[serde(default)]
    pub approved_at: Option<String>,
    #[serde(default)]
    pub use_escrow: Option<bool>,
    #[serde(default)]
    pub transaction_key: Option<String>,
    #[serde(default)]
    pub last_transaction_key: Option<String>,
    #[serde(default)]
    pub supplied_amount: Option<i64>,
    #[serde(default)]
    pub vat: Option<i64>,
    #[serde(default)]
    pub tax_free_amount: Option<i64>,
    #[serde(default)]
    pub cancels: Option<Vec<TossCancel>>,
    #[serde(default)]
    pub card: Option<TossCard>,
    #[serde(default)]
    pub receipt: Option<TossReceipt>,
    #[serde(default)]
    pub easy_pay: Option<TossEasyPay>,
    #[serde(default)]
    pub failure: Option<TossErrorBody>,
}

impl TossPayment {
    /// The receipt URL, preferring the payment-level receipt over the
    /// card-level one.
    pub fn receipt_url(&self) -> Option<&str> {
        if let Some(receipt) = &self.receipt {
            if let Some(url) = &receipt.url {
                return Some(url);
            }
        }
        self.card.as_ref().and_then(|c| c.receipt_url.as_deref())
    }

    /// The transaction key of the most recent cancellation. The provider's
    /// cancels list is append-only, so the tail is the latest one.
    pub fn latest_cancel_transaction_key(&self) -> Option<&str> {
        self.cancels
            .as_ref()
            .and_then(|cancels| cancels.last())
            .and_then(|cancel| cancel.transaction_key.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossCancel {
    #[serde(default)]
    pub cancel_amount: Option<i64>,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub tax_free_amount: Option<i64>,
    #[serde(default)]
    pub tax_exemption_amount: Option<i64>,
    #[serde(default)]
    pub refundable_amount: Option<i64>,
    #[serde(default)]
    pub canceled_at: Option<String>,
    #[serde(default)]
    pub transaction_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossCard {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub installment_plan_months: Option<i32>,
    #[serde(default)]
    pub approve_no: Option<String>,
    #[serde(default)]
    pub use_card_point: Option<bool>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
    #[serde(default)]
    pub acquire_status: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub issuer_code: Option<String>,
    #[serde(default)]
    pub acquirer_code: Option<String>,
    #[serde(default)]
    pub is_interest_free: Option<bool>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossReceipt {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossEasyPay {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub discount_amount: Option<i64>,
}

/// Structured error body returned on non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TossErrorBody {
    pub code: String,
    pub message: String,
}

/// A billing credential issued by `/v1/billing/authorizations/issue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossBilling {
    #[serde(rename = "mId", default)]
    pub m_id: Option<String>,
    pub customer_key: String,
    #[serde(default)]
    pub authenticated_at: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    pub billing_key: String,
    #[serde(default)]
    pub card: Option<TossBillingCard>,
    #[serde(default)]
    pub card_company: Option<String>,
    #[serde(default)]
    pub card_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TossBillingCard {
    #[serde(default)]
    pub issuer_code: Option<String>,
    #[serde(default)]
    pub acquirer_code: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub owner_type: Option<String>,
}

/// Body for `POST /v1/payments/confirm`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmRequest {
    pub payment_key: String,
    pub order_id: String,
    pub amount: i64,
}

/// Body for `POST /v1/payments/{paymentKey}/cancel`. `cancelAmount` is
/// omitted for a full refund.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCancelRequest {
    pub cancel_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_amount: Option<i64>,
}

/// Body for `POST /v1/billing/authorizations/issue`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingKeyRequest {
    pub customer_key: String,
    pub auth_key: String,
}

/// Body for `POST /v1/billing/{billingKey}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingKeyPaymentRequest {
    pub amount: i64,
    pub order_id: String,
    pub order_name: String,
    pub customer_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
}

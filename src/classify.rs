//! Status and error classification
//!
//! Pure mappings from raw Toss payment statuses and API error codes to the
//! ledger's transaction states. No I/O happens here; the reconciliation
//! engine feeds every gateway outcome through these functions.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Derived state of a logical transaction.
///
/// Never stored directly; always derived from the raw provider status (or
/// from the absence of a response) on the way in and out of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Still settling, or outcome unknown (network failure, unknown status).
    Pending,
    /// Money moved successfully. A later refund does not retroactively
    /// change the original purchase attempt's state.
    Processed,
    /// Never completed at the provider (aborted, expired). Terminal.
    Canceled,
    /// Terminal provider-side failure, not retryable.
    Error,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Processed | TransactionState::Canceled | TransactionState::Error
        )
    }
}

/// Map a raw Toss payment status to a transaction state.
///
/// `DONE`, `PARTIAL_CANCELED` and `CANCELED` all map to `Processed`:
/// a CANCELED original payment still represents a purchase that succeeded
/// and was subsequently refunded. Only the refund's own attempt record
/// carries the refund's state.
///
/// Unknown statuses stay `Pending` so they remain retryable; failing closed
/// to a terminal state on unrecognized input would strand transactions.
pub fn classify_status(status: Option<&str>) -> TransactionState {
    match status {
        None => TransactionState::Pending,
        Some("READY") | Some("IN_PROGRESS") | Some("WAITING_FOR_DEPOSIT") => {
            TransactionState::Pending
        }
        Some("DONE") | Some("PARTIAL_CANCELED") | Some("CANCELED") => TransactionState::Processed,
        Some("ABORTED") | Some("EXPIRED") => TransactionState::Canceled,
        Some(other) => {
            warn!("unknown Toss payment status {:?}, defaulting to PENDING", other);
            TransactionState::Pending
        }
    }
}

/// Classify a structured provider error on the purchase/refund path.
///
/// 5xx and known provider-side-processing failures are transient: the call
/// may have had an effect server-side, so the attempt stays `Pending` for a
/// later resync. Everything else in the 4xx range is a terminal `Error`.
pub fn classify_payment_error(http_status: u16, code: Option<&str>) -> TransactionState {
    if http_status >= 500 || is_retryable_code(code) {
        TransactionState::Pending
    } else {
        TransactionState::Error
    }
}

/// Classify a structured provider error on the resync/query path.
///
/// Stricter than the payment path: a 404 or a definitely-gone/unauthorized
/// code means the reference will never resolve, so retrying is pointless.
/// Unmatched cases default to `Pending` because queries are safe to repeat.
pub fn classify_query_error(http_status: u16, code: Option<&str>) -> TransactionState {
    if http_status == 404 || is_unrecoverable_code(code) {
        TransactionState::Error
    } else {
        TransactionState::Pending
    }
}

fn is_retryable_code(code: Option<&str>) -> bool {
    match code {
        None => false,
        Some(code) => {
            (code.starts_with("FAILED_") && code.contains("PROCESSING"))
                || code == "PROVIDER_ERROR"
                || code == "COMMON_ERROR"
        }
    }
}

fn is_unrecoverable_code(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("NOT_FOUND_PAYMENT")
            | Some("NOT_FOUND")
            | Some("UNAUTHORIZED_KEY")
            | Some("INCORRECT_BASIC_AUTH_FORMAT")
            | Some("FORBIDDEN_REQUEST")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_statuses_stay_pending() {
        for status in ["READY", "IN_PROGRESS", "WAITING_FOR_DEPOSIT"] {
            assert_eq!(classify_status(Some(status)), TransactionState::Pending);
        }
    }

    #[test]
    fn successful_statuses_map_to_processed() {
        for status in ["DONE", "PARTIAL_CANCELED", "CANCELED"] {
            assert_eq!(classify_status(Some(status)), TransactionState::Processed);
        }
    }

    #[test]
    fn never_completed_statuses_map_to_canceled() {
        for status in ["ABORTED", "EXPIRED"] {
            assert_eq!(classify_status(Some(status)), TransactionState::Canceled);
        }
    }

    #[test]
    fn missing_and_unknown_statuses_stay_pending() {
        assert_eq!(classify_status(None), TransactionState::Pending);
        assert_eq!(classify_status(Some("SOMETHING_NEW")), TransactionState::Pending);
        assert_eq!(classify_status(Some("")), TransactionState::Pending);
    }

    #[test]
    fn server_errors_are_pending_on_payment_path() {
        assert_eq!(classify_payment_error(500, None), TransactionState::Pending);
        assert_eq!(
            classify_payment_error(503, Some("INVALID_CARD")),
            TransactionState::Pending
        );
    }

    #[test]
    fn retryable_codes_are_pending_even_on_4xx() {
        assert_eq!(
            classify_payment_error(400, Some("FAILED_INTERNAL_SYSTEM_PROCESSING")),
            TransactionState::Pending
        );
        assert_eq!(
            classify_payment_error(400, Some("PROVIDER_ERROR")),
            TransactionState::Pending
        );
        assert_eq!(
            classify_payment_error(400, Some("COMMON_ERROR")),
            TransactionState::Pending
        );
    }

    #[test]
    fn other_client_errors_are_terminal_on_payment_path() {
        assert_eq!(
            classify_payment_error(400, Some("INVALID_CARD_EXPIRATION")),
            TransactionState::Error
        );
        assert_eq!(classify_payment_error(403, None), TransactionState::Error);
        // FAILED_ prefix alone is not enough, the code must mention PROCESSING
        assert_eq!(
            classify_payment_error(400, Some("FAILED_CARD_COMPANY")),
            TransactionState::Error
        );
    }

    #[test]
    fn query_path_recognizes_permanently_gone_references() {
        assert_eq!(classify_query_error(404, None), TransactionState::Error);
        for code in [
            "NOT_FOUND_PAYMENT",
            "NOT_FOUND",
            "UNAUTHORIZED_KEY",
            "INCORRECT_BASIC_AUTH_FORMAT",
            "FORBIDDEN_REQUEST",
        ] {
            assert_eq!(classify_query_error(400, Some(code)), TransactionState::Error);
        }
    }

    #[test]
    fn query_path_prefers_retry_for_everything_else() {
        assert_eq!(classify_query_error(500, None), TransactionState::Pending);
        assert_eq!(
            classify_query_error(400, Some("FAILED_INTERNAL_SYSTEM_PROCESSING")),
            TransactionState::Pending
        );
        assert_eq!(
            classify_query_error(400, Some("SOME_NEW_CODE")),
            TransactionState::Pending
        );
    }

    #[test]
    fn terminal_states() {
        assert!(TransactionState::Processed.is_terminal());
        assert!(TransactionState::Canceled.is_terminal());
        assert!(TransactionState::Error.is_terminal());
        assert!(!TransactionState::Pending.is_terminal());
    }
}

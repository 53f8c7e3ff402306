//! Postgres implementation of the ledger store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ledger::error::{LedgerError, LedgerResult};
use crate::ledger::store::{Attempt, Credential, LedgerStore, NewAttempt, NewCredential};

const ATTEMPT_COLUMNS: &str = "record_id, account_id, payment_id, transaction_id, kind, amount, \
     currency, payment_key, order_id, provider_status, provider_method, receipt_url, \
     additional_data, created_at, tenant_id";

const CREDENTIAL_COLUMNS: &str = "record_id, account_id, payment_method_id, billing_key, \
     customer_key, is_default, is_deleted, additional_data, created_at, updated_at, tenant_id";

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn append_attempt(&self, attempt: &NewAttempt) -> LedgerResult<Attempt> {
        sqlx::query_as::<_, Attempt>(&format!(
            "INSERT INTO toss_attempts (account_id, payment_id, transaction_id, kind, amount, \
             currency, payment_key, order_id, provider_status, provider_method, receipt_url, \
             additional_data, created_at, tenant_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {ATTEMPT_COLUMNS}"
        ))
        .bind(attempt.account_id)
        .bind(attempt.payment_id)
        .bind(attempt.transaction_id)
        .bind(attempt.kind.as_str())
        .bind(attempt.amount)
        .bind(&attempt.currency)
        .bind(&attempt.payment_key)
        .bind(&attempt.order_id)
        .bind(&attempt.provider_status)
        .bind(&attempt.provider_method)
        .bind(&attempt.receipt_url)
        .bind(&attempt.additional_data)
        .bind(attempt.created_at)
        .bind(attempt.tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::from_sqlx(e).with_context("appending attempt"))
    }

    async fn latest_by_transaction(
        &self,
        transaction_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>> {
        sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM toss_attempts \
             WHERE transaction_id = $1 AND tenant_id = $2 \
             ORDER BY record_id DESC LIMIT 1"
        ))
        .bind(transaction_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn latest_by_payment(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>> {
        sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM toss_attempts \
             WHERE payment_id = $1 AND tenant_id = $2 \
             ORDER BY record_id DESC LIMIT 1"
        ))
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn latest_successful_purchase(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Attempt>> {
        sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM toss_attempts \
             WHERE payment_id = $1 AND tenant_id = $2 \
             AND kind = 'PURCHASE' AND provider_status IN ('DONE', 'PARTIAL_CANCELED') \
             ORDER BY record_id DESC LIMIT 1"
        ))
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn attempts_for_payment(
        &self,
        payment_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Vec<Attempt>> {
        sqlx::query_as::<_, Attempt>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM toss_attempts \
             WHERE payment_id = $1 AND tenant_id = $2 \
             ORDER BY record_id ASC"
        ))
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn add_credential(&self, credential: &NewCredential) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;

        // The default flag is exclusive per account: clear siblings inside
        // the same transaction so a crash cannot leave two defaults.
        if credential.is_default {
            sqlx::query(
                "UPDATE toss_payment_methods SET is_default = FALSE, updated_at = $3 \
                 WHERE account_id = $1 AND tenant_id = $2",
            )
            .bind(credential.account_id)
            .bind(credential.tenant_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(LedgerError::from_sqlx)?;
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO toss_payment_methods (account_id, payment_method_id, billing_key, \
             customer_key, is_default, is_deleted, additional_data, created_at, updated_at, \
             tenant_id) \
             VALUES ($1, $2, $3, $4, $5, FALSE, $6, $7, $7, $8)",
        )
        .bind(credential.account_id)
        .bind(credential.payment_method_id)
        .bind(&credential.billing_key)
        .bind(&credential.customer_key)
        .bind(credential.is_default)
        .bind(&credential.additional_data)
        .bind(now)
        .bind(credential.tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::from_sqlx(e).with_context("adding billing credential"))?;

        tx.commit().await.map_err(LedgerError::from_sqlx)
    }

    async fn get_credential(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Option<Credential>> {
        sqlx::query_as::<_, Credential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM toss_payment_methods \
             WHERE payment_method_id = $1 AND tenant_id = $2 AND is_deleted = FALSE"
        ))
        .bind(payment_method_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn list_credentials(
        &self,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<Vec<Credential>> {
        sqlx::query_as::<_, Credential>(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM toss_payment_methods \
             WHERE account_id = $1 AND tenant_id = $2 AND is_deleted = FALSE \
             ORDER BY record_id ASC"
        ))
        .bind(account_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)
    }

    async fn soft_delete_credential(
        &self,
        payment_method_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE toss_payment_methods SET is_deleted = TRUE, updated_at = $3 \
             WHERE payment_method_id = $1 AND tenant_id = $2 AND is_deleted = FALSE",
        )
        .bind(payment_method_id)
        .bind(tenant_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(LedgerError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_default_credential(
        &self,
        payment_method_id: Uuid,
        account_id: Uuid,
        tenant_id: Uuid,
    ) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await.map_err(LedgerError::from_sqlx)?;
        let now = Utc::now();

        sqlx::query(
            "UPDATE toss_payment_methods SET is_default = FALSE, updated_at = $3 \
             WHERE account_id = $1 AND tenant_id = $2",
        )
        .bind(account_id)
        .bind(tenant_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?;

        sqlx::query(
            "UPDATE toss_payment_methods SET is_default = TRUE, updated_at = $3 \
             WHERE payment_method_id = $1 AND tenant_id = $2",
        )
        .bind(payment_method_id)
        .bind(tenant_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(LedgerError::from_sqlx)?;

        tx.commit().await.map_err(LedgerError::from_sqlx)
    }
}

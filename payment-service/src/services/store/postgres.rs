use super::{StoreError, TransactionStore};
use crate::config::DatabaseConfig;
use crate::models::{
    NewTransaction, StatusPolicy, Transaction, TransactionFilter, TransactionPatch, UpsertOutcome,
};
use async_trait::async_trait;
use metrics::histogram;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::types::Json;
use std::str::FromStr;
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

const COLUMNS: &str = "id, payment_reference, amount_minor_units, settlement_amount, currency_code, \
     status, customer_email, customer_name, metadata, created_at, updated_at";

/// PostgreSQL-backed [`TransactionStore`].
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
    policy: StatusPolicy,
}

impl PgTransactionStore {
    /// Create a new connection pool.
    #[instrument(skip(config), fields(service = "payment-service"))]
    pub async fn connect(config: &DatabaseConfig, policy: StatusPolicy) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            ssl = config.ssl,
            "Connecting to PostgreSQL"
        );

        let mut options = PgConnectOptions::from_str(config.url.expose_secret())?;
        if config.ssl {
            options = options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.idle_timeout)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool, policy })
    }

    pub fn from_pool(pool: PgPool, policy: StatusPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;
        info!("Database migrations completed");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

fn observe(operation: &'static str, started: Instant) {
    histogram!("db_query_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    #[instrument(skip(self, record), fields(payment_reference = %record.payment_reference))]
    async fn create(&self, record: &NewTransaction) -> Result<Transaction, StoreError> {
        let started = Instant::now();

        let sql = format!(
            r#"
            INSERT INTO transactions
                (id, payment_reference, amount_minor_units, settlement_amount, currency_code,
                 status, customer_email, customer_name, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {COLUMNS}
            "#
        );

        let transaction = sqlx::query_as::<_, Transaction>(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.payment_reference)
            .bind(record.amount_minor_units)
            .bind(record.settlement_amount)
            .bind(&record.currency_code)
            .bind(record.status)
            .bind(&record.customer_email)
            .bind(&record.customer_name)
            .bind(Json(&record.metadata))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    StoreError::Conflict(record.payment_reference.clone())
                }
                other => StoreError::Database(other),
            })?;

        observe("create", started);
        info!(transaction_id = %transaction.id, "Transaction created");

        Ok(transaction)
    }

    #[instrument(skip(self, patch))]
    async fn update(
        &self,
        payment_reference: &str,
        patch: &TransactionPatch,
    ) -> Result<Option<Transaction>, StoreError> {
        if patch.is_empty() {
            return Ok(None);
        }

        let started = Instant::now();

        let sql = format!(
            r#"
            UPDATE transactions SET
                status = COALESCE($2, status),
                customer_email = COALESCE($3, customer_email),
                customer_name = COALESCE($4, customer_name),
                metadata = COALESCE($5, metadata),
                updated_at = NOW()
            WHERE payment_reference = $1
              AND ($6 OR $2::varchar IS NULL OR status <> 'succeeded' OR $2::varchar = 'succeeded')
            RETURNING {COLUMNS}
            "#
        );

        let transaction = sqlx::query_as::<_, Transaction>(&sql)
            .bind(payment_reference)
            .bind(patch.status)
            .bind(&patch.customer_email)
            .bind(&patch.customer_name)
            .bind(patch.metadata.as_ref().map(Json))
            .bind(self.policy.allow_terminal_overwrite)
            .fetch_optional(&self.pool)
            .await?;

        observe("update", started);
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn get(&self, payment_reference: &str) -> Result<Option<Transaction>, StoreError> {
        let started = Instant::now();

        let sql = format!("SELECT {COLUMNS} FROM transactions WHERE payment_reference = $1");
        let transaction = sqlx::query_as::<_, Transaction>(&sql)
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await?;

        observe("get", started);
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, StoreError> {
        let started = Instant::now();

        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM transactions
            WHERE ($1::varchar IS NULL OR customer_email = $1)
              AND ($2::varchar IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#
        );

        let transactions = sqlx::query_as::<_, Transaction>(&sql)
            .bind(&filter.customer_email)
            .bind(filter.status)
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await?;

        observe("list", started);
        Ok(transactions)
    }

    #[instrument(skip(self))]
    async fn count(&self, filter: &TransactionFilter) -> Result<i64, StoreError> {
        let started = Instant::now();

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE ($1::varchar IS NULL OR customer_email = $1)
              AND ($2::varchar IS NULL OR status = $2)
            "#,
        )
        .bind(&filter.customer_email)
        .bind(filter.status)
        .fetch_one(&self.pool)
        .await?;

        observe("count", started);
        Ok(total)
    }

    #[instrument(skip(self, record), fields(payment_reference = %record.payment_reference, status = %record.status))]
    async fn upsert(&self, record: &NewTransaction) -> Result<UpsertOutcome, StoreError> {
        let started = Instant::now();

        // The WHERE clause turns no-op and policy-refused updates into zero
        // returned rows; xmax = 0 only holds for a freshly inserted tuple.
        let inserted = sqlx::query_scalar::<_, bool>(
            r#"
            INSERT INTO transactions AS t
                (id, payment_reference, amount_minor_units, settlement_amount, currency_code,
                 status, customer_email, customer_name, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (payment_reference) DO UPDATE SET
                amount_minor_units = EXCLUDED.amount_minor_units,
                currency_code = EXCLUDED.currency_code,
                status = EXCLUDED.status,
                customer_email = COALESCE(EXCLUDED.customer_email, t.customer_email),
                customer_name = COALESCE(EXCLUDED.customer_name, t.customer_name),
                metadata = (t.metadata - 'usdcAmount') || EXCLUDED.metadata,
                updated_at = NOW()
            WHERE (t.amount_minor_units, t.currency_code, t.status,
                   t.customer_email, t.customer_name, t.metadata)
                  IS DISTINCT FROM
                  (EXCLUDED.amount_minor_units, EXCLUDED.currency_code, EXCLUDED.status,
                   COALESCE(EXCLUDED.customer_email, t.customer_email),
                   COALESCE(EXCLUDED.customer_name, t.customer_name),
                   (t.metadata - 'usdcAmount') || EXCLUDED.metadata)
              AND ($10 OR t.status <> 'succeeded' OR EXCLUDED.status = 'succeeded')
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.payment_reference)
        .bind(record.amount_minor_units)
        .bind(record.settlement_amount)
        .bind(&record.currency_code)
        .bind(record.status)
        .bind(&record.customer_email)
        .bind(&record.customer_name)
        .bind(Json(&record.metadata))
        .bind(self.policy.allow_terminal_overwrite)
        .fetch_optional(&self.pool)
        .await?;

        observe("upsert", started);

        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::Unchanged,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

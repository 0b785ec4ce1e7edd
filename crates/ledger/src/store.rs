//! SQLite-backed ledger store

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::models::*;
use crate::{LedgerError, Result};

/// SQLite ledger store.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

const MIGRATION_V1: &str = r#"
-- Users (students and administrators)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    student_code TEXT UNIQUE,
    full_name TEXT NOT NULL,
    class_name TEXT,
    is_student INTEGER NOT NULL DEFAULT 1,
    training_points INTEGER NOT NULL DEFAULT 0
);

-- One wallet per user; cascades with the owning user
CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    address TEXT NOT NULL UNIQUE,
    secret_key BLOB NOT NULL,
    balance INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wallets_address ON wallets(address);

-- Activities; soft-deleted via is_active, never hard-deleted while
-- registrations reference them
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    reward_amount INTEGER NOT NULL,
    max_participants INTEGER NOT NULL,
    start_date INTEGER NOT NULL,
    end_date INTEGER NOT NULL,
    allowed_classes TEXT,
    auto_approve INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    chain_activity_id INTEGER,
    created_at INTEGER NOT NULL
);

-- At most one registration per (student, activity)
CREATE TABLE IF NOT EXISTS activity_registrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL REFERENCES users(id),
    activity_id INTEGER NOT NULL REFERENCES activities(id),
    registered_at INTEGER NOT NULL,
    is_approved INTEGER NOT NULL DEFAULT 0,
    approved_at INTEGER,
    is_participation_confirmed INTEGER NOT NULL DEFAULT 0,
    participation_confirmed_at INTEGER,
    evidence_image_url TEXT,
    UNIQUE(student_id, activity_id)
);

CREATE INDEX IF NOT EXISTS idx_registrations_activity ON activity_registrations(activity_id);

-- Append-only audit log
CREATE TABLE IF NOT EXISTS transaction_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    activity_id INTEGER,
    amount INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    description TEXT NOT NULL,
    chain_ref TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_txlog_user ON transaction_log(user_id);
CREATE INDEX IF NOT EXISTS idx_txlog_activity ON transaction_log(user_id, activity_id);
"#;

impl Ledger {
    /// Open or create the ledger database at `path`.
    ///
    /// Enables WAL mode and runs the embedded migration.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let url = format!("sqlite:{}?mode=rwc", path.display());

        info!("Opening ledger at {}", path.display());

        let options = SqliteConnectOptions::from_str(&url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Open an in-memory ledger (tests and mock deployments)
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection: every pool handle must see the same
        // in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        debug!("Running ledger migrations");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn insert_user(
        &self,
        id: &str,
        student_code: Option<&str>,
        full_name: &str,
        class_name: Option<&str>,
        is_student: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, student_code, full_name, class_name, is_student)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(student_code)
        .bind(full_name)
        .bind(class_name)
        .bind(is_student)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn user_by_student_code(&self, student_code: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE student_code = ?")
            .bind(student_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // ========================================================================
    // Wallets
    // ========================================================================

    /// Insert a wallet row. A UNIQUE violation on `user_id` means a
    /// concurrent provisioner won the race; callers detect that with
    /// [`crate::is_unique_violation`] and read back the winner's row.
    pub async fn insert_wallet(
        &self,
        user_id: &str,
        address: &str,
        secret_key: &[u8],
    ) -> Result<WalletRow> {
        sqlx::query(
            r#"
            INSERT INTO wallets (user_id, address, secret_key, balance, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(address)
        .bind(secret_key)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;

        self.wallet_by_user(user_id)
            .await?
            .ok_or(LedgerError::WalletNotFound)
    }

    pub async fn wallet_by_user(&self, user_id: &str) -> Result<Option<WalletRow>> {
        let row = sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn wallet_by_address(&self, address: &str) -> Result<Option<WalletRow>> {
        let row = sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Overwrite the cached balance with an authoritative on-chain value
    pub async fn overwrite_balance(&self, address: &str, balance: i64) -> Result<()> {
        let result = sqlx::query("UPDATE wallets SET balance = ? WHERE address = ?")
            .bind(balance)
            .bind(address)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound);
        }
        Ok(())
    }

    /// Credit the cached balance and append the audit row in one local
    /// transaction. Returns the new cached balance.
    pub async fn credit_wallet_and_log(
        &self,
        user_id: &str,
        activity_id: Option<i64>,
        amount: i64,
        transaction_type: &str,
        description: &str,
        chain_ref: Option<&str>,
    ) -> Result<i64> {
        let now = Self::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE wallets SET balance = balance + ? WHERE user_id = ?")
            .bind(amount)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound);
        }

        sqlx::query(
            r#"
            INSERT INTO transaction_log
                (user_id, activity_id, amount, transaction_type, description, chain_ref, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(activity_id)
        .bind(amount)
        .bind(transaction_type)
        .bind(description)
        .bind(chain_ref)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let new_balance: i64 =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(new_balance)
    }

    /// Debit the cached balance, append a conversion audit row and credit
    /// training points, all in one local transaction. Fails without any
    /// change if the cached balance is insufficient.
    pub async fn debit_and_convert(
        &self,
        user_id: &str,
        amount: i64,
        points: i64,
        description: &str,
        chain_ref: Option<&str>,
    ) -> Result<i64> {
        let now = Self::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE wallets SET balance = balance - ? WHERE user_id = ? AND balance >= ?",
        )
        .bind(amount)
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::InsufficientBalance);
        }

        sqlx::query(
            r#"
            INSERT INTO transaction_log
                (user_id, activity_id, amount, transaction_type, description, chain_ref, created_at)
            VALUES (?, NULL, ?, 'coin-conversion', ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(-amount)
        .bind(description)
        .bind(chain_ref)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE users SET training_points = training_points + ? WHERE id = ?",
        )
        .bind(points)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound);
        }

        let new_balance: i64 =
            sqlx::query_scalar("SELECT balance FROM wallets WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(new_balance)
    }

    // ========================================================================
    // Activities
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_activity(
        &self,
        name: &str,
        description: &str,
        reward_amount: i64,
        max_participants: i64,
        start_date: i64,
        end_date: i64,
        allowed_classes: Option<&str>,
        auto_approve: bool,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO activities
                (name, description, reward_amount, max_participants, start_date, end_date,
                 allowed_classes, auto_approve, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(reward_amount)
        .bind(max_participants)
        .bind(start_date)
        .bind(end_date)
        .bind(allowed_classes)
        .bind(auto_approve)
        .bind(Self::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn activity_by_id(&self, id: i64) -> Result<Option<ActivityRow>> {
        let row = sqlx::query_as::<_, ActivityRow>("SELECT * FROM activities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_active_activities(&self) -> Result<Vec<ActivityRow>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT * FROM activities WHERE is_active = 1 ORDER BY start_date ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Update the mutable reward/window fields; identity fields stay fixed
    pub async fn update_activity(
        &self,
        id: i64,
        reward_amount: Option<i64>,
        max_participants: Option<i64>,
        end_date: Option<i64>,
        allowed_classes: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE activities SET
                reward_amount = COALESCE(?, reward_amount),
                max_participants = COALESCE(?, max_participants),
                end_date = COALESCE(?, end_date),
                allowed_classes = COALESCE(?, allowed_classes)
            WHERE id = ?
            "#,
        )
        .bind(reward_amount)
        .bind(max_participants)
        .bind(end_date)
        .bind(allowed_classes)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft delete
    pub async fn deactivate_activity(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE activities SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the on-chain completion-registry id for an activity
    pub async fn set_chain_activity_id(&self, id: i64, chain_activity_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE activities SET chain_activity_id = ? WHERE id = ?")
            .bind(chain_activity_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Registrations (guarded state-machine writes)
    // ========================================================================

    /// Insert a registration only if the activity still has capacity.
    ///
    /// Returns `false` when the slot count is exhausted. The capacity
    /// check and the insert are one statement, so concurrent bursts
    /// cannot overshoot `max_participants`. A UNIQUE violation means the
    /// student is already registered.
    pub async fn insert_registration_if_capacity(
        &self,
        student_id: &str,
        activity_id: i64,
        max_participants: i64,
        approved: bool,
    ) -> Result<bool> {
        let now = Self::now();
        let approved_at = approved.then_some(now);
        let result = sqlx::query(
            r#"
            INSERT INTO activity_registrations
                (student_id, activity_id, registered_at, is_approved, approved_at,
                 is_participation_confirmed)
            SELECT ?, ?, ?, ?, ?, 0
            WHERE (SELECT COUNT(*) FROM activity_registrations WHERE activity_id = ?) < ?
            "#,
        )
        .bind(student_id)
        .bind(activity_id)
        .bind(now)
        .bind(approved)
        .bind(approved_at)
        .bind(activity_id)
        .bind(max_participants)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn registration(
        &self,
        student_id: &str,
        activity_id: i64,
    ) -> Result<Option<RegistrationRow>> {
        let row = sqlx::query_as::<_, RegistrationRow>(
            "SELECT * FROM activity_registrations WHERE student_id = ? AND activity_id = ?",
        )
        .bind(student_id)
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn registrations_for_activity(
        &self,
        activity_id: i64,
    ) -> Result<Vec<RegistrationRow>> {
        let rows = sqlx::query_as::<_, RegistrationRow>(
            "SELECT * FROM activity_registrations WHERE activity_id = ? ORDER BY registered_at ASC",
        )
        .bind(activity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn registrations_for_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<RegistrationRow>> {
        let rows = sqlx::query_as::<_, RegistrationRow>(
            "SELECT * FROM activity_registrations WHERE student_id = ? ORDER BY registered_at DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Write-once approval flip. Returns `false` if the registration was
    /// already approved (or does not exist).
    pub async fn mark_registration_approved(
        &self,
        student_id: &str,
        activity_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE activity_registrations
            SET is_approved = 1, approved_at = ?
            WHERE student_id = ? AND activity_id = ? AND is_approved = 0
            "#,
        )
        .bind(Self::now())
        .bind(student_id)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write-once participation confirmation. Only flips when approved
    /// and not yet confirmed; concurrent confirms race on this single
    /// statement and exactly one wins.
    pub async fn mark_participation_confirmed(
        &self,
        student_id: &str,
        activity_id: i64,
        evidence_image_url: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE activity_registrations
            SET is_participation_confirmed = 1,
                participation_confirmed_at = ?,
                evidence_image_url = COALESCE(?, evidence_image_url)
            WHERE student_id = ? AND activity_id = ?
              AND is_approved = 1 AND is_participation_confirmed = 0
            "#,
        )
        .bind(Self::now())
        .bind(evidence_image_url)
        .bind(student_id)
        .bind(activity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Transaction log
    // ========================================================================

    pub async fn transactions_for_user(&self, user_id: &str) -> Result<Vec<TransactionLogRow>> {
        let rows = sqlx::query_as::<_, TransactionLogRow>(
            "SELECT * FROM transaction_log WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Whether a reward log row exists for this (student, activity) pair
    pub async fn has_reward_log(&self, user_id: &str, activity_id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM transaction_log
            WHERE user_id = ? AND activity_id = ? AND transaction_type = 'activity-reward'
            "#,
        )
        .bind(user_id)
        .bind(activity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Confirmed participations with no matching reward log row.
    ///
    /// The confirmation timestamp is the durable evidence that settlement
    /// was attempted; rows returned here are the chain/ledger divergence
    /// alert condition.
    pub async fn find_unsettled_confirmations(&self) -> Result<Vec<UnsettledConfirmation>> {
        let rows = sqlx::query_as::<_, UnsettledConfirmation>(
            r#"
            SELECT ar.student_id, ar.activity_id, ar.participation_confirmed_at
            FROM activity_registrations ar
            WHERE ar.is_participation_confirmed = 1
              AND NOT EXISTS (
                  SELECT 1 FROM transaction_log tl
                  WHERE tl.user_id = ar.student_id
                    AND tl.activity_id = ar.activity_id
                    AND tl.transaction_type = 'activity-reward'
              )
            ORDER BY ar.participation_confirmed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

//! Postgres-backed directory.
//!
//! Users live in `users`, permission and grouping rules in `casbin_rule`.
//! Both tables share one database, so every user mutation that touches a
//! grouping rule runs in a single transaction.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation on `users_email_key`) | `23505` | `DuplicateEmail` |
//! | Database (unique violation on `users_username_key`) | `23505` | `DuplicateUsername` |
//! | Any failure inside a user + grouping transaction | any | `Aborted` |
//! | Anything else | any | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};

use gatekeeper_auth::{
    GroupingRule, NewUser, PolicyRule, PolicySnapshot, PolicyStore, Role, StoreError, User,
    UserChanges, UserStore,
};
use gatekeeper_core::UserId;

use super::{GROUPING_PTYPE, POLICY_PTYPE};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          BIGSERIAL PRIMARY KEY,
    username    TEXT NOT NULL,
    email       TEXT NOT NULL,
    name        TEXT NOT NULL DEFAULT '',
    password    TEXT NOT NULL,
    role        TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT users_username_key UNIQUE (username),
    CONSTRAINT users_email_key UNIQUE (email)
);

CREATE TABLE IF NOT EXISTS casbin_rule (
    id     BIGSERIAL PRIMARY KEY,
    ptype  TEXT NOT NULL,
    v0     TEXT NOT NULL,
    v1     TEXT NOT NULL,
    v2     TEXT NOT NULL DEFAULT '',
    CONSTRAINT casbin_rule_unique UNIQUE (ptype, v0, v1, v2)
);
"#;

const USER_COLUMNS: &str = "id, username, email, name, password, role, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresDirectory {
    pool: Arc<PgPool>,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    #[instrument(skip(database_url), err)]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        info!(max_connections, "connected to postgres");
        Ok(Self::new(pool))
    }

    /// Create `users` and `casbin_rule` when missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn user_exists_where(
        &self,
        column: &'static str,
        value: &str,
        excluding: Option<UserId>,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM users WHERE {column} = $1 AND ($2::BIGINT IS NULL OR id <> $2))"
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .bind(excluding.map(|id| id.get()))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_exists", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| StoreError::Unavailable(format!("failed to read exists flag: {e}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy rules
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PolicyStore for PostgresDirectory {
    async fn load_policy(&self) -> Result<PolicySnapshot, StoreError> {
        let rows = sqlx::query("SELECT ptype, v0, v1, v2 FROM casbin_rule")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_policy", e))?;

        let mut policies = Vec::new();
        let mut groupings = Vec::new();
        for row in rows {
            let rule = RuleRow::from_row(&row)
                .map_err(|e| StoreError::Unavailable(format!("failed to decode rule row: {e}")))?;
            match rule.ptype.as_str() {
                POLICY_PTYPE => policies.push(PolicyRule::new(rule.v0, rule.v1, rule.v2)),
                GROUPING_PTYPE => groupings.push(GroupingRule::new(rule.v0, rule.v1)),
                _ => {}
            }
        }
        Ok(PolicySnapshot::new(policies, groupings))
    }

    async fn has_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM casbin_rule
                WHERE ptype = $1 AND v0 = $2 AND v1 = $3 AND v2 = $4
            )
            "#,
        )
        .bind(POLICY_PTYPE)
        .bind(&rule.subject)
        .bind(&rule.object)
        .bind(&rule.action)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_policy", e))?;
        row.try_get::<bool, _>(0)
            .map_err(|e| StoreError::Unavailable(format!("failed to read exists flag: {e}")))
    }

    async fn add_policy(&self, rule: &PolicyRule) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO casbin_rule (ptype, v0, v1, v2)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (ptype, v0, v1, v2) DO NOTHING
            "#,
        )
        .bind(POLICY_PTYPE)
        .bind(&rule.subject)
        .bind(&rule.object)
        .bind(&rule.action)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_policy", e))?;
        Ok(result.rows_affected() > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl UserStore for PostgresDirectory {
    async fn count_users(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_users", e))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| StoreError::Unavailable(format!("failed to read count: {e}")))?;
        Ok(count.max(0) as u64)
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        rows.iter().map(decode_user).collect()
    }

    async fn find_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;
        row.as_ref().map(decode_user).transpose()
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $1 ORDER BY id LIMIT 1"
        ))
        .bind(identity)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_identity", e))?;
        row.as_ref().map(decode_user).transpose()
    }

    async fn email_exists(&self, email: &str, excluding: Option<UserId>) -> Result<bool, StoreError> {
        self.user_exists_where("email", email, excluding).await
    }

    async fn username_exists(
        &self,
        username: &str,
        excluding: Option<UserId>,
    ) -> Result<bool, StoreError> {
        self.user_exists_where("username", username, excluding).await
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn insert_with_grouping(&self, user: NewUser) -> Result<User, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO users (username, email, name, password, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_tx_error("insert_user", e))?;
        let created = decode_user(&row)?;

        insert_grouping(&mut tx, &GroupingRule::for_user(created.id, &created.role)).await?;

        tx.commit()
            .await
            .map_err(|e| map_tx_error("commit_transaction", e))?;
        Ok(created)
    }

    #[instrument(skip(self, changes), fields(user_id = %id), err)]
    async fn update_with_grouping(&self, id: UserId, changes: UserChanges) -> Result<User, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_tx_error("lock_user", e))?
        .ok_or(StoreError::NotFound)?;
        let mut user = decode_user(&row)?;
        changes.apply_to(&mut user);

        sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, name = $4, role = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_tx_error("update_user", e))?;

        if let Some(role) = &changes.role {
            delete_groupings(&mut tx, id).await?;
            insert_grouping(&mut tx, &GroupingRule::for_user(id, role)).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_tx_error("commit_transaction", e))?;
        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_with_groupings(&self, id: UserId) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_tx_error("delete_user", e))?;
        if deleted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound);
        }

        delete_groupings(&mut tx, id).await?;

        tx.commit()
            .await
            .map_err(|e| map_tx_error("commit_transaction", e))?;
        Ok(())
    }

    async fn set_password_hash(&self, id: UserId, password_hash: String) -> Result<User, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users SET password = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id.get())
        .bind(&password_hash)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_password_hash", e))?
        .ok_or(StoreError::NotFound)?;
        decode_user(&row)
    }
}

async fn insert_grouping(
    tx: &mut Transaction<'_, Postgres>,
    rule: &GroupingRule,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO casbin_rule (ptype, v0, v1, v2)
        VALUES ($1, $2, $3, '')
        ON CONFLICT (ptype, v0, v1, v2) DO NOTHING
        "#,
    )
    .bind(GROUPING_PTYPE)
    .bind(&rule.user)
    .bind(&rule.role)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_tx_error("insert_grouping", e))?;
    Ok(())
}

async fn delete_groupings(tx: &mut Transaction<'_, Postgres>, id: UserId) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM casbin_rule WHERE ptype = $1 AND v0 = $2")
        .bind(GROUPING_PTYPE)
        .bind(id.as_subject())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_tx_error("delete_groupings", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

struct UserRow {
    id: i64,
    username: String,
    email: String,
    name: String,
    password: String,
    role: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            password: row.try_get("password")?,
            role: row.try_get("role")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::new(row.id),
            username: row.username,
            email: row.email,
            name: row.name,
            password_hash: row.password,
            role: Role::from(row.role),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

struct RuleRow {
    ptype: String,
    v0: String,
    v1: String,
    v2: String,
}

impl<'r> FromRow<'r, PgRow> for RuleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            ptype: row.try_get("ptype")?,
            v0: row.try_get("v0")?,
            v1: row.try_get("v1")?,
            v2: row.try_get("v2")?,
        })
    }
}

fn decode_user(row: &PgRow) -> Result<User, StoreError> {
    UserRow::from_row(row)
        .map(User::from)
        .map_err(|e| StoreError::Unavailable(format!("failed to decode user row: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────────────────────────

fn unique_violation(err: &sqlx::Error) -> Option<StoreError> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }
    match db_err.constraint() {
        Some("users_email_key") => Some(StoreError::DuplicateEmail),
        Some("users_username_key") => Some(StoreError::DuplicateUsername),
        _ => None,
    }
}

/// Map SQLx errors outside a multi-record transaction.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if let Some(dup) = unique_violation(&err) {
        return dup;
    }
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Unavailable(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        other => StoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

/// Map SQLx errors raised while a user + grouping transaction is open. The
/// transaction is rolled back when dropped.
fn map_tx_error(operation: &str, err: sqlx::Error) -> StoreError {
    if let Some(dup) = unique_violation(&err) {
        return dup;
    }
    StoreError::Aborted(format!("{operation}: {err}"))
}

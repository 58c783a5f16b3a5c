//! Postgres-backed credential store and refresh token ledger.
//!
//! Table and column names come from [`PrincipalKind::spec`], never from user
//! input. Every principal mutation runs in its own transaction and increments
//! `token_version` in SQL (`token_version = token_version + 1`), so concurrent
//! logins and logouts cannot lose an update.

use super::{CredentialStore, NewRefreshToken, RefreshTokenRecord, RefreshTokenStore, StoreError};
use crate::auth::principal::{NewPrincipal, Principal, PrincipalId, PrincipalKind};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgPool, Row, postgres::PgRow};
use tracing::{Instrument, info_span};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn write_error(err: sqlx::Error, what: &'static str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict
    } else {
        StoreError::Backend(anyhow::Error::new(err).context(what))
    }
}

fn select_principal(kind: PrincipalKind, filter_column: &str) -> String {
    let spec = kind.spec();
    let status = if spec.tracks_status {
        "status"
    } else {
        "NULL::TEXT"
    };
    format!(
        "SELECT id, {lookup} AS lookup_key, name, {secret} AS secret_hash, token_version, \
         {seen} AS last_seen_at, {status} AS status, created_at \
         FROM {table} WHERE {filter_column} = $1",
        lookup = spec.lookup_column,
        secret = spec.secret_column,
        seen = spec.seen_column,
        table = spec.table,
    )
}

fn principal_from_row(kind: PrincipalKind, row: &PgRow) -> Result<Principal, StoreError> {
    let id: i64 = row.try_get("id").context("missing id column")?;
    Ok(Principal {
        id: PrincipalId::new(id).map_err(|_| anyhow!("{kind} id {id} out of range"))?,
        kind,
        lookup_key: row.try_get("lookup_key").context("missing lookup key")?,
        display_name: row.try_get("name").context("missing name")?,
        secret_hash: row.try_get("secret_hash").context("missing secret hash")?,
        token_version: row
            .try_get("token_version")
            .context("missing token_version")?,
        last_seen_at: row.try_get("last_seen_at").context("missing last seen")?,
        status: row.try_get("status").context("missing status")?,
        created_at: row.try_get("created_at").context("missing created_at")?,
    })
}

fn refresh_token_from_row(row: &PgRow) -> Result<RefreshTokenRecord, StoreError> {
    let principal_id: i64 = row.try_get("principal_id").context("missing principal_id")?;
    let kind: String = row
        .try_get("principal_type")
        .context("missing principal_type")?;
    Ok(RefreshTokenRecord {
        id: row.try_get("id").context("missing id")?,
        token: row.try_get("token").context("missing token")?,
        principal_id: PrincipalId::new(principal_id)
            .map_err(|_| anyhow!("refresh token principal id {principal_id} out of range"))?,
        kind: kind
            .parse()
            .map_err(|_| anyhow!("refresh token has unknown principal type {kind}"))?,
        expires_at: row.try_get("expires_at").context("missing expires_at")?,
        is_revoked: row.try_get("is_revoked").context("missing is_revoked")?,
        created_at: row.try_get("created_at").context("missing created_at")?,
    })
}

const REFRESH_COLUMNS: &str =
    "id, token, principal_id, principal_type, expires_at, is_revoked, created_at";

impl PgStore {
    /// Run one `UPDATE ... RETURNING token_version` inside a transaction.
    async fn update_returning_version(
        &self,
        query: &str,
        id: PrincipalId,
        bind_text: Option<&str>,
        bind_time: Option<DateTime<Utc>>,
    ) -> Result<Option<i64>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .instrument(info_span!(
                "db.transaction",
                db.system = "postgresql",
                db.operation = "BEGIN"
            ))
            .await
            .context("failed to begin transaction")?;

        let mut statement = sqlx::query(query).bind(id.get());
        if let Some(text) = bind_text {
            statement = statement.bind(text);
        }
        if let Some(time) = bind_time {
            statement = statement.bind(time);
        }

        let row = statement
            .fetch_optional(&mut *tx)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            ))
            .await
            .context("failed to update token version")?;

        let version = row
            .map(|row| row.try_get::<i64, _>("token_version"))
            .transpose()
            .context("missing token_version")?;

        tx.commit()
            .instrument(info_span!(
                "db.transaction",
                db.system = "postgresql",
                db.operation = "COMMIT"
            ))
            .await
            .context("failed to commit token version update")?;

        Ok(version)
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .instrument(info_span!(
                "db.acquire",
                db.system = "postgresql",
                db.operation = "ACQUIRE"
            ))
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(info_span!(
                "db.ping",
                db.system = "postgresql",
                db.operation = "PING"
            ))
            .await
            .context("failed to ping database")?;
        Ok(())
    }

    async fn create_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError> {
        let spec = new.kind.spec();
        let query = format!(
            "INSERT INTO {table} ({lookup}, name, {secret}) VALUES ($1, $2, $3) RETURNING id",
            table = spec.table,
            lookup = spec.lookup_column,
            secret = spec.secret_column,
        );

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")?;

        let row = sqlx::query(&query)
            .bind(&new.lookup_key)
            .bind(&new.display_name)
            .bind(&new.secret_hash)
            .fetch_one(&mut *tx)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query.as_str()
            ))
            .await
            .map_err(|err| write_error(err, "failed to insert principal"))?;
        let id: i64 = row.try_get("id").context("missing id")?;

        let select = select_principal(new.kind, "id");
        let row = sqlx::query(&select)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to read inserted principal")?;
        let principal = principal_from_row(new.kind, &row)?;

        tx.commit()
            .await
            .context("failed to commit principal insert")?;

        Ok(principal)
    }

    async fn find_principal(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<Principal>, StoreError> {
        let query = select_principal(kind, "id");
        let row = sqlx::query(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to fetch principal by id")?;
        row.map(|row| principal_from_row(kind, &row)).transpose()
    }

    async fn find_by_lookup_key(
        &self,
        kind: PrincipalKind,
        lookup_key: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let query = select_principal(kind, kind.spec().lookup_column);
        let row = sqlx::query(&query)
            .bind(lookup_key)
            .fetch_optional(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to fetch principal by lookup key")?;
        row.map(|row| principal_from_row(kind, &row)).transpose()
    }

    async fn token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError> {
        let query = format!(
            "SELECT token_version FROM {} WHERE id = $1",
            kind.spec().table
        );
        let version = sqlx::query_scalar::<_, i64>(&query)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to fetch token version")?;
        Ok(version)
    }

    async fn record_sign_in(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let spec = kind.spec();
        let increment = i32::from(spec.sign_in_bumps_version);
        let status = if spec.tracks_status {
            ", status = 'active'"
        } else {
            ""
        };
        let query = format!(
            "UPDATE {table} SET token_version = token_version + {increment}, {seen} = $2{status} \
             WHERE id = $1 RETURNING token_version",
            table = spec.table,
            seen = spec.seen_column,
        );
        self.update_returning_version(&query, id, None, Some(now))
            .await
    }

    async fn bump_token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError> {
        let query = format!(
            "UPDATE {} SET token_version = token_version + 1 WHERE id = $1 RETURNING token_version",
            kind.spec().table
        );
        self.update_returning_version(&query, id, None, None).await
    }

    async fn replace_secret(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        secret_hash: &str,
    ) -> Result<Option<i64>, StoreError> {
        let spec = kind.spec();
        let query = format!(
            "UPDATE {table} SET {secret} = $2, token_version = token_version + 1 \
             WHERE id = $1 RETURNING token_version",
            table = spec.table,
            secret = spec.secret_column,
        );
        self.update_returning_version(&query, id, Some(secret_hash), None)
            .await
    }

    async fn count_principals(&self, kind: PrincipalKind) -> Result<i64, StoreError> {
        let query = format!("SELECT COUNT(*) FROM {}", kind.spec().table);
        let count = sqlx::query_scalar::<_, i64>(&query)
            .fetch_one(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to count principals")?;
        Ok(count)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(
        &self,
        new: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let query = format!(
            "INSERT INTO refresh_tokens (token, principal_id, principal_type, expires_at) \
             VALUES ($1, $2, $3, $4) RETURNING {REFRESH_COLUMNS}"
        );

        let mut tx = self
            .pool
            .begin()
            .instrument(info_span!(
                "db.transaction",
                db.system = "postgresql",
                db.operation = "BEGIN"
            ))
            .await
            .context("failed to begin transaction")?;

        let row = sqlx::query(&query)
            .bind(&new.token)
            .bind(new.principal_id.get())
            .bind(new.kind.as_str())
            .bind(new.expires_at)
            .fetch_one(&mut *tx)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query.as_str()
            ))
            .await
            .map_err(|err| write_error(err, "failed to insert refresh token"))?;
        let record = refresh_token_from_row(&row)?;

        tx.commit()
            .await
            .context("failed to commit refresh token insert")?;

        Ok(record)
    }

    async fn find_usable_refresh_token(
        &self,
        token: &str,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!(
            "SELECT {REFRESH_COLUMNS} FROM refresh_tokens \
             WHERE token = $1 AND principal_id = $2 AND principal_type = $3 \
             AND is_revoked = FALSE AND expires_at > $4"
        );
        let row = sqlx::query(&query)
            .bind(token)
            .bind(principal_id.get())
            .bind(kind.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to validate refresh token")?;
        row.map(|row| refresh_token_from_row(&row)).transpose()
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let query = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token = $1");
        let row = sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query.as_str()
            ))
            .await
            .context("failed to fetch refresh token")?;
        row.map(|row| refresh_token_from_row(&row)).transpose()
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let query = "UPDATE refresh_tokens SET is_revoked = TRUE WHERE token = $1 AND is_revoked = FALSE";
        let result = sqlx::query(query)
            .bind(token)
            .execute(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            ))
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<u64, StoreError> {
        let query = "UPDATE refresh_tokens SET is_revoked = TRUE \
                     WHERE principal_id = $1 AND principal_type = $2 AND is_revoked = FALSE";
        let result = sqlx::query(query)
            .bind(principal_id.get())
            .bind(kind.as_str())
            .execute(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            ))
            .await
            .context("failed to revoke refresh tokens")?;
        Ok(result.rows_affected())
    }

    async fn delete_stale_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_tokens WHERE expires_at < $1 OR is_revoked = TRUE";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "DELETE",
                db.statement = query
            ))
            .await
            .context("failed to sweep refresh tokens")?;
        Ok(result.rows_affected())
    }
}

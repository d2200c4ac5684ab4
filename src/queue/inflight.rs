//! Registry of recording tokens currently being worked on.
//!
//! Several events can resolve to the same minute token. The first job to
//! acquire the token owns the transcript fetch until it releases it or the
//! entry expires.

use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::debug;

use super::store::now_millis;
use super::QueueError;
use crate::db::{self, SharedConnection};

pub struct InflightRepository;

impl InflightRepository {
    /// Returns `true` when `owner` now holds `token`. Re-acquiring a token
    /// already held by the same owner refreshes its expiry.
    pub fn try_acquire(
        conn: &Connection,
        token: &str,
        owner: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<bool, QueueError> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        tx.execute(
            "DELETE FROM inflight_tokens WHERE token = ?1 AND expires_at <= ?2",
            params![token, now],
        )?;
        let changed = tx.execute(
            "INSERT INTO inflight_tokens (token, owner, acquired_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(token) DO UPDATE SET expires_at = excluded.expires_at \
             WHERE inflight_tokens.owner = excluded.owner",
            params![token, owner, now, expires_at],
        )?;

        tx.commit()?;
        Ok(changed == 1)
    }

    pub fn release(conn: &Connection, token: &str) -> Result<bool, QueueError> {
        let deleted = conn.execute(
            "DELETE FROM inflight_tokens WHERE token = ?1",
            params![token],
        )?;
        Ok(deleted == 1)
    }

    pub fn owner(conn: &Connection, token: &str, now: i64) -> Result<Option<String>, QueueError> {
        let owner = conn
            .query_row(
                "SELECT owner FROM inflight_tokens WHERE token = ?1 AND expires_at > ?2",
                params![token, now],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }
}

#[derive(Clone)]
pub struct InflightRegistry {
    conn: SharedConnection,
    ttl: Duration,
}

impl InflightRegistry {
    pub fn new(conn: SharedConnection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    pub async fn try_acquire(&self, token: &str, owner: &str) -> Result<bool, QueueError> {
        let token = token.to_string();
        let owner = owner.to_string();
        let ttl = self.ttl;
        db::with_connection(&self.conn, move |conn| {
            let now = now_millis();
            let acquired = InflightRepository::try_acquire(
                conn,
                &token,
                &owner,
                now,
                now + ttl.as_millis() as i64,
            )?;
            debug!(token = %token, owner = %owner, acquired, "In-flight acquire");
            Ok(acquired)
        })
        .await
    }

    pub async fn release(&self, token: &str) -> Result<bool, QueueError> {
        let token = token.to_string();
        db::with_connection(&self.conn, move |conn| InflightRepository::release(conn, &token)).await
    }

    pub async fn owner(&self, token: &str) -> Result<Option<String>, QueueError> {
        let token = token.to_string();
        db::with_connection(&self.conn, move |conn| {
            InflightRepository::owner(conn, &token, now_millis())
        })
        .await
    }
}

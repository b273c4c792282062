//! Typed key/value sidecar: four singleton stores keyed by signed 64-bit
//! integer, one per scalar kind (`_KVINT`, `_KVSTR`, `_KVBLOB`, `_KVDATE`).
//!
//! Writes use delete-then-insert semantics — the last write wins. Reads
//! return `None` for absent keys. Dates are stored as canonical UTC
//! RFC 3339 text.

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::CoreError;
use crate::store::Database;
use crate::transaction::Transaction;
use crate::value::canonical_date;

const KV_INT: &str = "_KVINT";
const KV_STR: &str = "_KVSTR";
const KV_BLOB: &str = "_KVBLOB";
const KV_DATE: &str = "_KVDATE";

impl Database {
    fn kv_fetch<T: rusqlite::types::FromSql>(
        &self,
        store: &str,
        key: i64,
    ) -> Result<Option<T>, CoreError> {
        let value = self
            .conn
            .query_row(
                &format!("SELECT value FROM {store} WHERE id = ?1"),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn kv_has(&self, store: &str, key: i64) -> Result<bool, CoreError> {
        let found: i64 = self.conn.query_row(
            &format!("SELECT EXISTS (SELECT 1 FROM {store} WHERE id = ?1)"),
            params![key],
            |row| row.get(0),
        )?;
        Ok(found > 0)
    }

    fn kv_keys(&self, store: &str) -> Result<Vec<i64>, CoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id FROM {store} ORDER BY id"))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// The integer value stored for the key, if any.
    pub fn kv_int(&self, key: i64) -> Result<Option<i64>, CoreError> {
        self.kv_fetch(KV_INT, key)
    }

    /// The string value stored for the key, if any.
    pub fn kv_str(&self, key: i64) -> Result<Option<String>, CoreError> {
        self.kv_fetch(KV_STR, key)
    }

    /// The blob value stored for the key, if any.
    pub fn kv_blob(&self, key: i64) -> Result<Option<Vec<u8>>, CoreError> {
        self.kv_fetch(KV_BLOB, key)
    }

    /// The datetime value stored for the key, if any.
    pub fn kv_date(&self, key: i64) -> Result<Option<DateTime<Utc>>, CoreError> {
        let text: Option<String> = self.kv_fetch(KV_DATE, key)?;
        match text {
            Some(text) => {
                let t = DateTime::parse_from_rfc3339(&text)
                    .map_err(|e| CoreError::Conversion(format!("invalid datetime '{text}': {e}")))?;
                Ok(Some(t.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    pub fn kv_has_int(&self, key: i64) -> Result<bool, CoreError> {
        self.kv_has(KV_INT, key)
    }

    pub fn kv_has_str(&self, key: i64) -> Result<bool, CoreError> {
        self.kv_has(KV_STR, key)
    }

    pub fn kv_has_blob(&self, key: i64) -> Result<bool, CoreError> {
        self.kv_has(KV_BLOB, key)
    }

    pub fn kv_has_date(&self, key: i64) -> Result<bool, CoreError> {
        self.kv_has(KV_DATE, key)
    }

    /// All keys with an integer value.
    pub fn kv_int_keys(&self) -> Result<Vec<i64>, CoreError> {
        self.kv_keys(KV_INT)
    }

    /// All keys with a string value.
    pub fn kv_str_keys(&self) -> Result<Vec<i64>, CoreError> {
        self.kv_keys(KV_STR)
    }

    /// All keys with a blob value.
    pub fn kv_blob_keys(&self) -> Result<Vec<i64>, CoreError> {
        self.kv_keys(KV_BLOB)
    }

    /// All keys with a datetime value.
    pub fn kv_date_keys(&self) -> Result<Vec<i64>, CoreError> {
        self.kv_keys(KV_DATE)
    }

    fn kv_put(
        &self,
        store: &str,
        key: i64,
        value: rusqlite::types::Value,
    ) -> Result<(), CoreError> {
        self.conn.execute(
            &format!("DELETE FROM {store} WHERE id = ?1"),
            params![key],
        )?;
        self.conn.execute(
            &format!("INSERT INTO {store} (id, value) VALUES (?1, ?2)"),
            params![key, value],
        )?;
        Ok(())
    }

    fn kv_remove(&self, store: &str, key: i64) -> Result<(), CoreError> {
        self.conn
            .execute(&format!("DELETE FROM {store} WHERE id = ?1"), params![key])?;
        Ok(())
    }
}

impl Transaction<'_> {
    /// Stores an integer value by key, replacing any previous value.
    pub fn kv_set_int(&self, key: i64, value: i64) -> Result<(), CoreError> {
        self.db().kv_put(KV_INT, key, value.into())
    }

    /// Stores a string value by key, replacing any previous value.
    pub fn kv_set_str(&self, key: i64, value: &str) -> Result<(), CoreError> {
        self.db().kv_put(KV_STR, key, value.to_string().into())
    }

    /// Stores a blob value by key, replacing any previous value.
    pub fn kv_set_blob(&self, key: i64, value: &[u8]) -> Result<(), CoreError> {
        self.db().kv_put(KV_BLOB, key, value.to_vec().into())
    }

    /// Stores a datetime by key in canonical UTC text, replacing any
    /// previous value.
    pub fn kv_set_date(&self, key: i64, value: DateTime<FixedOffset>) -> Result<(), CoreError> {
        self.db().kv_put(KV_DATE, key, canonical_date(&value).into())
    }

    /// Deletes the integer value for the key; no effect if absent.
    pub fn kv_delete_int(&self, key: i64) -> Result<(), CoreError> {
        self.db().kv_remove(KV_INT, key)
    }

    /// Deletes the string value for the key; no effect if absent.
    pub fn kv_delete_str(&self, key: i64) -> Result<(), CoreError> {
        self.db().kv_remove(KV_STR, key)
    }

    /// Deletes the blob value for the key; no effect if absent.
    pub fn kv_delete_blob(&self, key: i64) -> Result<(), CoreError> {
        self.db().kv_remove(KV_BLOB, key)
    }

    /// Deletes the datetime value for the key; no effect if absent.
    pub fn kv_delete_date(&self, key: i64) -> Result<(), CoreError> {
        self.db().kv_remove(KV_DATE, key)
    }
}

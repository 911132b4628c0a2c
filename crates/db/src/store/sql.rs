use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::debug;

use super::{
    paginate, Collection, Item, Page, QueryRequest, RecordKey, RecordStore, ScanRequest,
    StoreError, UpdateRequest,
};
use crate::DbPool;

/// Compare-and-swap rounds per update before reporting contention.
const MAX_CAS_ATTEMPTS: u32 = 5;

pub struct SqlRecordStore {
    pool: DbPool,
}

impl SqlRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_versioned(
        &self,
        collection: &Collection,
        key: &RecordKey,
    ) -> Result<Option<(Item, i64)>, StoreError> {
        let row = sqlx::query(
            "SELECT body, version
             FROM record
             WHERE collection = ? AND partition_key = ? AND sort_key = ?",
        )
        .bind(collection.name)
        .bind(&key.partition)
        .bind(sort_column(key))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<(Item, i64), StoreError> {
            let body: String = row.try_get("body")?;
            let version: i64 = row.try_get("version")?;
            Ok((decode_body(&body)?, version))
        })
        .transpose()
    }

    async fn insert_new(
        &self,
        collection: &Collection,
        key: &RecordKey,
        item: &Item,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO record (collection, partition_key, sort_key, body, version, updated_at)
             VALUES (?, ?, ?, ?, 1, ?)
             ON CONFLICT(collection, partition_key, sort_key) DO NOTHING",
        )
        .bind(collection.name)
        .bind(&key.partition)
        .bind(sort_column(key))
        .bind(encode_body(item)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn swap(
        &self,
        collection: &Collection,
        key: &RecordKey,
        item: &Item,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE record
             SET body = ?, version = version + 1, updated_at = ?
             WHERE collection = ? AND partition_key = ? AND sort_key = ? AND version = ?",
        )
        .bind(encode_body(item)?)
        .bind(Utc::now().to_rfc3339())
        .bind(collection.name)
        .bind(&key.partition)
        .bind(sort_column(key))
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl RecordStore for SqlRecordStore {
    async fn put(&self, collection: &Collection, item: Item) -> Result<(), StoreError> {
        let key = collection.key_of(&item)?;
        sqlx::query(
            "INSERT INTO record (collection, partition_key, sort_key, body, version, updated_at)
             VALUES (?, ?, ?, ?, 1, ?)
             ON CONFLICT(collection, partition_key, sort_key) DO UPDATE SET
                body = excluded.body,
                version = record.version + 1,
                updated_at = excluded.updated_at",
        )
        .bind(collection.name)
        .bind(&key.partition)
        .bind(sort_column(&key))
        .bind(encode_body(&item)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, collection: &Collection, key: &RecordKey) -> Result<Option<Item>, StoreError> {
        collection.check_key(key)?;
        Ok(self.fetch_versioned(collection, key).await?.map(|(item, _)| item))
    }

    async fn query(&self, request: &QueryRequest) -> Result<Page, StoreError> {
        let collection = &request.collection;
        let order = if request.descending { "DESC" } else { "ASC" };
        let partition_clause = match &request.index_hint {
            Some(_) => "json_extract(body, ?) = ?",
            None => "partition_key = ?",
        };
        let prefix_clause = match &request.key_condition.sort_begins_with {
            Some(_) => " AND substr(sort_key, 1, ?) = ?",
            None => "",
        };
        let sql = format!(
            "SELECT partition_key, sort_key, body
             FROM record
             WHERE collection = ? AND {partition_clause}{prefix_clause}
             ORDER BY partition_key {order}, sort_key {order}"
        );

        let mut query = sqlx::query(&sql).bind(collection.name);
        if let Some(attribute) = &request.index_hint {
            query = query.bind(format!("$.{attribute}"));
        }
        query = query.bind(&request.key_condition.partition);
        if let Some(prefix) = &request.key_condition.sort_begins_with {
            query = query.bind(prefix.chars().count() as i64).bind(prefix);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let candidates =
            rows.iter().map(|row| keyed_item(collection, row)).collect::<Result<Vec<_>, _>>()?;

        paginate(
            candidates,
            request.filter.as_ref(),
            request.limit,
            request.cursor.as_deref(),
            request.descending,
        )
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError> {
        let collection = &request.collection;
        let rows = sqlx::query(
            "SELECT partition_key, sort_key, body
             FROM record
             WHERE collection = ?
             ORDER BY partition_key ASC, sort_key ASC",
        )
        .bind(collection.name)
        .fetch_all(&self.pool)
        .await?;

        let candidates =
            rows.iter().map(|row| keyed_item(collection, row)).collect::<Result<Vec<_>, _>>()?;

        paginate(candidates, request.filter.as_ref(), request.limit, request.cursor.as_deref(), false)
    }

    async fn update(
        &self,
        collection: &Collection,
        key: &RecordKey,
        request: &UpdateRequest,
    ) -> Result<Item, StoreError> {
        collection.check_key(key)?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self.fetch_versioned(collection, key).await?;
            let next = request.apply(collection, key, current.as_ref().map(|(item, _)| item))?;

            let written = match current {
                Some((_, version)) => self.swap(collection, key, &next, version).await?,
                None => self.insert_new(collection, key, &next).await?,
            };
            if written {
                return Ok(next);
            }

            debug!(
                event_name = "store.update.cas_conflict",
                collection = collection.name,
                attempt,
                "record changed concurrently, re-evaluating"
            );
        }

        Err(StoreError::Contention { collection: collection.name.to_string(), attempts: MAX_CAS_ATTEMPTS })
    }

    async fn delete(&self, collection: &Collection, key: &RecordKey) -> Result<(), StoreError> {
        collection.check_key(key)?;
        sqlx::query("DELETE FROM record WHERE collection = ? AND partition_key = ? AND sort_key = ?")
            .bind(collection.name)
            .bind(&key.partition)
            .bind(sort_column(key))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn sort_column(key: &RecordKey) -> &str {
    key.sort.as_deref().unwrap_or_default()
}

fn keyed_item(collection: &Collection, row: &SqliteRow) -> Result<(RecordKey, Item), StoreError> {
    let partition: String = row.try_get("partition_key")?;
    let sort: String = row.try_get("sort_key")?;
    let body: String = row.try_get("body")?;

    let sort = collection.sort_key.map(|_| sort);
    Ok((RecordKey { partition, sort }, decode_body(&body)?))
}

fn encode_body(item: &Item) -> Result<String, StoreError> {
    serde_json::to_string(item).map_err(|error| StoreError::Decode(error.to_string()))
}

fn decode_body(body: &str) -> Result<Item, StoreError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(item)) => Ok(item),
        Ok(_) => Err(StoreError::Decode("record body is not a JSON object".to_string())),
        Err(error) => Err(StoreError::Decode(error.to_string())),
    }
}

use std::sync::Arc;

use launchpad_db::{
    connect_with_settings, migrations, Collection, Condition, Filter, InMemoryRecordStore, Item,
    KeyCondition, Mutation, QueryRequest, RecordKey, RecordStore, ScanRequest, SqlRecordStore,
    StoreError, UpdateRequest,
};
use serde_json::{json, Value};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

const COUNTERS: Collection = Collection::new("usage_counters", "counterId", Some("windowKey"));
const PROFILES: Collection = Collection::new("profiles", "subjectId", None);

fn item(value: Value) -> ContractResult<Item> {
    value.as_object().cloned().ok_or_else(|| "fixture should be an object".to_string())
}

async fn sql_store() -> ContractResult<SqlRecordStore> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect failed: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrations failed: {error}"))?;
    Ok(SqlRecordStore::new(pool))
}

async fn crud_round_trip(store: &dyn RecordStore) -> ContractResult {
    store
        .put(&PROFILES, item(json!({"subjectId": "u1", "plan": "free"}))?)
        .await
        .map_err(|error| error.to_string())?;

    let key = RecordKey::new("u1", None);
    let fetched = store.get(&PROFILES, &key).await.map_err(|error| error.to_string())?;
    require_eq!(fetched.as_ref().and_then(|item| item.get("plan")), Some(&json!("free")));

    store
        .put(&PROFILES, item(json!({"subjectId": "u1", "plan": "pro"}))?)
        .await
        .map_err(|error| error.to_string())?;
    let replaced = store.get(&PROFILES, &key).await.map_err(|error| error.to_string())?;
    require_eq!(replaced.as_ref().and_then(|item| item.get("plan")), Some(&json!("pro")));

    store.delete(&PROFILES, &key).await.map_err(|error| error.to_string())?;
    store.delete(&PROFILES, &key).await.map_err(|error| error.to_string())?;
    let gone = store.get(&PROFILES, &key).await.map_err(|error| error.to_string())?;
    require!(gone.is_none(), "record should be deleted");

    let missing_key = store.put(&PROFILES, item(json!({"plan": "free"}))?).await;
    require!(matches!(missing_key, Err(StoreError::Validation(_))), "missing key must be rejected");
    Ok(())
}

async fn conditional_update(store: &dyn RecordStore) -> ContractResult {
    let key = RecordKey::with_sort("daily_requests#u1", "2026-03-10");
    let consume = UpdateRequest::upsert(vec![
        Mutation::add("count", 1),
        Mutation::set("limit", 2),
        Mutation::set("subjectId", "u1"),
    ])
    .when(Condition::AtMost { field: "count".to_string(), value: 1 });

    for expected in [1, 2] {
        let updated =
            store.update(&COUNTERS, &key, &consume).await.map_err(|error| error.to_string())?;
        require_eq!(updated.get("count"), Some(&json!(expected)));
    }

    let third = store.update(&COUNTERS, &key, &consume).await;
    require!(
        matches!(third, Err(StoreError::ConditionFailed { .. })),
        "third consume should fail its condition, got {third:?}"
    );

    let stored = store.get(&COUNTERS, &key).await.map_err(|error| error.to_string())?;
    require_eq!(stored.as_ref().and_then(|item| item.get("count")), Some(&json!(2)));

    let release = UpdateRequest::existing(vec![Mutation::set("count", 0), Mutation::Remove("limit".to_string())])
        .when(Condition::Equals { field: "count".to_string(), value: json!(2) });
    let released = store.update(&COUNTERS, &key, &release).await.map_err(|error| error.to_string())?;
    require_eq!(released.get("count"), Some(&json!(0)));
    require!(!released.contains_key("limit"), "removed attribute should be gone");

    let absent = store
        .update(&COUNTERS, &RecordKey::with_sort("nobody", "w"), &UpdateRequest::existing(vec![]))
        .await;
    require!(matches!(absent, Err(StoreError::NotFound { .. })), "update of absent record without upsert");
    Ok(())
}

async fn query_and_scan(store: &dyn RecordStore) -> ContractResult {
    for (counter, window, subject, count) in [
        ("rate_limit#u1", "2026-03-10T09:00:00+00:00", "u1", 3),
        ("rate_limit#u1", "2026-03-10T09:01:00+00:00", "u1", 1),
        ("rate_limit#u1", "2026-03-10T09:02:00+00:00", "u1", 5),
        ("rate_limit#u2", "2026-03-10T09:00:00+00:00", "u2", 9),
        ("storage#u1", "cumulative", "u1", 42),
    ] {
        store
            .put(
                &COUNTERS,
                item(json!({"counterId": counter, "windowKey": window, "subjectId": subject, "count": count}))?,
            )
            .await
            .map_err(|error| error.to_string())?;
    }

    let latest = store
        .query(&QueryRequest::new(COUNTERS, KeyCondition::partition("rate_limit#u1")).descending().limit(1))
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(latest.items.len(), 1);
    require_eq!(latest.items[0].get("windowKey"), Some(&json!("2026-03-10T09:02:00+00:00")));

    let prefixed = store
        .query(&QueryRequest::new(COUNTERS, KeyCondition::partition("rate_limit#u1").begins_with("2026-03-10T09:0")))
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(prefixed.items.len(), 3);

    let busy = store
        .query(
            &QueryRequest::new(COUNTERS, KeyCondition::partition("rate_limit#u1"))
                .filter(Filter::Gte("count".to_string(), json!(3))),
        )
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(busy.items.len(), 2);

    let by_subject = store
        .query(&QueryRequest::new(COUNTERS, KeyCondition::partition("u1")).index("subjectId"))
        .await
        .map_err(|error| error.to_string())?;
    require_eq!(by_subject.items.len(), 5);

    let mut cursor = None;
    let mut scanned = 0;
    loop {
        let page = store
            .scan(&ScanRequest::new(COUNTERS).limit(2).after(cursor))
            .await
            .map_err(|error| error.to_string())?;
        require!(page.items.len() <= 2, "page exceeds limit");
        scanned += page.items.len();
        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    require_eq!(scanned, 6);
    Ok(())
}

async fn run_contract(store: &dyn RecordStore) -> ContractResult {
    crud_round_trip(store).await?;
    conditional_update(store).await?;
    query_and_scan(store).await
}

#[tokio::test]
async fn in_memory_store_satisfies_contract() -> ContractResult {
    run_contract(&InMemoryRecordStore::new()).await
}

#[tokio::test]
async fn sqlite_store_satisfies_contract() -> ContractResult {
    let store = sql_store().await?;
    run_contract(&store).await
}

#[tokio::test]
async fn sqlite_conditional_increments_hold_under_concurrency() -> ContractResult {
    let store = Arc::new(sql_store().await?);
    let key = RecordKey::with_sort("rate_limit#burst", "w1");

    let mut handles = Vec::new();
    for _ in 0..12 {
        let store = Arc::clone(&store);
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            let request = UpdateRequest::upsert(vec![Mutation::add("count", 1)])
                .when(Condition::AtMost { field: "count".to_string(), value: 4 });
            store.update(&COUNTERS, &key, &request).await
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        match handle.await.map_err(|error| error.to_string())? {
            Ok(_) => allowed += 1,
            Err(StoreError::ConditionFailed { .. }) | Err(StoreError::Contention { .. }) => {}
            Err(other) => return Err(format!("unexpected store error: {other}")),
        }
    }

    let stored = store.get(&COUNTERS, &key).await.map_err(|error| error.to_string())?;
    let count = stored.as_ref().and_then(|item| item.get("count")).and_then(Value::as_i64).unwrap_or(0);
    require!(count <= 5, "counter exceeded its limit: {count}");
    require_eq!(count, allowed as i64);
    Ok(())
}

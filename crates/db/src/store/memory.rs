use std::collections::BTreeMap;

use tokio::sync::RwLock;

use super::{
    paginate, Collection, Item, Page, QueryRequest, RecordKey, RecordStore, ScanRequest,
    StoreError, UpdateRequest,
};

type Records = BTreeMap<&'static str, BTreeMap<RecordKey, Item>>;

/// Process-local store. Updates hold the write lock for their whole evaluation, which
/// makes every conditional update atomic.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Records>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &Collection) -> usize {
        let records = self.records.read().await;
        records.get(collection.name).map_or(0, BTreeMap::len)
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(&self, collection: &Collection, item: Item) -> Result<(), StoreError> {
        let key = collection.key_of(&item)?;
        let mut records = self.records.write().await;
        records.entry(collection.name).or_default().insert(key, item);
        Ok(())
    }

    async fn get(&self, collection: &Collection, key: &RecordKey) -> Result<Option<Item>, StoreError> {
        collection.check_key(key)?;
        let records = self.records.read().await;
        Ok(records.get(collection.name).and_then(|items| items.get(key)).cloned())
    }

    async fn query(&self, request: &QueryRequest) -> Result<Page, StoreError> {
        let records = self.records.read().await;
        let Some(items) = records.get(request.collection.name) else {
            return Ok(Page::default());
        };

        let selected = items
            .iter()
            .filter(|(key, item)| request.selects(key, item))
            .map(|(key, item)| (key.clone(), item.clone()));

        if request.descending {
            let reversed: Vec<_> = selected.rev().collect();
            paginate(reversed, request.filter.as_ref(), request.limit, request.cursor.as_deref(), true)
        } else {
            paginate(selected, request.filter.as_ref(), request.limit, request.cursor.as_deref(), false)
        }
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError> {
        let records = self.records.read().await;
        let Some(items) = records.get(request.collection.name) else {
            return Ok(Page::default());
        };

        paginate(
            items.iter().map(|(key, item)| (key.clone(), item.clone())),
            request.filter.as_ref(),
            request.limit,
            request.cursor.as_deref(),
            false,
        )
    }

    async fn update(
        &self,
        collection: &Collection,
        key: &RecordKey,
        request: &UpdateRequest,
    ) -> Result<Item, StoreError> {
        collection.check_key(key)?;
        let mut records = self.records.write().await;
        let items = records.entry(collection.name).or_default();

        let next = request.apply(collection, key, items.get(key))?;
        items.insert(key.clone(), next.clone());
        Ok(next)
    }

    async fn delete(&self, collection: &Collection, key: &RecordKey) -> Result<(), StoreError> {
        collection.check_key(key)?;
        let mut records = self.records.write().await;
        if let Some(items) = records.get_mut(collection.name) {
            items.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::InMemoryRecordStore;
    use crate::store::{
        Collection, Condition, Filter, KeyCondition, Mutation, QueryRequest, RecordKey,
        RecordStore, StoreError, UpdateRequest,
    };

    const WINDOWS: Collection = Collection::new("windows", "counterId", Some("windowKey"));

    #[tokio::test]
    async fn concurrent_conditional_increments_never_exceed_limit() {
        let store = Arc::new(InMemoryRecordStore::new());
        let key = RecordKey::with_sort("rate_limit#u1", "w1");

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let request = UpdateRequest::upsert(vec![Mutation::add("count", 1)])
                    .when(Condition::AtMost { field: "count".to_string(), value: 9 });
                store.update(&WINDOWS, &key, &request).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            match handle.await.expect("task") {
                Ok(_) => allowed += 1,
                Err(StoreError::ConditionFailed { .. }) => {}
                Err(other) => panic!("unexpected error {other}"),
            }
        }

        assert_eq!(allowed, 10);
        let stored = store.get(&WINDOWS, &key).await.expect("get").expect("record");
        assert_eq!(stored.get("count"), Some(&json!(10)));
    }

    #[tokio::test]
    async fn descending_query_with_limit_returns_latest_window() {
        let store = InMemoryRecordStore::new();
        for window in ["2026-03-10T09:00:00Z", "2026-03-10T09:01:00Z", "2026-03-10T09:02:00Z"] {
            let item = json!({"counterId": "rate_limit#u1", "windowKey": window, "count": 1});
            store.put(&WINDOWS, item.as_object().cloned().expect("object")).await.expect("put");
        }
        let other = json!({"counterId": "rate_limit#u2", "windowKey": "2026-03-10T09:05:00Z"});
        store.put(&WINDOWS, other.as_object().cloned().expect("object")).await.expect("put");

        let page = store
            .query(&QueryRequest::new(WINDOWS, KeyCondition::partition("rate_limit#u1")).descending().limit(1))
            .await
            .expect("query");

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["windowKey"], json!("2026-03-10T09:02:00Z"));
        assert!(page.cursor.is_some());
    }

    #[tokio::test]
    async fn index_hint_queries_by_alternate_attribute() {
        let store = InMemoryRecordStore::new();
        for (counter, subject) in [("rate_limit#u1", "u1"), ("storage#u1", "u1"), ("storage#u2", "u2")] {
            let item = json!({"counterId": counter, "windowKey": "cumulative", "subjectId": subject});
            store.put(&WINDOWS, item.as_object().cloned().expect("object")).await.expect("put");
        }

        let page = store
            .query(&QueryRequest::new(WINDOWS, KeyCondition::partition("u1")).index("subjectId"))
            .await
            .expect("query");
        assert_eq!(page.items.len(), 2);

        let filtered = store
            .query(
                &QueryRequest::new(WINDOWS, KeyCondition::partition("u1"))
                    .index("subjectId")
                    .filter(Filter::Eq("counterId".to_string(), json!("storage#u1"))),
            )
            .await
            .expect("query");
        assert_eq!(filtered.items.len(), 1);
    }

    #[tokio::test]
    async fn delete_of_absent_record_is_not_an_error() {
        let store = InMemoryRecordStore::new();
        store.delete(&WINDOWS, &RecordKey::with_sort("nobody", "w")).await.expect("delete");
        assert_eq!(store.len(&WINDOWS).await, 0);
    }
}

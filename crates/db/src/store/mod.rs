//! Key-value record store used by the usage counters.
//!
//! Records are JSON objects addressed by a partition key and an optional sort key,
//! both taken from attributes of the item itself. Backends share the evaluation code
//! in this module so conditional updates, filters and pagination behave identically
//! whether records live in SQLite or in memory.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

pub mod memory;
pub mod sql;

pub use memory::InMemoryRecordStore;
pub use sql::SqlRecordStore;

pub type Item = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store request: {0}")]
    Validation(String),
    #[error("record not found in `{collection}`")]
    NotFound { collection: String },
    #[error("condition check failed for record in `{collection}`")]
    ConditionFailed { collection: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write contention on `{collection}` after {attempts} attempts")]
    Contention { collection: String, attempts: u32 },
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::ConditionFailed { .. } | Self::Decode(_)
        )
    }
}

/// Key schema of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Collection {
    pub name: &'static str,
    pub partition_key: &'static str,
    pub sort_key: Option<&'static str>,
}

impl Collection {
    pub const fn new(
        name: &'static str,
        partition_key: &'static str,
        sort_key: Option<&'static str>,
    ) -> Self {
        Self { name, partition_key, sort_key }
    }

    pub fn key_of(&self, item: &Item) -> Result<RecordKey, StoreError> {
        let partition = key_attribute(item, self.partition_key).ok_or_else(|| {
            StoreError::Validation(format!(
                "item for `{}` is missing partition key `{}`",
                self.name, self.partition_key
            ))
        })?;

        let sort = match self.sort_key {
            Some(field) => Some(key_attribute(item, field).ok_or_else(|| {
                StoreError::Validation(format!(
                    "item for `{}` is missing sort key `{field}`",
                    self.name
                ))
            })?),
            None => None,
        };

        Ok(RecordKey { partition, sort })
    }

    pub fn check_key(&self, key: &RecordKey) -> Result<(), StoreError> {
        match (self.sort_key, &key.sort) {
            (Some(field), None) => Err(StoreError::Validation(format!(
                "key for `{}` requires sort key `{field}`",
                self.name
            ))),
            (None, Some(_)) => Err(StoreError::Validation(format!(
                "collection `{}` has no sort key",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    fn is_key_field(&self, field: &str) -> bool {
        field == self.partition_key || self.sort_key == Some(field)
    }

    /// Empty item carrying only the key attributes.
    fn seed(&self, key: &RecordKey) -> Item {
        let mut item = Item::new();
        item.insert(self.partition_key.to_string(), Value::String(key.partition.clone()));
        if let (Some(field), Some(sort)) = (self.sort_key, &key.sort) {
            item.insert(field.to_string(), Value::String(sort.clone()));
        }
        item
    }
}

fn key_attribute(item: &Item, field: &str) -> Option<String> {
    match item.get(field) {
        Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
        Some(Value::Number(value)) => Some(value.to_string()),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub partition: String,
    pub sort: Option<String>,
}

impl RecordKey {
    pub fn new(partition: impl Into<String>, sort: Option<String>) -> Self {
        Self { partition: partition.into(), sort }
    }

    pub fn with_sort(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort: Some(sort.into()) }
    }

    fn encode_cursor(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|error| StoreError::Decode(error.to_string()))
    }

    fn decode_cursor(cursor: &str) -> Result<Self, StoreError> {
        serde_json::from_str(cursor)
            .map_err(|_| StoreError::Validation(format!("invalid pagination cursor `{cursor}`")))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Exists(String),
    And(Vec<Filter>),
}

impl Filter {
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::Eq(field, value) => compare(item.get(field), value) == Some(Ordering::Equal),
            Self::Ne(field, value) => compare(item.get(field), value) != Some(Ordering::Equal),
            Self::Lt(field, value) => compare(item.get(field), value) == Some(Ordering::Less),
            Self::Lte(field, value) => {
                matches!(compare(item.get(field), value), Some(Ordering::Less | Ordering::Equal))
            }
            Self::Gt(field, value) => compare(item.get(field), value) == Some(Ordering::Greater),
            Self::Gte(field, value) => {
                matches!(compare(item.get(field), value), Some(Ordering::Greater | Ordering::Equal))
            }
            Self::Exists(field) => item.get(field).is_some_and(|value| !value.is_null()),
            Self::And(filters) => filters.iter().all(|filter| filter.matches(item)),
        }
    }
}

/// Numbers compare numerically and strings lexicographically; other pairings are
/// incomparable.
fn compare(left: Option<&Value>, right: &Value) -> Option<Ordering> {
    match (left?, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    pub partition: String,
    pub sort_begins_with: Option<String>,
}

impl KeyCondition {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort_begins_with: None }
    }

    pub fn begins_with(mut self, prefix: impl Into<String>) -> Self {
        self.sort_begins_with = Some(prefix.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub collection: Collection,
    pub key_condition: KeyCondition,
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    /// Alternate attribute matched against `key_condition.partition`.
    pub index_hint: Option<String>,
    pub descending: bool,
    pub cursor: Option<String>,
}

impl QueryRequest {
    pub fn new(collection: Collection, key_condition: KeyCondition) -> Self {
        Self {
            collection,
            key_condition,
            filter: None,
            limit: None,
            index_hint: None,
            descending: false,
            cursor: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn index(mut self, attribute: impl Into<String>) -> Self {
        self.index_hint = Some(attribute.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Whether a stored record falls under the key condition, ignoring filters.
    fn selects(&self, key: &RecordKey, item: &Item) -> bool {
        let partition_matches = match &self.index_hint {
            Some(attribute) => {
                key_attribute(item, attribute).as_deref() == Some(self.key_condition.partition.as_str())
            }
            None => key.partition == self.key_condition.partition,
        };

        partition_matches
            && match &self.key_condition.sort_begins_with {
                Some(prefix) => key.sort.as_deref().is_some_and(|sort| sort.starts_with(prefix.as_str())),
                None => true,
            }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanRequest {
    pub collection: Collection,
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

impl ScanRequest {
    pub fn new(collection: Collection) -> Self {
        Self { collection, filter: None, limit: None, cursor: None }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    /// Present when more matching records may follow.
    pub cursor: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Mutation {
    Set(String, Value),
    /// Numeric increment; a missing attribute counts as zero.
    Add(String, i64),
    Remove(String),
}

impl Mutation {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Set(field.into(), value.into())
    }

    pub fn add(field: impl Into<String>, delta: i64) -> Self {
        Self::Add(field.into(), delta)
    }

    fn field(&self) -> &str {
        match self {
            Self::Set(field, _) | Self::Add(field, _) | Self::Remove(field) => field,
        }
    }
}

/// Evaluated against the record as it was before the update.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Exists,
    NotExists,
    /// Numeric attribute (missing counts as zero) is at most `value`.
    AtMost { field: String, value: i64 },
    Equals { field: String, value: Value },
}

impl Condition {
    pub fn holds(&self, current: Option<&Item>) -> bool {
        match self {
            Self::Exists => current.is_some(),
            Self::NotExists => current.is_none(),
            Self::AtMost { field, value } => {
                let present = current.and_then(|item| item.get(field)).and_then(Value::as_f64).unwrap_or(0.0);
                present <= *value as f64
            }
            Self::Equals { field, value } => {
                current.and_then(|item| item.get(field)).is_some_and(|present| present == value)
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateRequest {
    pub mutations: Vec<Mutation>,
    pub condition: Option<Condition>,
    /// Create the record when absent instead of failing with `NotFound`.
    pub upsert: bool,
}

impl UpdateRequest {
    pub fn upsert(mutations: Vec<Mutation>) -> Self {
        Self { mutations, condition: None, upsert: true }
    }

    pub fn existing(mutations: Vec<Mutation>) -> Self {
        Self { mutations, condition: None, upsert: false }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Post-image of the record, or the reason the update must not be applied.
    pub fn apply(
        &self,
        collection: &Collection,
        key: &RecordKey,
        current: Option<&Item>,
    ) -> Result<Item, StoreError> {
        if let Some(condition) = &self.condition {
            if !condition.holds(current) {
                return Err(StoreError::ConditionFailed { collection: collection.name.to_string() });
            }
        }

        let mut item = match current {
            Some(item) => item.clone(),
            None if self.upsert => collection.seed(key),
            None => return Err(StoreError::NotFound { collection: collection.name.to_string() }),
        };

        for mutation in &self.mutations {
            if collection.is_key_field(mutation.field()) {
                return Err(StoreError::Validation(format!(
                    "key attribute `{}` of `{}` cannot be mutated",
                    mutation.field(),
                    collection.name
                )));
            }

            match mutation {
                Mutation::Set(field, value) => {
                    item.insert(field.clone(), value.clone());
                }
                Mutation::Add(field, delta) => {
                    let next = add_to(item.get(field), *delta).ok_or_else(|| {
                        StoreError::Validation(format!("attribute `{field}` is not numeric"))
                    })?;
                    item.insert(field.clone(), next);
                }
                Mutation::Remove(field) => {
                    item.remove(field);
                }
            }
        }

        Ok(item)
    }
}

fn add_to(current: Option<&Value>, delta: i64) -> Option<Value> {
    match current {
        None | Some(Value::Null) => Some(Value::from(delta)),
        Some(Value::Number(number)) => match number.as_i64() {
            Some(value) => Some(Value::from(value.saturating_add(delta))),
            None => Number::from_f64(number.as_f64()? + delta as f64).map(Value::Number),
        },
        _ => None,
    }
}

/// Applies cursor, filter and limit to candidates already in key order.
pub(crate) fn paginate(
    candidates: impl IntoIterator<Item = (RecordKey, Item)>,
    filter: Option<&Filter>,
    limit: Option<usize>,
    cursor: Option<&str>,
    descending: bool,
) -> Result<Page, StoreError> {
    if limit == Some(0) {
        return Err(StoreError::Validation("limit must be greater than zero".to_string()));
    }

    let after = cursor.map(RecordKey::decode_cursor).transpose()?;
    let matched = candidates
        .into_iter()
        .filter(|(key, _)| match &after {
            Some(after) if descending => key < after,
            Some(after) => key > after,
            None => true,
        })
        .filter(|(_, item)| filter.map_or(true, |filter| filter.matches(item)));

    let mut page = Page::default();
    let mut last_key = None;
    for (key, item) in matched {
        if limit.is_some_and(|limit| page.items.len() == limit) {
            page.cursor = last_key.as_ref().map(RecordKey::encode_cursor).transpose()?;
            return Ok(page);
        }
        page.items.push(item);
        last_key = Some(key);
    }

    Ok(page)
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, collection: &Collection, item: Item) -> Result<(), StoreError>;

    async fn get(&self, collection: &Collection, key: &RecordKey) -> Result<Option<Item>, StoreError>;

    async fn query(&self, request: &QueryRequest) -> Result<Page, StoreError>;

    async fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError>;

    /// Applies every mutation atomically, failing without side effects when the
    /// condition does not hold.
    async fn update(
        &self,
        collection: &Collection,
        key: &RecordKey,
        request: &UpdateRequest,
    ) -> Result<Item, StoreError>;

    /// Deleting an absent record succeeds.
    async fn delete(&self, collection: &Collection, key: &RecordKey) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{paginate, Collection, Condition, Filter, Item, Mutation, RecordKey, StoreError, UpdateRequest};

    const COUNTERS: Collection = Collection::new("counters", "counterId", Some("windowKey"));

    fn item(value: serde_json::Value) -> Item {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn key_is_taken_from_item_attributes() {
        let key = COUNTERS.key_of(&item(json!({"counterId": "rate_limit#u1", "windowKey": "w1"})));
        assert_eq!(key.ok(), Some(RecordKey::with_sort("rate_limit#u1", "w1")));

        let missing = COUNTERS.key_of(&item(json!({"counterId": "rate_limit#u1"})));
        assert!(matches!(missing, Err(StoreError::Validation(ref message)) if message.contains("windowKey")));
    }

    #[test]
    fn conditional_add_is_rejected_on_the_pre_image() {
        let key = RecordKey::with_sort("c", "w");
        let current = item(json!({"counterId": "c", "windowKey": "w", "count": 5}));
        let request = UpdateRequest::upsert(vec![Mutation::add("count", 1)])
            .when(Condition::AtMost { field: "count".to_string(), value: 4 });

        assert!(matches!(
            request.apply(&COUNTERS, &key, Some(&current)),
            Err(StoreError::ConditionFailed { .. })
        ));

        let fresh = request.apply(&COUNTERS, &key, None).expect("missing count counts as zero");
        assert_eq!(fresh.get("count"), Some(&json!(1)));
        assert_eq!(fresh.get("counterId"), Some(&json!("c")));
    }

    #[test]
    fn key_attributes_cannot_be_mutated() {
        let request = UpdateRequest::upsert(vec![Mutation::set("windowKey", "other")]);
        assert!(matches!(
            request.apply(&COUNTERS, &RecordKey::with_sort("c", "w"), None),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn update_without_upsert_requires_existing_record() {
        let request = UpdateRequest::existing(vec![Mutation::add("count", 1)]);
        assert!(matches!(
            request.apply(&COUNTERS, &RecordKey::with_sort("c", "w"), None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn filters_compare_numbers_and_timestamps() {
        let record = item(json!({"count": 3, "windowEnd": "2026-03-10T10:00:00+00:00"}));

        assert!(Filter::Lt("windowEnd".to_string(), json!("2026-03-10T11:00:00+00:00")).matches(&record));
        assert!(Filter::Gte("count".to_string(), json!(3.0)).matches(&record));
        assert!(!Filter::Eq("count".to_string(), json!("3")).matches(&record));
        assert!(!Filter::Exists("limit".to_string()).matches(&record));
        assert!(Filter::And(vec![
            Filter::Exists("count".to_string()),
            Filter::Ne("count".to_string(), json!(4)),
        ])
        .matches(&record));
    }

    #[test]
    fn pagination_resumes_after_cursor() {
        let candidates = (0..5).map(|index| {
            (RecordKey::with_sort("p", format!("w{index}")), item(json!({"n": index})))
        });

        let first = paginate(candidates.clone(), None, Some(2), None, false).expect("first page");
        assert_eq!(first.items.len(), 2);
        let cursor = first.cursor.expect("more pages");

        let second = paginate(candidates.clone(), None, Some(10), Some(&cursor), false).expect("rest");
        assert_eq!(second.items.iter().map(|item| item["n"].clone()).collect::<Vec<_>>(), vec![json!(2), json!(3), json!(4)]);
        assert!(second.cursor.is_none());

        assert!(matches!(
            paginate(candidates, None, Some(1), Some("garbage"), false),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn retryability_follows_error_class() {
        assert!(!StoreError::ConditionFailed { collection: "c".to_string() }.is_retryable());
        assert!(!StoreError::Decode("bad".to_string()).is_retryable());
        assert!(StoreError::Unavailable("down".to_string()).is_retryable());
        assert!(StoreError::Contention { collection: "c".to_string(), attempts: 3 }.is_retryable());
    }
}

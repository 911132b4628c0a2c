pub mod connection;
pub mod migrations;
pub mod retry;
pub mod store;

pub use connection::{connect, connect_from_config, connect_with_settings, ping, DbPool};
pub use retry::{RetryPolicy, RetryingStore};
pub use store::{
    Collection, Condition, Filter, InMemoryRecordStore, Item, KeyCondition, Mutation, Page,
    QueryRequest, RecordKey, RecordStore, ScanRequest, SqlRecordStore, StoreError, UpdateRequest,
};

//! Document store seam and backends.
pub mod jsonl_store;
pub mod memory_store;
pub mod storage_factory;
pub mod store;

pub use jsonl_store::JsonlStore;
pub use memory_store::MemoryStore;
pub use storage_factory::StoreRegistry;
pub use store::{
    BucketStage, DocumentStore, Filter, FindQuery, GroupKey, GroupResult, Pipeline, Sort,
    SortField, Stage,
};

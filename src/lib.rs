pub mod observability;
pub mod sink;
pub mod target;

pub use sink::{
    BatchController, BatchOutcome, Disposition, InMemoryObjectStore, LocalFsObjectStore,
    ObjectStore, ObjectStoreError, SealedBatch, SinkConfig, SinkError,
};
pub use target::{Message, Target, TargetError, TargetStats};

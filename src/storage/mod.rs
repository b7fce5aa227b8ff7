pub mod base;
pub mod gcs;
pub mod memory;
pub mod opendal_store;
pub mod unified;

pub use base::{connect, HttpConnector, ObjectStore, StoreConnector};
pub use gcs::GcsBucketAdmin;
pub use memory::MemoryConnector;
pub use opendal_store::OpendalStore;
pub use unified::UnifiedStorageClient;

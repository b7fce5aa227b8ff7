pub mod base;
pub mod gcs_provider;
pub mod r2_provider;
pub mod shared_provider;

// Re-export the primary provider items so code outside can do
// "use crate::providers::{StorageProvider, create_providers};"
pub use base::{bucket_name_for, create_provider, create_providers, QualifyCredentials, StorageProvider};
pub use gcs_provider::GcsProvider;
pub use r2_provider::R2Provider;
pub use shared_provider::SharedBucketProvider;

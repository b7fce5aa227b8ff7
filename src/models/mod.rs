pub mod auth_token;
pub mod session;
pub mod status;
pub mod storage_config;

pub use auth_token::{sha256_hex, AuthToken};
pub use session::{profile_id_for, QualificationSession, SessionSummary};
pub use status::EnforcementStatus;
pub use storage_config::{
    ProviderKind, ServiceAccountKey, StorageConfig, StorageCredentials, StorageSummary,
    GOOGLE_TOKEN_URI,
};

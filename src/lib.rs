pub mod cluster;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod models;
pub mod providers;
pub mod secrets;

pub use cluster::{Cluster, LocalCluster};
pub use config::{NotificationBinding, NotifierManifest, ProviderConfig};
pub use dispatch::{select_bindings, should_dispatch, Dispatcher};
pub use errors::{ErrorCode, ProviderError};
pub use models::*;
pub use providers::{resolve, Adapter};
pub use secrets::{SecretBytes, SecretLookup};

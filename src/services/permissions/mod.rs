pub mod ephemeral;
pub mod resolver;
pub mod store;
pub mod valkey;

pub use ephemeral::EphemeralCache;
pub use resolver::{PermissionResolver, ResolveError};
pub use store::{CachedPermission, PermissionStore, StoreError};
pub use valkey::ValkeyPermissionStore;

//! Tenant resolution: the key cache, its refresh loop and the authenticator.

mod auth;
mod cache;
mod directory;
mod entry;
mod refresh;

pub use auth::{extract_credential, AuthError, Authenticator, API_KEY_HEADER};
pub use cache::{CacheLookup, KeyMap, TenantCache};
pub use directory::{
    DirectoryError, DirectorySnapshot, FileDirectory, MemoryDirectory, TenantDirectory,
};
pub use entry::{Fingerprint, RateLimitSpec, TenantKeyEntry, TenantRecord};
pub use refresh::{RefreshError, RefreshHandle, RefreshManager, RefreshState, RefreshStats};

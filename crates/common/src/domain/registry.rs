use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Keyed store holding per-device metadata
///
/// Implementations own their connection handling, retries and timeouts.
/// Any error returned here is treated by callers as a failed lookup, whether
/// the key was missing or the store was unreachable.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    /// Fetch the raw registry value stored under `key`
    ///
    /// # Arguments
    /// * `key` - Registry key, e.g. `device-D42`
    ///
    /// # Returns
    /// The stored bytes on success, DomainError on failure. Content is not
    /// validated here; callers decide whether it is a usable record.
    async fn get(&self, key: &str) -> DomainResult<Vec<u8>>;
}

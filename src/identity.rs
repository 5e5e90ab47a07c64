//! Seam to the session layer that knows who is signed in.

use async_trait::async_trait;

use crate::store::TenantKey;

/// Resolves the tenant that should be active right now.
///
/// Implemented by the embedding app over whatever session storage it uses.
/// Returning `None` (nobody signed in, or the session record is missing an
/// identifier) leaves the store idle; it is never treated as an error.
#[async_trait]
pub trait TenantIdentity: Send + Sync {
  async fn active_tenant(&self) -> Option<TenantKey>;
}

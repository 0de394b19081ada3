use crate::{ResolveError, StartBlockResolver};
use alloy_primitives::B256;
use async_trait::async_trait;

/// A [`StartBlockResolver`] starting exactly at the requested block.
///
/// Used when no block index is available to find an earlier, safer starting point.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityStartBlockResolver;

#[async_trait]
impl StartBlockResolver for IdentityStartBlockResolver {
    async fn resolve(&self, target: u64) -> Result<(u64, Option<B256>), ResolveError> {
        Ok((target, None))
    }
}

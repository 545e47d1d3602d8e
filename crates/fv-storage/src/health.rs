//! Backend reachability probe used by `fv health`

use fv_core::{FvError, FvResult};
use opendal::Operator;

/// List the backend root and return how many entries it holds.
///
/// A listing failure is a blob store error, so it carries the same kind and
/// exit status as a failed fragment read.
pub async fn check_health(op: &Operator) -> FvResult<usize> {
    let entries = op
        .list("/")
        .await
        .map_err(|e| FvError::BlobStore(format!("health check: {e}")))?;
    tracing::debug!(entries = entries.len(), "storage reachable");
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::build_memory_operator;

    #[tokio::test]
    async fn memory_backend_is_reachable() {
        let op = build_memory_operator().unwrap();
        check_health(&op).await.unwrap();
    }

    #[tokio::test]
    async fn stored_objects_show_up_in_the_count() {
        let op = build_memory_operator().unwrap();
        let before = check_health(&op).await.unwrap();
        op.write("a.bin", vec![1u8]).await.unwrap();
        assert!(check_health(&op).await.unwrap() > before);
    }
}

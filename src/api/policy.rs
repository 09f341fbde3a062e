// Scoped cache policy.
// A task-local TTL read by every request enqueued while the scope is active.

use std::future::Future;
use std::time::Duration;

tokio::task_local! {
    static CACHE_TTL: Duration;
}

/// TTL in effect for the current task. Outside any scope the cache is not
/// trusted (zero).
pub fn current_cache_ttl() -> Duration {
    CACHE_TTL.try_with(|ttl| *ttl).unwrap_or(Duration::ZERO)
}

/// Run `future` with `ttl` as the ambient cache TTL.
///
/// The previous value is restored when the future completes, fails or is
/// dropped. The value is confined to this task; requests already captured
/// their TTL at enqueue time, so sibling requests in a drain never see it.
pub async fn with_cache_ttl<F>(ttl: Duration, future: F) -> F::Output
where
    F: Future,
{
    CACHE_TTL.scope(ttl, future).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GlitchError, Result};

    #[tokio::test]
    async fn test_default_is_zero() {
        assert_eq!(current_cache_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_nested_scopes_restore() {
        let outer = Duration::from_secs(1800);
        let inner = Duration::from_secs(60);

        with_cache_ttl(outer, async {
            assert_eq!(current_cache_ttl(), outer);
            with_cache_ttl(inner, async {
                assert_eq!(current_cache_ttl(), inner);
            })
            .await;
            assert_eq!(current_cache_ttl(), outer);
        })
        .await;

        assert_eq!(current_cache_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_restored_after_error() {
        let result: Result<()> = with_cache_ttl(Duration::from_secs(60), async {
            Err(GlitchError::Other("producer failed".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(current_cache_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_not_visible_to_spawned_tasks() {
        let seen = with_cache_ttl(Duration::from_secs(60), async {
            tokio::spawn(async { current_cache_ttl() }).await.unwrap()
        })
        .await;

        assert_eq!(seen, Duration::ZERO);
    }
}

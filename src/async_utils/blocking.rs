//! Running CPU-bound work without stalling the async executor.

use crate::prelude::*;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
///
/// Use this for in-process CPU work like decoding, encoding or filtering
/// images. External processes should be driven with `tokio::process` instead.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(anyhow!("blocking task did not complete: {}", err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_value_from_blocking_thread() -> Result<()> {
        let value = spawn_blocking_propagating_panics(|| 6 * 7).await?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[tokio::test]
    #[should_panic(expected = "kaboom")]
    async fn propagates_panics() {
        let _ = spawn_blocking_propagating_panics(|| -> u32 { panic!("kaboom") }).await;
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Returned by a checkpoint once the owning load has been cancelled.
///
/// Work units call [`CancellationToken::check`] between chunks and bail out
/// with `?`:
///
/// ```ignore
/// pool.spawn("vertex_positions", &token, |token| {
///     let mut out = Vec::with_capacity(count);
///     for chunk in source.chunks(1024) {
///         token.check()?;
///         out.extend_from_slice(chunk);
///     }
///     Ok(out)
/// });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("load cancelled")]
pub struct Cancelled;

/// Shared cancellation flag of one primitive, image or resource load.
///
/// Clones observe the same flag. Cancelling is one-way.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Checkpoint for cooperative work.
    pub fn check(&self) -> Result<(), Cancelled> {
        match self.is_cancelled() {
            true => Err(Cancelled),
            false => Ok(()),
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CancellationToken({})", self.is_cancelled())
    }
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_one_flag() {
        let token = CancellationToken::new();
        let worker_side = token.clone();
        assert_eq!(worker_side.check(), Ok(()));

        token.cancel();
        token.cancel();
        assert!(worker_side.is_cancelled());
        assert_eq!(worker_side.check(), Err(Cancelled));
    }

    #[test]
    fn debug_shows_state() {
        let token = CancellationToken::new();
        assert_eq!(format!("{token:?}"), "CancellationToken(false)");
        assert_eq!(Cancelled.to_string(), "load cancelled");
    }
}

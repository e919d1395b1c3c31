use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// A cooperative cancellation latch handed to every `Custom` callable.
///
/// Wraps [`tokio_util::sync::CancellationToken`]: once [`Token::cancel`] has
/// been called (from any task), every subsequent [`Token::is_cancelled`] call
/// (from any task) returns `true`. There is no failure mode — both operations
/// are infallible, and repeated `cancel()` calls are idempotent.
#[derive(Debug, Clone)]
pub struct Token {
    inner: Inner,
}

#[derive(Debug, Clone)]
enum Inner {
    Real(CancellationToken, Arc<AtomicU64>),
    /// Backs [`Token::none`]: ignores `cancel()` and never reports cancelled.
    None,
}

impl Token {
    pub(crate) fn new() -> Self {
        Self {
            inner: Inner::Real(CancellationToken::new(), Arc::new(AtomicU64::new(0))),
        }
    }

    /// A token that is never cancelled and ignores `cancel()`. Used for
    /// callables that don't care about cancellation, so they can still be
    /// invoked through the same `callable(outlet, token)` signature.
    pub fn none() -> Self {
        Self { inner: Inner::None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            Inner::Real(token, _generation) => token.is_cancelled(),
            Inner::None => false,
        }
    }

    pub fn cancel(&self) {
        if let Inner::Real(token, generation) = &self.inner {
            let _ = generation.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
            token.cancel();
        }
    }

    /// A monotonically increasing generation counter, `0` before `cancel()`
    /// has ever been called and `1` after, held steady regardless of how
    /// many times or from how many concurrent callers `cancel()` is called.
    /// Test instrumentation only, to assert a token was cancelled exactly
    /// once even when several tasks race to cancel it; runtime code never
    /// reads it.
    pub fn generation(&self) -> u64 {
        match &self.inner {
            Inner::Real(_token, generation) => generation.load(Ordering::SeqCst),
            Inner::None => 0,
        }
    }

    /// Resolves once this token has been cancelled. Never resolves for
    /// [`Token::none`].
    pub async fn cancelled(&self) {
        match &self.inner {
            Inner::Real(token, _generation) => token.cancelled().await,
            Inner::None => std::future::pending().await,
        }
    }

    pub(crate) fn child(&self) -> Self {
        match &self.inner {
            Inner::Real(token, _generation) => Self {
                inner: Inner::Real(token.child_token(), Arc::new(AtomicU64::new(0))),
            },
            Inner::None => Self::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_is_idempotent_and_observed_from_any_clone() {
        let token = Token::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn none_ignores_cancel() {
        let token = Token::none();
        token.cancel();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn generation_is_zero_until_cancelled_then_stays_at_one() {
        let token = Token::new();
        assert_eq!(token.generation(), 0);
        token.cancel();
        assert_eq!(token.generation(), 1);
        token.cancel();
        assert_eq!(token.generation(), 1);
    }

    #[test]
    fn concurrent_cancellers_still_observe_exactly_one_generation() {
        let token = Token::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let token = token.clone();
                thread::spawn(move || token.cancel())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(token.is_cancelled());
        assert_eq!(token.generation(), 1);
    }

    #[test]
    fn none_generation_is_always_zero() {
        let token = Token::none();
        token.cancel();
        assert_eq!(token.generation(), 0);
    }
}

// Re-entrancy protection for child view rendering
//
// A child view embedding itself (directly or through another view) would
// otherwise render forever. The guard tracks which (view, display) pairs
// are currently mid-render within one request. Request-scoped: construct
// one guard per incoming request and drop it when the request ends.

use std::cell::RefCell;
use std::collections::HashSet;

/// Tracks (view, display) pairs currently rendering within one request.
pub struct RecursionGuard {
    active: RefCell<HashSet<(String, String)>>,
    bypass: bool,
}

impl RecursionGuard {
    pub fn new() -> Self {
        RecursionGuard {
            active: RefCell::new(HashSet::new()),
            bypass: false,
        }
    }

    /// A guard that never refuses entry. Intentional self-referential
    /// embeds only; the operator owns the consequences.
    pub fn with_bypass(bypass: bool) -> Self {
        RecursionGuard {
            active: RefCell::new(HashSet::new()),
            bypass,
        }
    }

    /// Try to start rendering the given (view, display) pair. Returns
    /// `None` if the pair is already mid-render and the guard is not
    /// bypassed. The returned token releases the pair when dropped, so
    /// every exit path of the caller releases it.
    pub fn try_enter(&self, view: &str, display: &str) -> Option<GuardToken<'_>> {
        let key = (view.to_string(), display.to_string());
        let inserted = self.active.borrow_mut().insert(key.clone());
        if inserted {
            return Some(GuardToken {
                guard: self,
                key: Some(key),
            });
        }
        if self.bypass {
            // Already held by an outer render; this token owns nothing.
            return Some(GuardToken {
                guard: self,
                key: None,
            });
        }
        None
    }

    /// Whether the pair is currently mid-render.
    pub fn is_active(&self, view: &str, display: &str) -> bool {
        self.active
            .borrow()
            .contains(&(view.to_string(), display.to_string()))
    }

    fn release(&self, key: &(String, String)) {
        self.active.borrow_mut().remove(key);
    }
}

impl Default for RecursionGuard {
    fn default() -> Self {
        RecursionGuard::new()
    }
}

/// Held entry for one (view, display) pair. Dropping it releases the pair.
pub struct GuardToken<'a> {
    guard: &'a RecursionGuard,
    key: Option<(String, String)>,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.guard.release(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_refused_while_held() {
        let guard = RecursionGuard::new();
        let token = guard.try_enter("a", "default");
        assert!(token.is_some());
        assert!(guard.try_enter("a", "default").is_none());
        drop(token);
        assert!(guard.try_enter("a", "default").is_some());
    }

    #[test]
    fn test_different_display_not_refused() {
        let guard = RecursionGuard::new();
        let _outer = guard.try_enter("a", "default").unwrap();
        assert!(guard.try_enter("a", "page").is_some());
        assert!(guard.try_enter("b", "default").is_some());
    }

    #[test]
    fn test_released_on_every_exit_path() {
        let guard = RecursionGuard::new();
        {
            let _token = guard.try_enter("a", "default").unwrap();
            assert!(guard.is_active("a", "default"));
            // Early return / panic unwinding would drop the token the same way.
        }
        assert!(!guard.is_active("a", "default"));
    }

    #[test]
    fn test_bypass_allows_reentry() {
        let guard = RecursionGuard::with_bypass(true);
        let outer = guard.try_enter("a", "default").unwrap();
        let inner = guard.try_enter("a", "default").unwrap();
        // The inner token owns nothing: dropping it must not release the
        // outer hold.
        drop(inner);
        assert!(guard.is_active("a", "default"));
        drop(outer);
        assert!(!guard.is_active("a", "default"));
    }
}

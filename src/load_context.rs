// The load-context state machine a session's rebuild/load path consults
// so `suspend`/`resume`/`destroy` can interrupt a long-running rebuild
// scan between chapters rather than only between whole requests (spec.md
// §5 "Cancellation and timeouts", §4.9 "The load is interruptible").

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub(crate) enum LoadState {
    Opening = 0,
    Suspending = 1,
    Suspended = 2,
    Freeing = 3,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Suspending,
            2 => Self::Suspended,
            3 => Self::Freeing,
            _ => unreachable!("LoadState is only ever stored through LoadState::from_u8's own range"),
        }
    }
}

pub(crate) struct LoadContext {
    state: AtomicU8,
}

impl LoadContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LoadState::Opening as u8),
        }
    }

    #[must_use]
    pub fn get(&self) -> LoadState {
        LoadState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LoadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// `true` once a rebuild/load scan must bail out with `Error::Busy`
    /// (spec.md §4.9).
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self.get(), LoadState::Suspending | LoadState::Freeing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn starts_opening_and_not_busy() {
        let ctx = LoadContext::new();
        assert_eq!(ctx.get(), LoadState::Opening);
        assert!(!ctx.is_busy());
    }

    #[test]
    fn suspending_and_freeing_are_busy() {
        let ctx = LoadContext::new();
        ctx.set(LoadState::Suspending);
        assert!(ctx.is_busy());
        ctx.set(LoadState::Freeing);
        assert!(ctx.is_busy());
        ctx.set(LoadState::Suspended);
        assert!(!ctx.is_busy());
    }
}

//! Keeps track of the number of user-initiated activities in flight.
use crate::Mux;
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNT: AtomicUsize = AtomicUsize::new(0);

/// Create and hold on to an Activity while you are processing the direct
/// result of a user initiated action, such as preparing to open a window.
/// Once you have opened the window, drop the activity.
///
/// The activity is used to keep dead-entity pruning from running in the
/// window between "decide to open a window" and "the first pane exists",
/// which would otherwise immediately prune the window away again.
pub struct Activity {}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl Activity {
    pub fn new() -> Self {
        COUNT.fetch_add(1, Ordering::SeqCst);
        Self {}
    }

    pub fn count() -> usize {
        COUNT.load(Ordering::SeqCst)
    }
}

impl Drop for Activity {
    fn drop(&mut self) {
        COUNT.fetch_sub(1, Ordering::SeqCst);

        promise::spawn::spawn_into_main_thread(async move {
            if let Some(mux) = Mux::try_get() {
                mux.prune_dead_windows();
            }
        })
        .detach();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // COUNT is process-wide, so this asserts deltas rather than absolute
    // values to stay correct if other tests touching Activity run concurrently.
    #[test]
    fn nested_activity_counts_and_releases_in_order() {
        let base = Activity::count();
        let a1 = Activity::new();
        assert_eq!(Activity::count(), base + 1);
        let a2 = Activity::new();
        assert_eq!(Activity::count(), base + 2);
        drop(a1);
        assert_eq!(Activity::count(), base + 1);
        drop(a2);
        assert_eq!(Activity::count(), base);
    }
}

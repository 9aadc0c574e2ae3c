use std::cell::Cell;

thread_local! {
    /// Whether the last call was a cache hit.
    static LAST_WAS_HIT: Cell<bool> = const { Cell::new(false) };
    static HITS: Cell<usize> = const { Cell::new(0) };
    static MISSES: Cell<usize> = const { Cell::new(0) };
}

/// Whether the last call on this thread was a hit.
pub fn last_was_hit() -> bool {
    LAST_WAS_HIT.with(|cell| cell.get())
}

/// The number of hits on this thread since the last reset.
pub fn hits() -> usize {
    HITS.with(|cell| cell.get())
}

/// The number of misses on this thread since the last reset.
pub fn misses() -> usize {
    MISSES.with(|cell| cell.get())
}

/// Reset the counters of this thread.
pub fn reset() {
    LAST_WAS_HIT.with(|cell| cell.set(false));
    HITS.with(|cell| cell.set(0));
    MISSES.with(|cell| cell.set(0));
}

/// Marks the last call as a cache hit.
pub(crate) fn register_hit() {
    LAST_WAS_HIT.with(|cell| cell.set(true));
    HITS.with(|cell| cell.set(cell.get() + 1));
}

/// Marks the last call as a cache miss.
pub(crate) fn register_miss() {
    LAST_WAS_HIT.with(|cell| cell.set(false));
    MISSES.with(|cell| cell.set(cell.get() + 1));
}

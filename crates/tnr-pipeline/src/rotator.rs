//! Role rotation over the fixed three-slot buffer table.
//!
//! Slots never move and are never reallocated; only the mapping from role to
//! slot index changes.  After each emitted frame the slot that held the
//! denoised output becomes the history (`previous`) for the next frame, and
//! the old history slot is reused as the next output.

/// Maps the `previous`, `current` and `output` roles onto slots `0..3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferRotator {
    previous: usize,
    current: usize,
    output: usize,
    has_history: bool,
}

impl Default for BufferRotator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferRotator {
    pub const SLOTS: usize = 3;

    pub const fn new() -> Self {
        Self {
            previous: 0,
            current: 1,
            output: 2,
            has_history: false,
        }
    }

    /// Slot holding the previous denoised frame, or `None` before the first
    /// frame has been emitted.
    pub fn previous(&self) -> Option<usize> {
        self.has_history.then_some(self.previous)
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn output(&self) -> usize {
        self.output
    }

    /// Exchange the `output` and `previous` roles.  Call only after the
    /// frame written to `output` has been synced and emitted.
    pub fn rotate(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.output);
        self.has_history = true;
    }
}

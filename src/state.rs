/// Process-wide interrupt bookkeeping shared by the coordinator, the signal
/// dispatcher and the resume prompt.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Where the coordinator is in its pause/exit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptState {
    /// Running normally; the next Ctrl-C pauses.
    Idle,
    /// Interruptible tasks were cancelled and the host was told to pause.
    Paused,
    /// The exit path has started. Terminal.
    Exiting,
}

/// Owned context holding the interrupt state and its flags.
///
/// Only the coordinator mutates it. Created once per coordinator and shared
/// by `Arc`.
#[derive(Debug)]
pub struct InterruptContext {
    state: Mutex<InterruptState>,
    waiting_for_input: AtomicBool,
    prompt_interrupted: AtomicBool,
    exiting: AtomicBool,
}

impl InterruptContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InterruptState::Idle),
            waiting_for_input: AtomicBool::new(false),
            prompt_interrupted: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> InterruptState {
        *self.lock_state()
    }

    /// Move to `next` unless already `Exiting`. Returns the state that holds
    /// afterwards.
    pub(crate) fn transition(&self, next: InterruptState) -> InterruptState {
        let mut state = self.lock_state();
        if *state != InterruptState::Exiting {
            *state = next;
        }
        *state
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.waiting_for_input.load(Ordering::SeqCst)
    }

    pub(crate) fn set_waiting_for_input(&self, waiting: bool) {
        self.waiting_for_input.store(waiting, Ordering::SeqCst);
    }

    /// Hand a Ctrl-C to the resume prompt. Set by the dispatcher when the
    /// signal went through the forwarding handler but the prompt was already
    /// up by the time it was dispatched.
    pub(crate) fn interrupt_prompt(&self) {
        self.prompt_interrupted.store(true, Ordering::SeqCst);
    }

    pub(crate) fn prompt_interrupted(&self) -> bool {
        self.prompt_interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn clear_prompt_interrupt(&self) {
        self.prompt_interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Claim the exit path. Returns `true` for exactly one caller; every
    /// later caller gets `false`.
    pub(crate) fn begin_exit(&self) -> bool {
        let first = self
            .exiting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        *self.lock_state() = InterruptState::Exiting;
        first
    }

    // A panicking callback never runs while this lock is held, so a poisoned
    // lock still holds a valid state.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, InterruptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InterruptContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking resume prompt shown after the first Ctrl-C.
///
/// While the prompt is up, SIGINT is switched from the coordinator's
/// forwarding handler to a prompt-local one installed without
/// `SA_RESTART`. A second Ctrl-C therefore interrupts the wait and is seen
/// right here at the read site. A Ctrl-C that hit the forwarding handler
/// just before the switch is handed over by the dispatcher through
/// the shared context. The previous disposition and the waiting-for-input
/// flag are restored when the prompt scope drops, on every path.
use crate::console::OperatorConsole;
use crate::state::InterruptContext;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// One poll of the operator input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Nothing yet, or the wait was interrupted.
    Pending,
    /// End of input.
    Closed,
}

/// Source of operator answers at the resume prompt.
pub trait OperatorInput {
    /// Wait up to `timeout` for a line.
    fn poll_line(&mut self, timeout: Duration) -> io::Result<InputEvent>;
}

impl<F> OperatorInput for F
where
    F: FnMut(Duration) -> io::Result<InputEvent>,
{
    fn poll_line(&mut self, timeout: Duration) -> io::Result<InputEvent> {
        self(timeout)
    }
}

/// Operator input read from the process's stdin.
#[derive(Debug, Default)]
pub struct StdinInput;

#[cfg(unix)]
impl OperatorInput for StdinInput {
    fn poll_line(&mut self, timeout: Duration) -> io::Result<InputEvent> {
        use nix::errno::Errno;
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::AsFd;

        let stdin = io::stdin();
        let millis = timeout.as_millis().min(u128::from(u16::MAX)) as u16;
        let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(millis)) {
            Ok(0) | Err(Errno::EINTR) => return Ok(InputEvent::Pending),
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }
        read_stdin_line(&stdin)
    }
}

#[cfg(not(unix))]
impl OperatorInput for StdinInput {
    fn poll_line(&mut self, _timeout: Duration) -> io::Result<InputEvent> {
        read_stdin_line(&io::stdin())
    }
}

fn read_stdin_line(stdin: &io::Stdin) -> io::Result<InputEvent> {
    let mut line = String::new();
    match stdin.read_line(&mut line) {
        Ok(0) => Ok(InputEvent::Closed),
        Ok(_) => Ok(InputEvent::Line(line)),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(InputEvent::Pending),
        Err(e) => Err(e),
    }
}

/// How the operator left the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Resume,
    SecondInterrupt,
    InputClosed,
}

pub struct ResumeGate {
    ctx: Arc<InterruptContext>,
    console: OperatorConsole,
    poll_interval: Duration,
}

impl ResumeGate {
    pub fn new(ctx: Arc<InterruptContext>, console: OperatorConsole, poll_interval: Duration) -> Self {
        Self {
            ctx,
            console,
            poll_interval,
        }
    }

    /// Show the prompt and block until a line, a second Ctrl-C, or end of
    /// input.
    pub fn wait(&self, input: &mut dyn OperatorInput) -> GateOutcome {
        let scope = PromptScope::enter(&self.ctx);
        self.console.resume_prompt();

        loop {
            if scope.interrupted() {
                tracing::debug!("second Ctrl-C observed at resume prompt");
                return GateOutcome::SecondInterrupt;
            }
            match input.poll_line(self.poll_interval) {
                Ok(InputEvent::Line(_)) => return GateOutcome::Resume,
                Ok(InputEvent::Pending) => continue,
                Ok(InputEvent::Closed) => {
                    tracing::warn!("operator input closed at resume prompt");
                    return GateOutcome::InputClosed;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read operator input");
                    return GateOutcome::InputClosed;
                }
            }
        }
    }
}

/// Prompt lifetime: waiting flag set, SIGINT diverted. Undone on drop.
struct PromptScope<'a> {
    ctx: &'a InterruptContext,
    #[cfg(unix)]
    previous: Option<nix::sys::signal::SigAction>,
}

#[cfg(unix)]
static PROMPT_INTERRUPTED: std::sync::atomic::AtomicBool =
    std::sync::atomic::AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn note_prompt_interrupt(_signum: nix::libc::c_int) {
    PROMPT_INTERRUPTED.store(true, std::sync::atomic::Ordering::SeqCst);
}

impl<'a> PromptScope<'a> {
    #[cfg(unix)]
    fn enter(ctx: &'a InterruptContext) -> Self {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
        use std::sync::atomic::Ordering;

        ctx.clear_prompt_interrupt();
        PROMPT_INTERRUPTED.store(false, Ordering::SeqCst);
        ctx.set_waiting_for_input(true);

        // No SA_RESTART: a blocked poll(2) returns EINTR.
        let action = SigAction::new(
            SigHandler::Handler(note_prompt_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // Safety: note_prompt_interrupt only stores to an atomic.
        let previous = match unsafe { sigaction(Signal::SIGINT, &action) } {
            Ok(previous) => Some(previous),
            Err(e) => {
                tracing::warn!(error = %e, "failed to divert Ctrl-C for resume prompt");
                None
            }
        };
        Self { ctx, previous }
    }

    #[cfg(not(unix))]
    fn enter(ctx: &'a InterruptContext) -> Self {
        ctx.clear_prompt_interrupt();
        ctx.set_waiting_for_input(true);
        Self { ctx }
    }

    #[cfg(unix)]
    fn interrupted(&self) -> bool {
        PROMPT_INTERRUPTED.load(std::sync::atomic::Ordering::SeqCst) || self.ctx.prompt_interrupted()
    }

    #[cfg(not(unix))]
    fn interrupted(&self) -> bool {
        self.ctx.prompt_interrupted()
    }
}

impl Drop for PromptScope<'_> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{sigaction, Signal};
            if let Some(previous) = self.previous.take() {
                // Safety: `previous` came from sigaction for SIGINT.
                if let Err(e) = unsafe { sigaction(Signal::SIGINT, &previous) } {
                    tracing::warn!(error = %e, "failed to restore Ctrl-C handler after resume prompt");
                }
            }
        }
        self.ctx.set_waiting_for_input(false);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::console::CapturedOutput;
    use crate::signals::test_support::{current_handler, lock_signal_table};
    use nix::sys::signal::{raise, SigHandler, Signal};

    fn gate(ctx: &Arc<InterruptContext>, captured: &CapturedOutput) -> ResumeGate {
        ResumeGate::new(Arc::clone(ctx), captured.console(), Duration::from_millis(10))
    }

    #[test]
    fn test_line_resumes_and_cleans_up() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let captured = CapturedOutput::default();

        let waiting_during_read = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::clone(&waiting_during_read);
        let probe = Arc::clone(&ctx);
        let mut input = move |_timeout: Duration| -> io::Result<InputEvent> {
            seen.store(probe.is_waiting_for_input(), std::sync::atomic::Ordering::SeqCst);
            Ok(InputEvent::Line("\n".to_string()))
        };

        assert_eq!(gate(&ctx, &captured).wait(&mut input), GateOutcome::Resume);
        assert!(waiting_during_read.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!ctx.is_waiting_for_input());
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigIgn);
        assert!(captured.text().contains("[Enter]"));
    }

    #[test]
    fn test_pending_polls_until_line() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let mut polls = 0;
        let mut input = |_timeout: Duration| -> io::Result<InputEvent> {
            polls += 1;
            if polls < 3 {
                Ok(InputEvent::Pending)
            } else {
                Ok(InputEvent::Line("y\n".to_string()))
            }
        };

        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::Resume);
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_second_interrupt_is_seen_at_read_site() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let mut input = |_timeout: Duration| -> io::Result<InputEvent> {
            // Lands on the prompt's own handler, not the ignored disposition.
            raise(Signal::SIGINT).unwrap();
            Err(io::Error::from(io::ErrorKind::Interrupted))
        };

        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::SecondInterrupt);
        assert!(!ctx.is_waiting_for_input());
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigIgn);
    }

    #[test]
    fn test_stale_interrupt_does_not_leak_into_next_prompt() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let mut interrupting = |_timeout: Duration| -> io::Result<InputEvent> {
            raise(Signal::SIGINT).unwrap();
            Ok(InputEvent::Pending)
        };
        let g = gate(&ctx, &CapturedOutput::default());
        assert_eq!(g.wait(&mut interrupting), GateOutcome::SecondInterrupt);

        let mut answering =
            |_timeout: Duration| -> io::Result<InputEvent> { Ok(InputEvent::Line("\n".to_string())) };
        assert_eq!(g.wait(&mut answering), GateOutcome::Resume);
    }

    #[test]
    fn test_interrupt_handed_over_by_dispatcher() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let dispatcher = Arc::clone(&ctx);
        let mut input = move |_timeout: Duration| -> io::Result<InputEvent> {
            dispatcher.interrupt_prompt();
            Ok(InputEvent::Pending)
        };

        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::SecondInterrupt);
        assert!(!ctx.is_waiting_for_input());
    }

    #[test]
    fn test_handover_from_before_the_prompt_is_cleared() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        ctx.interrupt_prompt();
        let mut input =
            |_timeout: Duration| -> io::Result<InputEvent> { Ok(InputEvent::Line("\n".to_string())) };

        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::Resume);
    }

    #[test]
    fn test_closed_input() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let mut input = |_timeout: Duration| -> io::Result<InputEvent> { Ok(InputEvent::Closed) };
        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::InputClosed);
        assert!(!ctx.is_waiting_for_input());
    }

    #[test]
    fn test_read_error_ends_prompt() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let mut input =
            |_timeout: Duration| -> io::Result<InputEvent> { Err(io::Error::other("tty gone")) };
        let outcome = gate(&ctx, &CapturedOutput::default()).wait(&mut input);
        assert_eq!(outcome, GateOutcome::InputClosed);
    }

    #[test]
    fn test_cleanup_runs_when_input_panics() {
        let _guard = lock_signal_table();
        let ctx = Arc::new(InterruptContext::new());
        let g = gate(&ctx, &CapturedOutput::default());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut input = |_timeout: Duration| -> io::Result<InputEvent> { panic!("reader died") };
            g.wait(&mut input)
        }));

        assert!(result.is_err());
        assert!(!ctx.is_waiting_for_input());
        assert_eq!(current_handler(Signal::SIGINT), SigHandler::SigIgn);
    }
}

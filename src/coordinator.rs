/// The interrupt state machine.
///
/// First Ctrl-C: cancel interruptible tasks, call `pause`, move to Paused.
/// Second Ctrl-C while paused: call `exit` once and terminate (unless
/// disabled, or the resume prompt is up, in which case it is handed to the
/// prompt).
/// SIGTERM in any state: call `exit` once and terminate.
use crate::canceller::TaskCanceller;
use crate::config::InterruptConfig;
use crate::console::OperatorConsole;
use crate::gate::{GateOutcome, OperatorInput, ResumeGate, StdinInput};
use crate::signals::{RegistrationMode, SignalKind, SignalRegistrar, SignalSink};
use crate::state::{InterruptContext, InterruptState};
use crate::tasks::TaskSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Error a host callback may return. Logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

type Callback = Arc<dyn Fn() -> Result<(), CallbackError> + Send + Sync>;

/// Host hooks run on pause, resume and exit. All optional.
#[derive(Clone, Default)]
pub struct Callbacks {
    pause: Option<Callback>,
    resume: Option<Callback>,
    exit: Option<Callback>,
}

impl Callbacks {
    pub fn on_pause<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.pause = Some(Arc::new(f));
        self
    }

    pub fn on_resume<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.resume = Some(Arc::new(f));
        self
    }

    /// Runs at most once per coordinator, before the process terminates.
    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.exit = Some(Arc::new(f));
        self
    }
}

/// Ends the process on the forced-exit paths.
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

/// Exits the process immediately, skipping the rest of the host's cleanup.
#[derive(Debug, Default)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

/// Result of [`InterruptCoordinator::wait_for_resume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The operator answered; the coordinator is Idle again.
    Resumed,
    /// The exit path ran. Only returned when the terminator returns.
    Exited,
    /// Operator input ended before an answer; still Paused.
    InputClosed,
}

/// Cheap-to-clone handle to one interrupt coordinator.
#[derive(Clone)]
pub struct InterruptCoordinator {
    ctx: Arc<InterruptContext>,
    config: Arc<InterruptConfig>,
    callbacks: Callbacks,
    tasks: TaskSet,
    canceller: Arc<TaskCanceller>,
    console: OperatorConsole,
    terminator: Arc<dyn Terminator>,
    registrar: Arc<Mutex<SignalRegistrar>>,
}

impl InterruptCoordinator {
    pub fn new(config: InterruptConfig, callbacks: Callbacks, tasks: TaskSet) -> Self {
        let canceller = TaskCanceller::new(config.interruptible_patterns.clone());
        Self {
            ctx: Arc::new(InterruptContext::new()),
            config: Arc::new(config),
            callbacks,
            tasks,
            canceller: Arc::new(canceller),
            console: OperatorConsole::stderr(),
            terminator: Arc::new(ProcessExit),
            registrar: Arc::new(Mutex::new(SignalRegistrar::new())),
        }
    }

    pub fn with_console(mut self, console: OperatorConsole) -> Self {
        self.console = console;
        self
    }

    pub fn with_terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn state(&self) -> InterruptState {
        self.ctx.state()
    }

    pub fn is_waiting_for_input(&self) -> bool {
        self.ctx.is_waiting_for_input()
    }

    pub fn is_exiting(&self) -> bool {
        self.ctx.is_exiting()
    }

    pub fn tasks(&self) -> &TaskSet {
        &self.tasks
    }

    /// Install the SIGINT/SIGTERM handlers. Must run inside a tokio runtime.
    pub fn register(&self) -> RegistrationMode {
        let sink: Arc<dyn SignalSink> = Arc::new(self.clone());
        self.lock_registrar().register(sink)
    }

    /// Restore the handlers that were installed before `register()`.
    pub fn unregister(&self) {
        self.lock_registrar().unregister();
    }

    /// React to one Ctrl-C.
    pub fn handle_interrupt(&self) {
        if self.ctx.is_exiting() {
            tracing::debug!("Ctrl-C during exit");
            self.terminate();
            return;
        }

        match self.ctx.state() {
            InterruptState::Idle => self.pause(),
            InterruptState::Paused if self.ctx.is_waiting_for_input() => {
                // Raised before the prompt diverted SIGINT, dispatched after.
                tracing::debug!("Ctrl-C at resume prompt, handing to the prompt");
                self.ctx.interrupt_prompt();
            }
            InterruptState::Paused if self.config.exit_on_second_interrupt => {
                self.exit_after_second_interrupt();
            }
            InterruptState::Paused => {
                tracing::debug!("second Ctrl-C ignored, exit_on_second_interrupt is off");
            }
            InterruptState::Exiting => self.terminate(),
        }
    }

    /// React to SIGTERM: always exit, never pause.
    pub fn handle_terminate(&self) {
        if self.ctx.begin_exit() {
            tracing::info!("SIGTERM received, exiting");
            self.console.terminate_notice();
            self.invoke("exit", self.callbacks.exit.as_ref());
        }
        self.terminate();
    }

    /// Show the resume prompt on stdin without blocking the runtime.
    pub async fn wait_for_resume(&self) -> ResumeOutcome {
        let coordinator = self.clone();
        let prompt =
            tokio::task::spawn_blocking(move || coordinator.wait_for_resume_with(&mut StdinInput));
        match prompt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "resume prompt failed");
                ResumeOutcome::InputClosed
            }
        }
    }

    /// Show the resume prompt and block the calling thread on `input`.
    pub fn wait_for_resume_with(&self, input: &mut dyn OperatorInput) -> ResumeOutcome {
        let poll_interval = Duration::from_millis(self.config.input_poll_interval_ms);
        let gate = ResumeGate::new(Arc::clone(&self.ctx), self.console.clone(), poll_interval);

        match gate.wait(input) {
            GateOutcome::Resume if self.ctx.is_exiting() => {
                tracing::debug!("answer at resume prompt after exit began");
                ResumeOutcome::Exited
            }
            GateOutcome::Resume => {
                self.invoke("resume", self.callbacks.resume.as_ref());
                self.reset();
                tracing::info!("resumed");
                ResumeOutcome::Resumed
            }
            GateOutcome::SecondInterrupt => {
                self.exit_after_second_interrupt();
                ResumeOutcome::Exited
            }
            GateOutcome::InputClosed => ResumeOutcome::InputClosed,
        }
    }

    /// Clear pause bookkeeping and return to Idle. No effect once exiting.
    pub fn reset(&self) {
        self.ctx.set_waiting_for_input(false);
        self.ctx.transition(InterruptState::Idle);
    }

    fn pause(&self) {
        self.ctx.set_waiting_for_input(false);
        let cancelled = self.canceller.cancel_interruptible(&self.tasks);
        tracing::info!(cancelled = ?cancelled, "Ctrl-C received, pausing");
        self.invoke("pause", self.callbacks.pause.as_ref());
        self.ctx.transition(InterruptState::Paused);
        self.console.separator();
    }

    fn exit_after_second_interrupt(&self) {
        if self.ctx.begin_exit() {
            tracing::info!("second Ctrl-C received, exiting");
            self.invoke("exit", self.callbacks.exit.as_ref());
        }
        self.console.second_interrupt_notice();
        self.terminate();
    }

    fn exit_only_interrupt(&self) {
        if self.ctx.begin_exit() {
            self.console.exit_only_notice();
            self.invoke("exit", self.callbacks.exit.as_ref());
        }
        self.terminate();
    }

    fn terminate(&self) {
        tracing::debug!(code = self.config.exit_code, "terminating process");
        self.terminator.terminate(self.config.exit_code);
    }

    fn invoke(&self, name: &'static str, callback: Option<&Callback>) {
        let Some(callback) = callback else {
            return;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(Ok(())) => tracing::debug!(callback = name, "callback finished"),
            Ok(Err(e)) => tracing::error!(callback = name, error = %e, "callback failed"),
            Err(_) => tracing::error!(callback = name, "callback panicked"),
        }
    }

    fn lock_registrar(&self) -> std::sync::MutexGuard<'_, SignalRegistrar> {
        self.registrar.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SignalSink for InterruptCoordinator {
    fn on_signal(&self, kind: SignalKind) {
        match kind {
            SignalKind::Interrupt => self.handle_interrupt(),
            SignalKind::Terminate => self.handle_terminate(),
        }
    }

    fn on_exit_only_interrupt(&self) {
        self.exit_only_interrupt();
    }
}

/// Signal handling for pause/resume/exit.
///
/// Installs handlers for SIGINT (Ctrl-C) and SIGTERM, remembering whatever
/// was installed before so teardown can put it back.
///
/// On unix the raw handler only writes the signal number into a self-pipe.
/// A dispatcher task on the tokio runtime reads the pipe and hands each
/// signal to a [`SignalSink`], so state transitions never run in signal
/// context. Elsewhere, or when the unix setup fails, Ctrl-C is wired to the
/// exit-only path through `tokio::signal::ctrl_c`.
use std::sync::Arc;
use tokio::task::JoinHandle;

#[cfg(unix)]
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
#[cfg(unix)]
use std::collections::HashMap;
#[cfg(unix)]
use std::os::fd::AsRawFd;
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, Ordering};

/// The two signals the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
}

/// What `register()` managed to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationMode {
    /// Pause on first Ctrl-C, resume prompt, exit on second Ctrl-C or SIGTERM.
    Full,
    /// Ctrl-C exits immediately; no pause/resume.
    ExitOnly,
    /// Nothing could be installed (no tokio runtime on this thread).
    Unavailable,
}

/// Receiver of signals once they are back on the runtime.
pub trait SignalSink: Send + Sync + 'static {
    fn on_signal(&self, kind: SignalKind);

    /// Ctrl-C under [`RegistrationMode::ExitOnly`].
    fn on_exit_only_interrupt(&self);
}

/// Errors from installing the full unix handlers.
#[derive(Debug)]
pub enum SignalError {
    /// No tokio runtime to run the dispatcher on.
    NoRuntime,
    /// Failed to create or configure the wake-up pipe.
    Pipe { source: std::io::Error },
    /// `sigaction` rejected the handler.
    #[cfg(unix)]
    Install {
        signal: Signal,
        source: nix::errno::Errno,
    },
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::NoRuntime => write!(f, "no tokio runtime to dispatch signals on"),
            SignalError::Pipe { source } => {
                write!(f, "failed to set up signal wake-up pipe: {}", source)
            }
            #[cfg(unix)]
            SignalError::Install { signal, source } => {
                write!(f, "failed to install {} handler: {}", signal, source)
            }
        }
    }
}

impl std::error::Error for SignalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SignalError::NoRuntime => None,
            SignalError::Pipe { source } => Some(source),
            #[cfg(unix)]
            SignalError::Install { source, .. } => Some(source),
        }
    }
}

/// Write end of the wake-up pipe, or -1. The only state the raw handler reads.
#[cfg(unix)]
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

#[cfg(unix)]
const HANDLED: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

#[cfg(unix)]
extern "C" fn forward_signal(signum: nix::libc::c_int) {
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd < 0 {
        return;
    }
    // The interrupted thread must see its own errno afterwards.
    let saved = nix::errno::Errno::last_raw();
    let byte = signum as u8;
    // Safety: write(2) is async-signal-safe. A full pipe drops the byte,
    // which only loses a duplicate wake-up.
    unsafe {
        nix::libc::write(fd, (&byte as *const u8).cast(), 1);
    }
    nix::errno::Errno::set_raw(saved);
}

#[cfg(unix)]
fn forwarding_action() -> SigAction {
    SigAction::new(
        SigHandler::Handler(forward_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    )
}

#[cfg(unix)]
fn signal_kind(signum: i32) -> Option<SignalKind> {
    match Signal::try_from(signum) {
        Ok(Signal::SIGINT) => Some(SignalKind::Interrupt),
        Ok(Signal::SIGTERM) => Some(SignalKind::Terminate),
        _ => None,
    }
}

/// Reversible installation of the SIGINT/SIGTERM handlers.
///
/// Only one registrar should be registered at a time: the raw handler
/// forwards to a single process-wide pipe.
pub struct SignalRegistrar {
    #[cfg(unix)]
    signals: Vec<Signal>,
    #[cfg(unix)]
    originals: HashMap<Signal, SigAction>,
    #[cfg(unix)]
    wake: Option<std::os::unix::net::UnixStream>,
    dispatcher: Option<JoinHandle<()>>,
    mode: Option<RegistrationMode>,
}

impl Default for SignalRegistrar {
    fn default() -> Self {
        Self {
            #[cfg(unix)]
            signals: HANDLED.to_vec(),
            #[cfg(unix)]
            originals: HashMap::new(),
            #[cfg(unix)]
            wake: None,
            dispatcher: None,
            mode: None,
        }
    }
}

impl SignalRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrar for an explicit signal list, forwarded like SIGINT/SIGTERM.
    #[cfg(all(test, unix))]
    fn for_signals(signals: Vec<Signal>) -> Self {
        Self {
            signals,
            ..Self::default()
        }
    }

    /// Current registration, if any.
    pub fn mode(&self) -> Option<RegistrationMode> {
        self.mode
    }

    /// Install handlers that deliver signals to `sink`.
    ///
    /// Registering again while registered keeps the handlers recorded by the
    /// first call, so `unregister()` still restores the pre-registration
    /// state.
    pub fn register(&mut self, sink: Arc<dyn SignalSink>) -> RegistrationMode {
        if let Some(mode) = self.mode {
            #[cfg(unix)]
            {
                if mode == RegistrationMode::Full {
                    self.reinstall();
                }
            }
            tracing::debug!(?mode, "signal handlers already registered");
            return mode;
        }

        let mode = self.install(sink);
        tracing::info!(?mode, "signal handlers registered");
        self.mode = Some(mode);
        mode
    }

    /// Restore the handlers recorded by `register()`. Never fails; problems
    /// are logged. A no-op when nothing is registered.
    pub fn unregister(&mut self) {
        if self.mode.take().is_none() {
            tracing::debug!("unregister called with no handlers registered");
            return;
        }

        #[cfg(unix)]
        {
            for (signal, action) in self.originals.drain() {
                // Safety: `action` was returned by sigaction for this signal.
                if let Err(e) = unsafe { sigaction(signal, &action) } {
                    tracing::warn!(%signal, error = %e, "failed to restore signal handler");
                }
            }
            WAKE_FD.store(-1, Ordering::SeqCst);
            self.wake = None;
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        tracing::info!("signal handlers unregistered");
    }

    #[cfg(unix)]
    fn install(&mut self, sink: Arc<dyn SignalSink>) -> RegistrationMode {
        match self.install_forwarding(Arc::clone(&sink)) {
            Ok(()) => RegistrationMode::Full,
            Err(e) => {
                tracing::warn!(error = %e, "falling back to exit-only Ctrl-C handling");
                for (signal, action) in self.originals.drain() {
                    // Safety: `action` was returned by sigaction for this signal.
                    if let Err(e) = unsafe { sigaction(signal, &action) } {
                        tracing::warn!(%signal, error = %e, "failed to roll back signal handler");
                    }
                }
                WAKE_FD.store(-1, Ordering::SeqCst);
                self.wake = None;
                self.install_exit_only(sink)
            }
        }
    }

    #[cfg(not(unix))]
    fn install(&mut self, sink: Arc<dyn SignalSink>) -> RegistrationMode {
        self.install_exit_only(sink)
    }

    #[cfg(unix)]
    fn install_forwarding(&mut self, sink: Arc<dyn SignalSink>) -> Result<(), SignalError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SignalError::NoRuntime)?;

        let (read, write) =
            std::os::unix::net::UnixStream::pair().map_err(|e| SignalError::Pipe { source: e })?;
        read.set_nonblocking(true)
            .and_then(|_| write.set_nonblocking(true))
            .map_err(|e| SignalError::Pipe { source: e })?;
        let read =
            tokio::net::UnixStream::from_std(read).map_err(|e| SignalError::Pipe { source: e })?;

        WAKE_FD.store(write.as_raw_fd(), Ordering::SeqCst);
        self.wake = Some(write);

        for &signal in &self.signals {
            // Safety: forward_signal only performs an atomic load and write(2).
            let previous = unsafe { sigaction(signal, &forwarding_action()) }
                .map_err(|e| SignalError::Install { signal, source: e })?;
            self.originals.entry(signal).or_insert(previous);
        }

        self.dispatcher = Some(runtime.spawn(dispatch(read, sink)));
        Ok(())
    }

    #[cfg(unix)]
    fn reinstall(&mut self) {
        for &signal in &self.signals {
            // Safety: see install_forwarding.
            match unsafe { sigaction(signal, &forwarding_action()) } {
                Ok(previous) => {
                    self.originals.entry(signal).or_insert(previous);
                }
                Err(e) => tracing::warn!(%signal, error = %e, "failed to reinstall signal handler"),
            }
        }
    }

    fn install_exit_only(&mut self, sink: Arc<dyn SignalSink>) -> RegistrationMode {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no tokio runtime, signal handlers not installed");
            return RegistrationMode::Unavailable;
        };
        self.dispatcher = Some(runtime.spawn(async move {
            loop {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => sink.on_exit_only_interrupt(),
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                        return;
                    }
                }
            }
        }));
        RegistrationMode::ExitOnly
    }
}

/// Drain the wake-up pipe, delivering each signal in arrival order.
#[cfg(unix)]
async fn dispatch(stream: tokio::net::UnixStream, sink: Arc<dyn SignalSink>) {
    let mut buf = [0u8; 32];
    loop {
        if let Err(e) = stream.readable().await {
            tracing::warn!(error = %e, "signal wake-up pipe failed");
            return;
        }
        match stream.try_read(&mut buf) {
            Ok(0) => {
                tracing::debug!("signal wake-up pipe closed");
                return;
            }
            Ok(n) => {
                for &byte in &buf[..n] {
                    match signal_kind(i32::from(byte)) {
                        Some(kind) => {
                            tracing::debug!(?kind, "dispatching signal");
                            sink.on_signal(kind);
                        }
                        None => tracing::warn!(signum = byte, "unexpected signal on wake-up pipe"),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read signal wake-up pipe");
                return;
            }
        }
    }
}

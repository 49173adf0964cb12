/// Operator-facing output: status lines, the separator and the resume prompt.
use std::io::Write;
use std::sync::{Arc, Mutex};

const GREEN: &str = "\x1b[32;1m";
const RED: &str = "\x1b[31m";
const BLINK: &str = "\x1b[33;5m";
const NC: &str = "\x1b[0m";

const SEPARATOR: &str =
    "----------------------------------------------------------------------";

/// Shared handle to the stream operator messages are written to.
///
/// Write errors are logged and dropped: output to the operator must never
/// break the signal path.
#[derive(Clone)]
pub struct OperatorConsole {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OperatorConsole {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub fn separator(&self) {
        self.write(&format!("{SEPARATOR}\n"));
    }

    pub fn resume_prompt(&self) {
        self.write(&format!(
            "Press {GREEN}[Enter]{NC} to resume or {RED}[Ctrl+C]{NC} again to exit{BLINK}...{NC} "
        ));
    }

    pub fn second_interrupt_notice(&self) {
        self.write("\n\nGot second Ctrl+C. Exiting immediately...\n");
    }

    pub fn terminate_notice(&self) {
        self.write("\n\nSIGTERM received. Exiting immediately...\n\n");
    }

    pub fn exit_only_notice(&self) {
        self.write("\n\nGot Ctrl+C. Exiting immediately...\n");
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
            tracing::debug!(error = %e, "failed to write operator message");
        }
    }
}

impl std::fmt::Debug for OperatorConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorConsole").finish_non_exhaustive()
    }
}

/// In-memory console for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CapturedOutput(pub Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CapturedOutput {
    pub(crate) fn console(&self) -> OperatorConsole {
        OperatorConsole::new(Box::new(self.clone()))
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

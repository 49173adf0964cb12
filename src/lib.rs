//! Pause, resume, or force-exit a tokio step loop from Ctrl-C and SIGTERM.
//!
//! The host spawns its work through a [`TaskSet`], builds an
//! [`InterruptCoordinator`] with its callbacks, and calls `register()`.
//! The first Ctrl-C cancels tasks whose label matches a configured pattern
//! and calls `pause`; the host then calls `wait_for_resume()`. A second
//! Ctrl-C, or SIGTERM at any time, runs `exit` once and terminates.

pub mod canceller;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod gate;
pub mod signals;
pub mod state;
pub mod tasks;

pub use config::{InterruptConfig, RunConfig, StepbreakConfig};
pub use console::OperatorConsole;
pub use coordinator::{
    CallbackError, Callbacks, InterruptCoordinator, ProcessExit, ResumeOutcome, Terminator,
};
pub use gate::{InputEvent, OperatorInput, StdinInput};
pub use signals::RegistrationMode;
pub use state::InterruptState;
pub use tasks::{TaskExit, TaskHandle, TaskJoin, TaskSet};

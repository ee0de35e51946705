//! Shell tools for command execution

mod execute;

pub use execute::{ShellExecute, DEFAULT_SHELL_TIMEOUT_SECS};

//! Scoped subprocess helpers
//!
//! Every child spawned here is `kill_on_drop` and, on Unix, leads its own
//! process group. Pair a spawned child with a [`ProcessGroupGuard`] so that
//! grandchildren (`sh -c "a | b"`, CLI helpers) die with it when the owning
//! future is dropped on timeout or cancellation.

use tokio::process::Command;

/// Windows creation flag to hide the console window
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

#[cfg(windows)]
fn hide_console_window(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_cmd: &mut Command) {}

fn scope(cmd: &mut Command) {
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    hide_console_window(cmd);
}

/// Shell command for the current platform (`sh -c` or `cmd /C`)
pub fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };

    scope(&mut cmd);
    cmd
}

/// Direct program execution without shell interpretation
pub fn direct_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    scope(&mut cmd);
    cmd
}

/// Kills a child's whole process group when dropped, unless disarmed.
///
/// `kill_on_drop` only reaches the direct child; this covers the rest of
/// the group.
#[derive(Debug)]
pub struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    /// `pid` is the child's id, which is also its group id for commands built here
    pub fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    /// Call once the child has been reaped normally
    pub fn disarm(&mut self) {
        self.pgid = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pgid.is_some()
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let Ok(raw) = i32::try_from(pgid) else {
                return;
            };
            match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => tracing::debug!(pgid, "Killed process group"),
                // Group already gone
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid, error = %e, "Failed to kill process group"),
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

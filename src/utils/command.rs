//! Command utilities for cross-platform process spawning
//!
//! Every `git` child process is forced into non-interactive mode: a hidden
//! credential prompt would block the calling operation forever.

use tokio::process::Command;

/// Creates a Command with platform-specific settings and prompts disabled.
///
/// On Windows, this sets the CREATE_NO_WINDOW flag to prevent CMD popups.
pub fn create_command(program: &str) -> Command {
    let mut cmd = Command::new(program);

    #[cfg(target_os = "windows")]
    {
        // CREATE_NO_WINDOW = 0x08000000
        cmd.creation_flags(0x08000000);
    }

    cmd.env("GIT_TERMINAL_PROMPT", "0")
        .env("GCM_INTERACTIVE", "never")
        .env("GIT_ASKPASS", "")
        .env("SSH_ASKPASS", "")
        // Stable English messages for failure classification
        .env("LC_ALL", "C")
        .env("LANGUAGE", "C")
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    if std::env::var_os("GIT_SSH_COMMAND").is_none() {
        cmd.env("GIT_SSH_COMMAND", "ssh -o BatchMode=yes");
    }

    cmd
}

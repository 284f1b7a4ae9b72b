use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStderr, Command};
use std::thread::JoinHandle;

use tnr_core::error::{EngineError, Result};

/// Resolve a tool name, honouring an environment override.
pub(crate) fn tool_path(tool: &str, env_var: &str) -> OsString {
    std::env::var_os(env_var).unwrap_or_else(|| OsString::from(tool))
}

/// Spawn `cmd`, mapping a missing executable to a configuration error.
pub(crate) fn spawn(cmd: &mut Command, tool: &str) -> Result<Child> {
    cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => EngineError::Configuration(format!(
            "{tool} executable not found ({}); install FFmpeg or set its path",
            cmd.get_program().to_string_lossy()
        )),
        _ => EngineError::Configuration(format!("failed to start {tool}: {e}")),
    })
}

/// Drains a child's stderr on a helper thread so the child never blocks on it.
pub(crate) struct StderrCollector {
    handle: Option<JoinHandle<String>>,
}

impl StderrCollector {
    pub(crate) fn start(stderr: Option<ChildStderr>) -> Self {
        let handle = stderr.map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        Self { handle }
    }

    /// Wait for the pipe to close and return its trimmed contents.
    pub(crate) fn finish(&mut self) -> String {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

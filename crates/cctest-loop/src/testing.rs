//! In-memory command runners for tests.
//!
//! [`ScriptedRunner`] answers every request through a closure.
//! [`LoopHost`] imitates just enough of `dd`, `fdisk` and `losetup` to
//! exercise provisioning without root: slots are tracked in memory and the
//! backing files are the real temp files the provisioner created.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cctest_common::error::Result;

use crate::command::{CommandOutput, CommandRequest, CommandRunner};

type Handler = Box<dyn Fn(&CommandRequest) -> CommandOutput + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runner that records requests and answers them with a closure.
pub struct ScriptedRunner {
    calls: Mutex<Vec<CommandRequest>>,
    handler: Handler,
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl ScriptedRunner {
    /// Creates a runner answering with `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CommandRequest) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            calls: Mutex::new(Vec::new()),
            handler: Box::new(handler),
        }
    }

    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            ..CommandOutput::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn fail(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    /// Every request seen so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandRequest> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        lock(&self.calls).push(request.clone());
        Ok((self.handler)(request))
    }
}

#[derive(Debug, Default)]
struct HostState {
    bindings: BTreeMap<PathBuf, Option<PathBuf>>,
    calls: Vec<CommandRequest>,
    dd_budget: Option<usize>,
    detach_refused: bool,
}

/// Fake host with a fixed number of loop device nodes.
#[derive(Debug)]
pub struct LoopHost {
    prefix: String,
    state: Mutex<HostState>,
}

impl LoopHost {
    /// Creates a host exposing `/dev/loop0` to `/dev/loop{nodes-1}`, all free.
    #[must_use]
    pub fn new(nodes: u32) -> Self {
        let prefix = cctest_common::constants::DEFAULT_LOOP_PREFIX.to_string();
        let bindings = (0..nodes)
            .map(|i| (PathBuf::from(format!("{prefix}{i}")), None))
            .collect();
        Self {
            prefix,
            state: Mutex::new(HostState {
                bindings,
                ..HostState::default()
            }),
        }
    }

    /// Binds slot `index` to a file owned by someone else.
    pub fn occupy(&self, index: u32) {
        let device = PathBuf::from(format!("{}{index}", self.prefix));
        let _ = lock(&self.state)
            .bindings
            .insert(device, Some(PathBuf::from("/var/lib/foreign.img")));
    }

    /// Lets `dd` succeed `count` more times, then fail.
    pub fn fail_dd_after(&self, count: usize) {
        lock(&self.state).dd_budget = Some(count);
    }

    /// Makes every later `losetup -d` fail as if the device were still open.
    pub fn refuse_detach(&self) {
        lock(&self.state).detach_refused = true;
    }

    /// Backing file bound to `device`, if any.
    #[must_use]
    pub fn backing_file(&self, device: &Path) -> Option<PathBuf> {
        lock(&self.state).bindings.get(device).cloned().flatten()
    }

    /// Number of bound slots, foreign ones included.
    #[must_use]
    pub fn bound_count(&self) -> usize {
        lock(&self.state)
            .bindings
            .values()
            .filter(|b| b.is_some())
            .count()
    }

    /// Every request seen so far, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandRequest> {
        lock(&self.state).calls.clone()
    }

    /// Answers a request the way the real utilities would.
    #[must_use]
    pub fn respond(&self, request: &CommandRequest) -> CommandOutput {
        let mut state = lock(&self.state);
        state.calls.push(request.clone());
        match request.program.as_str() {
            "dd" => match &mut state.dd_budget {
                Some(0) => ScriptedRunner::fail(1, "dd: error writing: No space left on device"),
                Some(left) => {
                    *left -= 1;
                    ScriptedRunner::ok("")
                }
                None => ScriptedRunner::ok(""),
            },
            "losetup" => Self::losetup(&mut state, &request.args),
            _ => ScriptedRunner::ok(""),
        }
    }

    fn losetup(state: &mut HostState, args: &[String]) -> CommandOutput {
        match args {
            [flag, device, file] if flag == "-P" => {
                let key = PathBuf::from(device);
                let refuse = |reason: &str| {
                    ScriptedRunner::fail(
                        1,
                        &format!("losetup: {device}: failed to set up loop device: {reason}"),
                    )
                };
                match state.bindings.get_mut(&key) {
                    None => refuse("No such file or directory"),
                    Some(Some(_)) => refuse("Device or resource busy"),
                    Some(slot) => {
                        *slot = Some(PathBuf::from(file));
                        ScriptedRunner::ok("")
                    }
                }
            }
            [flag, device] if flag == "-d" && state.detach_refused => ScriptedRunner::fail(
                1,
                &format!("losetup: {device}: detach failed: Device or resource busy"),
            ),
            [flag, device] if flag == "-d" => {
                let key = PathBuf::from(device);
                match state.bindings.get_mut(&key).filter(|slot| slot.is_some()) {
                    Some(slot) => {
                        *slot = None;
                        ScriptedRunner::ok("")
                    }
                    None => ScriptedRunner::fail(
                        1,
                        &format!("losetup: {device}: detach failed: No such device or address"),
                    ),
                }
            }
            _ => ScriptedRunner::fail(1, "losetup: bad usage"),
        }
    }
}

impl CommandRunner for LoopHost {
    fn run(&self, request: &CommandRequest) -> Result<CommandOutput> {
        Ok(self.respond(request))
    }
}

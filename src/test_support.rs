//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::inventory::{Inventory, InventoryError, InventoryStore};
use crate::session::{
    CommandError, CommandOutput, CommandRunner, ExecOutput, ExecuteOptions, RunOptions, Session,
    SessionError, SpawnError, TransferError,
};

type DynamicResponse = Box<dyn Fn(&[OsString]) -> CommandOutput>;

enum ScriptedResponse {
    Fixed(CommandOutput),
    Dynamic(DynamicResponse),
}

impl fmt::Debug for ScriptedResponse {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(output) => formatter.debug_tuple("Fixed").field(output).finish(),
            Self::Dynamic(_) => formatter.debug_tuple("Dynamic").finish(),
        }
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Spawn options passed to the runner.
    pub options: RunOptions,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<ScriptedResponse>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Fixed(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    /// Pushes a response computed from the invocation's arguments, for
    /// protocols whose output must echo generated tokens back.
    pub fn push_with(&self, respond: impl Fn(&[OsString]) -> CommandOutput + 'static) {
        self.responses
            .borrow_mut()
            .push_back(ScriptedResponse::Dynamic(Box::new(respond)));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, SpawnError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            options: options.clone(),
        });
        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| SpawnError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })?;
        Ok(match response {
            ScriptedResponse::Fixed(output) => output,
            ScriptedResponse::Dynamic(respond) => respond(args),
        })
    }
}

/// In-memory [`Session`] fake with a scriptable command queue and a
/// path-to-content map standing in for the remote filesystem.
///
/// Commands succeed with empty output unless a response is queued.
/// Transfers move bytes between the real local filesystem and the
/// in-memory remote map, so staging round-trips can be asserted.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSession {
    exec_responses: Rc<RefCell<VecDeque<Result<ExecOutput, CommandError>>>>,
    commands: Rc<RefCell<Vec<(Vec<String>, ExecuteOptions)>>>,
    envvars: Rc<RefCell<BTreeMap<String, String>>>,
    files: Rc<RefCell<BTreeMap<Utf8PathBuf, String>>>,
    dirs: Rc<RefCell<BTreeSet<Utf8PathBuf>>>,
}

impl ScriptedSession {
    /// Creates a session with an empty remote filesystem and environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the environment returned by `query_envvars`.
    pub fn set_envvars(&self, vars: BTreeMap<String, String>) {
        *self.envvars.borrow_mut() = vars;
    }

    /// Queues the result of the next `execute_command` call.
    pub fn push_exec(&self, response: Result<ExecOutput, CommandError>) {
        self.exec_responses.borrow_mut().push_back(response);
    }

    /// Returns every command executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<(Vec<String>, ExecuteOptions)> {
        self.commands.borrow().clone()
    }

    /// Seeds a file into the in-memory remote filesystem.
    pub fn seed_remote_file(&self, path: impl Into<Utf8PathBuf>, contents: impl Into<String>) {
        self.files.borrow_mut().insert(path.into(), contents.into());
    }

    /// Returns the contents of a remote file, when present.
    #[must_use]
    pub fn remote_file(&self, path: &Utf8Path) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }
}

impl Session for ScriptedSession {
    fn execute_command(
        &self,
        argv: &[String],
        options: &ExecuteOptions,
    ) -> Result<ExecOutput, CommandError> {
        self.commands
            .borrow_mut()
            .push((argv.to_vec(), options.clone()));
        self.exec_responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecOutput::default()))
    }

    fn exists(&self, path: &Utf8Path) -> bool {
        self.files.borrow().contains_key(path) || self.dirs.borrow().contains(path)
    }

    fn isdir(&self, path: &Utf8Path) -> bool {
        self.dirs.borrow().contains(path)
    }

    fn mkdir(&self, path: &Utf8Path, parents: bool) -> Result<(), SessionError> {
        if parents {
            let mut ancestor = Some(path);
            while let Some(dir) = ancestor {
                if dir.as_str().is_empty() {
                    break;
                }
                self.dirs.borrow_mut().insert(dir.to_path_buf());
                ancestor = dir.parent();
            }
            return Ok(());
        }
        let parent_missing = path.parent().is_some_and(|parent| {
            !parent.as_str().is_empty() && parent != "/" && !self.dirs.borrow().contains(parent)
        });
        if parent_missing {
            return Err(SessionError::Filesystem {
                path: path.to_path_buf(),
                message: String::from("no such file or directory"),
            });
        }
        self.dirs.borrow_mut().insert(path.to_path_buf());
        Ok(())
    }

    fn get(&self, remote_path: &Utf8Path, local_path: &Utf8Path) -> Result<(), TransferError> {
        let contents = self
            .files
            .borrow()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| TransferError::MissingSource {
                path: remote_path.to_path_buf(),
            })?;
        fs::write(local_path, contents).map_err(|err| TransferError::Copy {
            from: remote_path.to_path_buf(),
            to: local_path.to_path_buf(),
            message: err.to_string(),
        })
    }

    fn put(&self, local_path: &Utf8Path, remote_path: &Utf8Path) -> Result<(), TransferError> {
        let contents = fs::read_to_string(local_path).map_err(|_| TransferError::MissingSource {
            path: local_path.to_path_buf(),
        })?;
        self.files
            .borrow_mut()
            .insert(remote_path.to_path_buf(), contents);
        Ok(())
    }

    fn read(&self, path: &Utf8Path) -> Result<String, SessionError> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| SessionError::Filesystem {
                path: path.to_path_buf(),
                message: String::from("no such file"),
            })
    }

    fn query_envvars(&self) -> Result<BTreeMap<String, String>, SessionError> {
        Ok(self.envvars.borrow().clone())
    }
}

/// Inventory store backed by a shared in-memory map.
#[derive(Clone, Debug, Default)]
pub struct MemoryInventoryStore {
    inventory: Rc<RefCell<Inventory>>,
}

impl MemoryInventoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `inventory`.
    #[must_use]
    pub fn with_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: Rc::new(RefCell::new(inventory)),
        }
    }
}

impl InventoryStore for MemoryInventoryStore {
    fn get_inventory(&self) -> Result<Inventory, InventoryError> {
        Ok(self.inventory.borrow().clone())
    }

    fn set_inventory(&self, inventory: &Inventory) -> Result<(), InventoryError> {
        *self.inventory.borrow_mut() = inventory.clone();
        Ok(())
    }
}

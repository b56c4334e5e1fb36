//! Test doubles shared by the smsetup crates.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::command::{CommandOutput, CommandRunner};
use crate::Result;

type Responder = Box<dyn Fn(&Path, &[String]) -> Result<CommandOutput> + Send + Sync>;

/// A recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program as passed to the runner
    pub program: PathBuf,
    /// Arguments in order
    pub args: Vec<String>,
}

impl Invocation {
    /// File name of the invoked program.
    #[must_use]
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Command runner that records every call and answers from a closure.
pub struct ScriptedRunner {
    responder: Responder,
    calls: Mutex<Vec<Invocation>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new(|_, _| Ok(CommandOutput::success("")))
    }
}

impl ScriptedRunner {
    /// Answer every call with `responder`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&Path, &[String]) -> Result<CommandOutput> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// All invocations so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Invocations whose program file name is `name`.
    #[must_use]
    pub fn calls_to(&self, name: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program_name() == name)
            .collect()
    }
}

impl std::fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Invocation {
                program: program.to_path_buf(),
                args: args.to_vec(),
            });
        }
        (self.responder)(program, args)
    }
}

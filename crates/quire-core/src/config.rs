//! Scheduler and engine configuration.
//!
//! Configuration is plain data that can be loaded from a JSON file. Every
//! field has a default, so a config file only needs to name what it changes:
//!
//! ```json
//! {
//!   "poll_interval_ms": 20,
//!   "engine": { "program": "python3", "prompt": ">>> " }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Placeholder replaced by the scratch directory in [`EngineConfig::chdir_template`].
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Placeholder replaced by the cell source in [`EngineConfig::wrap_template`].
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Helper installed into the default Python engine.
///
/// Runs a cell like the interactive interpreter does: all statements are
/// executed, and the value of a trailing expression is displayed.
const PYTHON_RUNNER: &str = "exec(\"def _quire_run(src):\\n    import ast\\n    tree = ast.parse(src)\\n    last = tree.body[-1:] if tree.body and isinstance(tree.body[-1], ast.Expr) else []\\n    body = tree.body[:-1] if last else tree.body\\n    exec(compile(ast.Module(body=body, type_ignores=[]), '<cell>', 'exec'), globals())\\n    if last:\\n        exec(compile(ast.Interactive(body=last), '<cell>', 'single'), globals())\\n\")";

/// How to talk to one interactive engine subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to run. Resolved through `PATH` when not a path.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Extra environment variables for the subprocess.
    pub env: BTreeMap<String, String>,

    /// Ready-prompt token printed by the engine when it waits for input.
    pub prompt: String,

    /// Command that makes the engine print the prompt.
    ///
    /// Needed for engines that are not interactive on a pipe (e.g. `sh`).
    /// When set, it is sent once at startup and after every command.
    pub ready_probe: Option<String>,

    /// Commands sent once after spawn, each followed by a prompt wait.
    pub init_commands: Vec<String>,

    /// Command that changes the engine's working directory.
    ///
    /// `{path}` is replaced by the directory as a double-quoted string literal.
    pub chdir_template: String,

    /// Template wrapping each query before it is sent.
    ///
    /// `{source}` is replaced by the source as a double-quoted string literal.
    /// Without a template the source is sent verbatim, one line per line.
    pub wrap_template: Option<String>,

    /// Route stderr into the stdout stream so both keep their relative order.
    pub merge_stderr: bool,

    /// Bound on a single prompt wait. `None` waits indefinitely.
    pub query_timeout_ms: Option<u64>,

    /// File name prefix of generated images (`<prefix><n>.<extension>`).
    pub image_prefix: String,

    /// File extension of generated images.
    pub image_extension: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["-i".to_string(), "-q".to_string(), "-u".to_string()],
            env: BTreeMap::from([("PYTHONIOENCODING".to_string(), "utf-8".to_string())]),
            prompt: ">>> ".to_string(),
            ready_probe: None,
            init_commands: vec![
                "import sys, os".to_string(),
                "sys.ps2 = ''".to_string(),
                PYTHON_RUNNER.to_string(),
            ],
            chdir_template: "os.chdir({path})".to_string(),
            wrap_template: Some("_quire_run({source})".to_string()),
            merge_stderr: true,
            query_timeout_ms: None,
            image_prefix: "plot".to_string(),
            image_extension: "png".to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration for a POSIX shell engine.
    ///
    /// The shell is not interactive on a pipe, so a `printf` probe prints the
    /// prompt after every command. SIGINT is trapped so an interrupt ends the
    /// running command instead of the shell.
    pub fn shell() -> Self {
        Self {
            program: "sh".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            prompt: "quire> ".to_string(),
            ready_probe: Some("printf 'quire> '".to_string()),
            init_commands: vec!["trap : INT".to_string()],
            chdir_template: "cd {path}".to_string(),
            wrap_template: None,
            merge_stderr: true,
            query_timeout_ms: None,
            image_prefix: "plot".to_string(),
            image_extension: "png".to_string(),
        }
    }

    /// Prompt wait bound, if any.
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Render the working-directory command for `path`.
    pub fn chdir_command(&self, path: &Path) -> String {
        self.chdir_template
            .replace(PATH_PLACEHOLDER, &quote(&path.to_string_lossy()))
    }

    /// Render the command that evaluates `source`.
    pub fn query_command(&self, source: &str) -> String {
        match &self.wrap_template {
            Some(template) => template.replace(SOURCE_PLACEHOLDER, &quote(source)),
            None => source.to_string(),
        }
    }

    /// Whether `file_name` is a generated image, returning its number.
    pub fn image_index(&self, file_name: &str) -> Option<u64> {
        let stem = file_name
            .strip_prefix(self.image_prefix.as_str())?
            .strip_suffix(self.image_extension.as_str())?
            .strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        stem.parse().ok()
    }
}

/// Quote `value` as a double-quoted string literal.
///
/// JSON string syntax is accepted verbatim by Python and, for the paths we
/// generate, by POSIX shells.
fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cadence of the consumer loop.
    pub poll_interval_ms: u64,

    /// Cadence at which idle worker loops re-check their queue.
    pub worker_poll_interval_ms: u64,

    /// Engine used for code cells.
    pub engine: EngineConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            worker_poll_interval_ms: 50,
            engine: EngineConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Consumer loop cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Worker loop cadence.
    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

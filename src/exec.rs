//! Subprocess helpers
//!
//! `exec` splits a command line on single spaces and runs it without a
//! shell, capturing stdout, stderr and their interleaving. `run_inherit`
//! streams straight to the terminal.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use tracing::{debug, error};

const TARGET: &str = "ops_toolkit::exec";

/// Lines kept at each end when printing long output
const DUMP_EDGE_LINES: usize = 5;

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr in arrival order
    pub output: String,
}

/// Exec errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("empty command")]
    Empty,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("command exited with {status}")]
    Failed {
        status: ExitStatus,
        result: ExecResult,
    },

    #[error("{command} exited with {status}")]
    Exit { command: String, status: ExitStatus },
}

impl ExecError {
    /// Output captured before the failure, if any
    pub fn result(&self) -> Option<&ExecResult> {
        match self {
            Self::Failed { result, .. } => Some(result),
            _ => None,
        }
    }
}

pub struct StartContext<'a> {
    pub cmd: &'a str,
    pub options: &'a ExecOptions,
}

pub struct FinishContext<'a> {
    pub cmd: &'a str,
    pub options: &'a ExecOptions,
    pub result: &'a ExecResult,
    pub error: Option<&'a ExecError>,
    pub elapsed: std::time::Duration,
}

/// Runs before the process is spawned
#[derive(Clone, Default)]
pub enum StartHook {
    #[default]
    Log,
    Silent,
    Custom(Arc<dyn Fn(&StartContext<'_>) + Send + Sync>),
}

/// Runs after the process exits (or fails to start)
#[derive(Clone, Default)]
pub enum FinishHook {
    #[default]
    ErrorLog,
    /// Log the failure and exit the process with status 1
    FatalLog,
    Silent,
    Custom(Arc<dyn Fn(&FinishContext<'_>) + Send + Sync>),
}

impl fmt::Debug for StartHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("Log"),
            Self::Silent => f.write_str("Silent"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl fmt::Debug for FinishHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorLog => f.write_str("ErrorLog"),
            Self::FatalLog => f.write_str("FatalLog"),
            Self::Silent => f.write_str("Silent"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl StartHook {
    pub fn custom(f: impl Fn(&StartContext<'_>) + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn run(&self, ctx: &StartContext<'_>) {
        match self {
            Self::Log => {
                debug!(target: TARGET, cwd = ?ctx.options.cwd, command = ctx.cmd, "run command");
            }
            Self::Silent => {}
            Self::Custom(f) => f(ctx),
        }
    }
}

impl FinishHook {
    pub fn custom(f: impl Fn(&FinishContext<'_>) + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn run(&self, ctx: &FinishContext<'_>) {
        match self {
            Self::ErrorLog => {
                if let Some(err) = ctx.error {
                    error!(target: TARGET, error = %err, cwd = ?ctx.options.cwd, command = ctx.cmd, "failed to run command");
                }
            }
            Self::FatalLog => {
                if let Some(err) = ctx.error {
                    error!(target: TARGET, error = %err, cwd = ?ctx.options.cwd, command = ctx.cmd, "failed to run command");
                    std::process::exit(1);
                }
            }
            Self::Silent => {}
            Self::Custom(f) => f(ctx),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory; inherits the caller's when unset
    pub cwd: Option<PathBuf>,
    /// Added on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Write output to a temp file and print it after the run
    pub dump_output: bool,
    pub on_start: StartHook,
    pub on_finish: FinishHook,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Run in the directory containing the current executable
    pub fn in_exe_dir(self) -> Result<Self, ExecError> {
        Ok(self.cwd(exe_dir()?))
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dump_output(mut self, dump: bool) -> Self {
        self.dump_output = dump;
        self
    }

    pub fn on_start(mut self, hook: StartHook) -> Self {
        self.on_start = hook;
        self
    }

    pub fn on_finish(mut self, hook: FinishHook) -> Self {
        self.on_finish = hook;
        self
    }
}

/// Run `cmd`, capturing its output.
///
/// The command line is split on single spaces; quoting, pipes and other
/// shell syntax are not interpreted. On a non-zero exit the captured output
/// is carried in [`ExecError::Failed`].
pub fn exec(cmd: &str, options: &ExecOptions) -> Result<ExecResult, ExecError> {
    let started = Instant::now();
    let (result, error) = match run_captured(cmd, options) {
        Ok((status, result)) if status.success() => (result, None),
        Ok((status, result)) => (
            result.clone(),
            Some(ExecError::Failed { status, result }),
        ),
        Err(err) => (ExecResult::default(), Some(err)),
    };

    if options.dump_output {
        if let Err(e) = dump_output(&result) {
            error!(target: TARGET, error = %e, "failed to dump command output");
        }
    }

    options.on_finish.run(&FinishContext {
        cmd,
        options,
        result: &result,
        error: error.as_ref(),
        elapsed: started.elapsed(),
    });

    match error {
        Some(err) => Err(err),
        None => Ok(result),
    }
}

fn run_captured(cmd: &str, options: &ExecOptions) -> Result<(ExitStatus, ExecResult), ExecError> {
    let mut parts = cmd.split(' ');
    let program = parts.next().filter(|p| !p.is_empty()).ok_or(ExecError::Empty)?;

    let mut command = Command::new(program);
    command
        .args(parts)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &options.cwd {
        command.current_dir(cwd);
    }

    options.on_start.run(&StartContext { cmd, options });

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let combined = Mutex::new(Vec::new());
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr) = thread::scope(|scope| {
        let combined = &combined;
        let out = scope.spawn(move || pump(stdout, combined));
        let err = scope.spawn(move || pump(stderr, combined));
        (join_reader(out), join_reader(err))
    });

    let status = child.wait()?;
    let combined = combined.into_inner().unwrap_or_else(PoisonError::into_inner);

    Ok((
        status,
        ExecResult {
            stdout: String::from_utf8_lossy(&stdout?).into_owned(),
            stderr: String::from_utf8_lossy(&stderr?).into_owned(),
            output: String::from_utf8_lossy(&combined).into_owned(),
        },
    ))
}

fn pump<R: Read>(reader: Option<R>, combined: &Mutex<Vec<u8>>) -> io::Result<Vec<u8>> {
    let mut own = Vec::new();
    let Some(mut reader) = reader else {
        return Ok(own);
    };

    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        own.extend_from_slice(&buf[..n]);
        combined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&buf[..n]);
    }
    Ok(own)
}

fn join_reader(handle: thread::ScopedJoinHandle<'_, io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "output reader panicked")))
}

/// Save combined output to a `*.output.txt` temp file and print it
pub fn dump_output(result: &ExecResult) -> io::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .suffix(".output.txt")
        .tempfile()?;
    file.write_all(result.output.as_bytes())?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    debug!(target: TARGET, file = %path.display(), "output dumped to file");

    println!("{}", abbreviate(&result.output, DUMP_EDGE_LINES));
    Ok(path)
}

/// First and last `edge` lines joined by `...` when longer than `2 * edge`
pub fn abbreviate(output: &str, edge: usize) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() <= 2 * edge {
        return output.to_string();
    }

    let mut kept = Vec::with_capacity(2 * edge + 1);
    kept.extend_from_slice(&lines[..edge]);
    kept.push("...");
    kept.extend_from_slice(&lines[lines.len() - edge..]);
    kept.join("\n")
}

/// Run `program` with inherited stdio in `cwd` (default: current dir)
pub fn run_inherit<I, S>(cwd: Option<&Path>, program: &str, args: I) -> Result<(), ExecError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let cwd = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
    let command_line = std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");

    debug!(target: TARGET, cwd = %cwd.display(), command = %command_line, "run command");

    let status = Command::new(program)
        .args(&args)
        .current_dir(&cwd)
        .status()
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !status.success() {
        error!(target: TARGET, cwd = %cwd.display(), command = %command_line, %status, "failed to run command");
        return Err(ExecError::Exit {
            command: command_line,
            status,
        });
    }

    debug!(target: TARGET, cwd = %cwd.display(), command = %command_line, "run command done");
    Ok(())
}

/// Directory containing the running executable
pub fn exe_dir() -> Result<PathBuf, ExecError> {
    let exe = std::env::current_exe()?;
    exe.parent().map(Path::to_path_buf).ok_or_else(|| {
        ExecError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            "executable has no parent directory",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet() -> ExecOptions {
        ExecOptions::new()
            .on_start(StartHook::Silent)
            .on_finish(FinishHook::Silent)
    }

    #[test]
    fn test_empty_command() {
        let err = exec("", &quiet()).unwrap_err();
        assert!(matches!(err, ExecError::Empty));
    }

    #[test]
    fn test_missing_program() {
        let err = exec("definitely-not-a-real-binary-42", &quiet()).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[test]
    fn test_abbreviate() {
        let short = "a\nb\nc";
        assert_eq!(abbreviate(short, 5), short);

        let long: Vec<String> = (1..=12).map(|i| i.to_string()).collect();
        let out = abbreviate(&long.join("\n"), 5);
        assert_eq!(out, "1\n2\n3\n4\n5\n...\n8\n9\n10\n11\n12");
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let result = exec("echo hello world", &quiet()).unwrap();
        assert_eq!(result.stdout, "hello world\n");
        assert_eq!(result.output, "hello world\n");
        assert!(result.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_keeps_stderr() {
        let err = exec("ls /definitely/not/a/dir", &quiet()).unwrap_err();

        let result = err.result().expect("failed run carries output");
        assert!(!result.stderr.is_empty());
        assert_eq!(result.output, result.stderr);
        assert!(matches!(err, ExecError::Failed { status, .. } if !status.success()));
    }

    #[cfg(unix)]
    #[test]
    fn test_env_and_cwd() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();

        let result = exec("ls", &quiet().cwd(dir.path())).unwrap();
        assert_eq!(result.stdout.trim(), "marker.txt");

        let result = exec("printenv OPS_TOOLKIT_TEST", &quiet().env("OPS_TOOLKIT_TEST", "bar")).unwrap();
        assert_eq!(result.stdout.trim(), "bar");
    }

    #[cfg(unix)]
    #[test]
    fn test_custom_hooks_run_once() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let options = {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            ExecOptions::new()
                .on_start(StartHook::custom(move |ctx| {
                    assert_eq!(ctx.cmd, "true");
                    started.fetch_add(1, Ordering::SeqCst);
                }))
                .on_finish(FinishHook::custom(move |ctx| {
                    assert!(ctx.error.is_none());
                    finished.fetch_add(1, Ordering::SeqCst);
                }))
        };

        exec("true", &options).unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_finish_hook_sees_failure() {
        let seen = Arc::new(AtomicUsize::new(0));
        let hook_seen = Arc::clone(&seen);
        let options = quiet().on_finish(FinishHook::custom(move |ctx| {
            if ctx.error.is_some() {
                hook_seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert!(exec("false", &options).is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_dump_output_writes_file() {
        let result = ExecResult {
            output: "line one\nline two\n".to_string(),
            ..Default::default()
        };

        let path = dump_output(&result).unwrap();

        assert!(path.to_string_lossy().ends_with(".output.txt"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), result.output);
        std::fs::remove_file(path).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_run_inherit() {
        run_inherit(None, "true", Vec::<String>::new()).unwrap();

        let err = run_inherit(None, "false", Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, ExecError::Exit { .. }));
    }

    #[test]
    fn test_exe_dir_exists() {
        assert!(exe_dir().unwrap().is_dir());
    }
}

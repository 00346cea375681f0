//! Compute-kernel boundary.
//!
//! A kernel is opaque, blocking code that knows nothing about tasks. It only
//! sees [`KernelCallbacks`], closures bound to one task's execution context
//! when the task starts.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{CallbackError, KernelError};
use crate::worker::ExecutionContext;

type ProgressFn = Box<dyn Fn(i64) -> Result<(), CallbackError> + Send + Sync>;
type SaveFileFn = Box<dyn Fn(&str, &[u8]) -> Result<(), CallbackError> + Send + Sync>;

/// Progress and save-file hooks handed to a kernel.
pub struct KernelCallbacks {
    report_progress: ProgressFn,
    save_file: SaveFileFn,
}

impl KernelCallbacks {
    pub fn new<P, S>(report_progress: P, save_file: S) -> Self
    where
        P: Fn(i64) -> Result<(), CallbackError> + Send + Sync + 'static,
        S: Fn(&str, &[u8]) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self {
            report_progress: Box::new(report_progress),
            save_file: Box::new(save_file),
        }
    }

    /// Bind both callbacks to `ctx`. The kernel calls them from a blocking
    /// thread; each call is driven to completion on `handle`.
    pub fn bind(ctx: ExecutionContext, handle: Handle) -> Self {
        let progress_ctx = ctx.clone();
        let progress_handle = handle.clone();
        Self::new(
            move |percent| progress_handle.block_on(progress_ctx.report_progress(percent)),
            move |name, content| handle.block_on(ctx.persist_artifact(name, content)),
        )
    }

    pub fn report_progress(&self, percent: i64) -> Result<(), CallbackError> {
        (self.report_progress)(percent)
    }

    pub fn save_file(&self, name: &str, content: &[u8]) -> Result<(), CallbackError> {
        (self.save_file)(name, content)
    }
}

/// A blocking computation: input bytes in, output bytes out.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, input: Vec<u8>, callbacks: &KernelCallbacks) -> Result<Vec<u8>, KernelError>;
}

type KernelFn = Box<dyn Fn(Vec<u8>, &KernelCallbacks) -> Result<Vec<u8>, KernelError> + Send + Sync>;

/// Kernel built from a closure.
pub struct FnKernel {
    name: String,
    f: KernelFn,
}

impl FnKernel {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<u8>, &KernelCallbacks) -> Result<Vec<u8>, KernelError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl Kernel for FnKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, input: Vec<u8>, callbacks: &KernelCallbacks) -> Result<Vec<u8>, KernelError> {
        (self.f)(input, callbacks)
    }
}

/// Stderr lines kept for the error message of a failed run.
const STDERR_TAIL: usize = 20;

/// Runs an external executable as the kernel.
///
/// The input is written to the child's stdin and its stdout is the output.
/// The child talks back through stderr:
/// - `PROGRESS <n>` reports progress,
/// - `SAVE <name> <path>` persists the file at `path` as artifact `name`.
///
/// Any other stderr line is logged at debug level.
pub struct CommandKernel {
    program: String,
    args: Vec<String>,
}

impl CommandKernel {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn handle_stderr_line(&self, line: &str, callbacks: &KernelCallbacks) -> bool {
        if let Some(value) = line.strip_prefix("PROGRESS ") {
            match value.trim().parse::<i64>() {
                Ok(percent) => {
                    if let Err(e) = callbacks.report_progress(percent) {
                        warn!(program = %self.program, error = %e, "Progress callback failed");
                    }
                }
                Err(_) => warn!(program = %self.program, line, "Unparseable progress line"),
            }
            return true;
        }

        if let Some(rest) = line.strip_prefix("SAVE ") {
            let Some((name, path)) = rest.trim().split_once(' ') else {
                warn!(program = %self.program, line, "Unparseable save line");
                return true;
            };
            match std::fs::read(Path::new(path.trim())) {
                Ok(content) => {
                    if let Err(e) = callbacks.save_file(name, &content) {
                        warn!(program = %self.program, name, error = %e, "Save callback failed");
                    }
                }
                Err(e) => warn!(program = %self.program, path, error = %e, "Failed to read saved file"),
            }
            return true;
        }

        false
    }
}

impl Kernel for CommandKernel {
    fn name(&self) -> &str {
        &self.program
    }

    fn execute(&self, input: Vec<u8>, callbacks: &KernelCallbacks) -> Result<Vec<u8>, KernelError> {
        info!(program = %self.program, args = ?self.args, "Launching kernel");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| KernelError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let missing = |stream: &str| KernelError::Failed(format!("child {stream} not captured"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let writer = thread::spawn(move || stdin.write_all(&input));
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).map(|_| out)
        });

        let mut tail: Vec<String> = Vec::new();
        for line in BufReader::new(stderr).lines() {
            let line = line?;
            if self.handle_stderr_line(&line, callbacks) {
                continue;
            }
            debug!(program = %self.program, "{line}");
            if tail.len() == STDERR_TAIL {
                tail.remove(0);
            }
            tail.push(line);
        }

        let status = child.wait()?;
        let joined = |what: &str| KernelError::Failed(format!("{what} thread panicked"));
        let written = writer.join().map_err(|_| joined("stdin"))?;
        let output = reader.join().map_err(|_| joined("stdout"))??;

        if !status.success() {
            return Err(KernelError::Exit {
                status: status.to_string(),
                stderr: tail.join("\n"),
            });
        }
        // A child may legitimately stop reading before consuming all input.
        if let Err(e) = written {
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(KernelError::Io(e));
            }
        }

        info!(program = %self.program, bytes = output.len(), "Kernel finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn recording() -> (KernelCallbacks, Arc<Mutex<Vec<i64>>>, Arc<Mutex<Vec<(String, Vec<u8>)>>>) {
        let progress = Arc::new(Mutex::new(Vec::new()));
        let saved = Arc::new(Mutex::new(Vec::new()));
        let (p, s) = (progress.clone(), saved.clone());
        let callbacks = KernelCallbacks::new(
            move |percent| {
                p.lock().push(percent);
                Ok(())
            },
            move |name, content| {
                s.lock().push((name.to_string(), content.to_vec()));
                Ok(())
            },
        );
        (callbacks, progress, saved)
    }

    #[test]
    fn fn_kernel_sees_callbacks() {
        let (callbacks, progress, _) = recording();
        let kernel = FnKernel::new("double", |input, cb| {
            cb.report_progress(50)?;
            Ok([input.clone(), input].concat())
        });
        let out = kernel.execute(b"ab".to_vec(), &callbacks);
        assert_eq!(out.unwrap(), b"abab");
        assert_eq!(*progress.lock(), vec![50]);
    }

    #[cfg(unix)]
    #[test]
    fn command_kernel_pipes_input_and_progress() {
        let (callbacks, progress, _) = recording();
        let kernel = CommandKernel::new("sh")
            .arg("-c")
            .arg("echo 'PROGRESS 10' >&2; cat; echo 'PROGRESS 90' >&2");
        let out = kernel.execute(b"{\"data\":1}".to_vec(), &callbacks).unwrap();
        assert_eq!(out, b"{\"data\":1}");
        assert_eq!(*progress.lock(), vec![10, 90]);
    }

    #[cfg(unix)]
    #[test]
    fn command_kernel_save_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("partial.json");
        std::fs::write(&file, b"[1,2]").unwrap();

        let (callbacks, _, saved) = recording();
        let script = format!("echo 'SAVE partial.json {}' >&2", file.display());
        let kernel = CommandKernel::new("sh").arg("-c").arg(script);
        kernel.execute(Vec::new(), &callbacks).unwrap();

        assert_eq!(
            *saved.lock(),
            vec![("partial.json".to_string(), b"[1,2]".to_vec())]
        );
    }

    #[cfg(unix)]
    #[test]
    fn command_kernel_nonzero_exit() {
        let (callbacks, _, _) = recording();
        let kernel = CommandKernel::new("sh").arg("-c").arg("echo bad input >&2; exit 3");
        let err = kernel.execute(Vec::new(), &callbacks).unwrap_err();
        match err {
            KernelError::Exit { stderr, .. } => assert_eq!(stderr, "bad input"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn command_kernel_missing_program() {
        let (callbacks, _, _) = recording();
        let kernel = CommandKernel::new("definitely-not-a-real-kernel-binary");
        assert!(matches!(
            kernel.execute(Vec::new(), &callbacks),
            Err(KernelError::Launch { .. })
        ));
    }
}

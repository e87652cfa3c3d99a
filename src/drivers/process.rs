//! Child-process plumbing shared by the CLI drivers

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::adapters::{ConnectParams, DriverError};
use crate::transform::ByteStream;

/// Extracts an engine error code from a client's stderr
pub(crate) type CodeOf = fn(&str) -> String;

/// Path of a client program, honouring the target's `bin_dir` option
pub(crate) fn program(params: &ConnectParams, name: &str) -> PathBuf {
    match params.options.get("bin_dir") {
        Some(dir) => Path::new(dir).join(name),
        None => PathBuf::from(name),
    }
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

fn spawn_failed(program: &str, err: io::Error) -> DriverError {
    DriverError::new("spawn", format!("could not run {}: {}", program, err))
}

fn failure(program: &str, status: ExitStatus, stderr: &str, code_of: CodeOf) -> DriverError {
    let stderr = stderr.trim();
    let message = if stderr.is_empty() {
        format!("{} exited with {}", program, status)
    } else {
        // The last lines carry the actual error; earlier ones are warnings
        let lines: Vec<&str> = stderr.lines().collect();
        lines[lines.len().saturating_sub(3)..].join(" | ")
    };
    DriverError::new(code_of(stderr), message)
}

fn drain(mut stderr: ChildStderr) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Run a command to completion and return its stdout
pub(crate) fn capture(mut cmd: Command, code_of: CodeOf) -> Result<String, DriverError> {
    let program = program_name(&cmd);
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_failed(&program, e))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(failure(
            &program,
            output.status,
            &String::from_utf8_lossy(&output.stderr),
            code_of,
        ))
    }
}

/// Stdout of a running client as a stream
///
/// The exit status is checked at end of stream, so a client that dies
/// halfway fails the read instead of producing a truncated dump.
pub(crate) struct ChildReader {
    program: String,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    code_of: CodeOf,
    finished: bool,
}

impl ChildReader {
    pub(crate) fn spawn(mut cmd: Command, code_of: CodeOf) -> Result<Self, DriverError> {
        let program = program_name(&cmd);
        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(&program, e))?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DriverError::new("spawn", format!("{} has no stdout", program)));
            }
        };
        let stderr = child.stderr.take().map(drain);
        debug!(program = %program, "client started");
        Ok(Self {
            program,
            child,
            stdout,
            stderr,
            code_of,
            finished: false,
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = join(self.stderr.take());
        if status.success() {
            Ok(())
        } else {
            Err(failure(&self.program, status, &stderr, self.code_of).into_io())
        }
    }
}

impl Read for ChildReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return Ok(0);
        }
        let n = self.stdout.read(buf)?;
        if n == 0 {
            self.finish()?;
        }
        Ok(n)
    }
}

impl Drop for ChildReader {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Stream `input` into a client's stdin and wait for it to exit
///
/// If reading `input` fails the client is killed before it sees end of
/// input, so it never commits a truncated load.
pub(crate) fn feed(mut cmd: Command, mut input: ByteStream, code_of: CodeOf) -> Result<(), DriverError> {
    let program = program_name(&cmd);
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_failed(&program, e))?;
    let stderr = child.stderr.take().map(drain);

    let copied = match child.stdin.take() {
        Some(mut stdin) => io::copy(&mut input, &mut stdin),
        None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "no stdin")),
    };

    if let Err(e) = &copied {
        if e.kind() != io::ErrorKind::BrokenPipe {
            let _ = child.kill();
            let _ = child.wait();
            let _ = join(stderr);
            return Err(DriverError::new(
                "io",
                format!("failed to stream into {}: {}", program, e),
            ));
        }
    }

    let status = child.wait().map_err(|e| spawn_failed(&program, e))?;
    let stderr = join(stderr);
    if !status.success() {
        return Err(failure(&program, status, &stderr, code_of));
    }
    if let Err(e) = copied {
        return Err(DriverError::new(
            "io",
            format!("{} stopped reading its input: {}", program, e),
        ));
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn code_of(stderr: &str) -> String {
        if stderr.contains("boom") {
            "42".into()
        } else {
            "unknown".into()
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_child_reader_streams_stdout() {
        let mut reader = ChildReader::spawn(sh("printf 'hello'"), code_of).unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_child_reader_fails_on_exit_status() {
        let mut reader = ChildReader::spawn(sh("printf 'part'; echo boom >&2; exit 3"), code_of).unwrap();
        let err = reader.read_to_end(&mut Vec::new()).unwrap_err();
        let driver = DriverError::from_io(&err).unwrap();
        assert_eq!(driver.code, "42");
        assert!(driver.message.contains("boom"));
    }

    #[test]
    fn test_feed_and_capture() {
        feed(sh("cat > /dev/null"), Box::new(Cursor::new(vec![7u8; 100_000])), code_of).unwrap();
        assert_eq!(capture(sh("echo 1"), code_of).unwrap().trim(), "1");

        let err = feed(sh("echo boom >&2; exit 1"), Box::new(Cursor::new(Vec::new())), code_of)
            .unwrap_err();
        assert_eq!(err.code, "42");
    }

    #[test]
    fn test_missing_program() {
        let err = capture(Command::new("/nonexistent/client"), code_of).unwrap_err();
        assert_eq!(err.code, "spawn");
    }
}

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long output is still collected after the backend exited.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Shared flag a caller flips to stop a running backend.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(text) | OutputLine::Stderr(text) => text,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, OutputLine::Stderr(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug)]
pub enum ProcessError {
    Spawn(io::Error),
    Wait(io::Error),
    Cancelled,
    TimedOut(Duration),
}

/// Run `cmd` to completion, handing each output line to `on_line` as it
/// arrives. The child is killed and reaped on timeout or cancellation.
pub fn run_streaming<F>(
    mut cmd: Command,
    timeout: Duration,
    cancel: &CancelToken,
    mut on_line: F,
) -> Result<ProcessOutcome, ProcessError>
where
    F: FnMut(&OutputLine),
{
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(ProcessError::Spawn)?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(out) = child.stdout.take() {
        readers.push(spawn_reader(out, tx.clone(), OutputLine::Stdout));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(spawn_reader(err, tx.clone(), OutputLine::Stderr));
    }
    drop(tx);

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut streams_open = true;
    let mut exited: Option<(ExitStatus, Instant)> = None;

    let mut record = |line: OutputLine, stdout: &mut String, stderr: &mut String| {
        let sink = if line.is_stderr() { stderr } else { stdout };
        sink.push_str(line.text());
        sink.push('\n');
        on_line(&line);
    };

    let status: ExitStatus = loop {
        if streams_open {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => record(line, &mut stdout, &mut stderr),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => streams_open = false,
            }
        } else if exited.is_none() {
            std::thread::sleep(POLL_INTERVAL);
        }

        if exited.is_none() {
            match child.try_wait() {
                Ok(Some(status)) => exited = Some((status, Instant::now())),
                Ok(None) => {}
                Err(e) => {
                    terminate(&mut child);
                    return Err(ProcessError::Wait(e));
                }
            }
        }

        // A background process of the backend may keep the pipes open after
        // the backend itself exited.
        if let Some((status, at)) = exited {
            if !streams_open || at.elapsed() >= EXIT_GRACE {
                break status;
            }
            continue;
        }

        if cancel.is_cancelled() {
            terminate(&mut child);
            return Err(ProcessError::Cancelled);
        }
        if start.elapsed() > timeout {
            terminate(&mut child);
            return Err(ProcessError::TimedOut(timeout));
        }
    };

    if streams_open {
        for line in rx.try_iter() {
            record(line, &mut stdout, &mut stderr);
        }
    } else {
        for reader in readers {
            let _ = reader.join();
        }
    }

    Ok(ProcessOutcome {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait(); // reap
}

fn spawn_reader<R>(
    source: R,
    tx: Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(wrap(line)).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// Last non-empty lines of `text`, for error summaries.
pub(crate) fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(count);
    lines[skip..].join("\n")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_both_channels_in_order() {
        let mut seen = Vec::new();
        let outcome = run_streaming(
            sh("echo one; echo two; echo oops 1>&2; exit 3"),
            Duration::from_secs(10),
            &CancelToken::new(),
            |line| seen.push(line.clone()),
        )
        .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.success());
        assert_eq!(outcome.stdout, "one\ntwo\n");
        assert_eq!(outcome.stderr, "oops\n");
        let stdout: Vec<_> = seen.iter().filter(|l| !l.is_stderr()).map(|l| l.text()).collect();
        assert_eq!(stdout, ["one", "two"]);
    }

    #[test]
    fn timeout_kills_the_child() {
        let started = Instant::now();
        let result = run_streaming(
            sh("sleep 30"),
            Duration::from_millis(200),
            &CancelToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(ProcessError::TimedOut(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn exit_is_seen_while_a_background_child_holds_stdout() {
        let started = Instant::now();
        let outcome = run_streaming(
            sh("sleep 10 & echo 'PLAY RECAP'; exit 0"),
            Duration::from_secs(5),
            &CancelToken::new(),
            |_| {},
        )
        .unwrap();
        assert!(outcome.success());
        assert_eq!(outcome.stdout, "PLAY RECAP\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn cancellation_stops_the_child() {
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });
        let result = run_streaming(sh("sleep 30"), Duration::from_secs(60), &cancel, |_| {});
        assert!(matches!(result, Err(ProcessError::Cancelled)));
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let cmd = Command::new("/nonexistent/provision-backend");
        let result = run_streaming(cmd, Duration::from_secs(1), &CancelToken::new(), |_| {});
        assert!(matches!(result, Err(ProcessError::Spawn(_))));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("", 3), "");
    }
}

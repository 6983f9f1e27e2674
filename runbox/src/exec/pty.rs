//! Pseudoterminal supervision loop.
//!
//! The loop runs synchronously on a dedicated worker: pty reads block and
//! the kill logic must not share a scheduler with socket code. Each tick
//! polls the master for output, drains queued input into the terminal,
//! checks the wall clock and the cancel flag, and reaps the child once it
//! exits.

use super::{CancelFlag, ExecPolicy, InputQueue, OutputCallback};
use commons::prelude_errors::*;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;

/// Fixed initial terminal window.
const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// Input entries forwarded per tick.
const INPUT_BURST: usize = 32;

/// Budget for draining the master after the child exited.
const DRAIN_DEADLINE: Duration = Duration::from_millis(200);

/// Outcome of one supervised run.
pub(crate) struct RunOutcome {
    pub exit_code: i32,
    pub elapsed: Duration,
    pub captured: Vec<u8>,
}

/// Run `cmd` attached to a fresh pty until exit, timeout, or cancellation.
pub(crate) fn supervise(
    mut cmd: Command,
    policy: &ExecPolicy,
    mut on_output: OutputCallback,
    mut input: InputQueue,
    cancel: CancelFlag,
) -> Fallible<RunOutcome> {
    let winsize = Winsize {
        ws_row: PTY_ROWS,
        ws_col: PTY_COLS,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(Some(&winsize), None).context("could not allocate a pty pair")?;

    cmd.stdin(Stdio::from(
        pty.slave.try_clone().context("could not clone pty slave")?,
    ));
    cmd.stdout(Stdio::from(
        pty.slave.try_clone().context("could not clone pty slave")?,
    ));
    cmd.stderr(Stdio::from(pty.slave));
    unsafe {
        cmd.pre_exec(|| {
            // New session: the child leads its own process group, so the
            // supervisor can kill the whole group at once.
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            // Adopt the pty as controlling terminal; stdin is the slave.
            if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let start = Instant::now();
    let mut child = cmd.spawn().context("could not spawn supervised command")?;

    // The slave handles were consumed by spawn; the parent keeps only the
    // master, switched to non-blocking for the poll loop.
    fcntl(
        pty.master.as_raw_fd(),
        FcntlArg::F_SETFL(OFlag::O_NONBLOCK),
    )
    .context("could not set pty master non-blocking")?;
    let mut master = File::from(pty.master);

    let mut captured: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; policy.pty_chunk_bytes.max(1)];
    let poll_ms = policy.pty_poll_interval.as_millis().min(1_000) as u16;
    let mut eof = false;
    let mut killed = false;

    let status = loop {
        if !eof {
            eof = !pump_output(&mut master, poll_ms, &mut chunk, &mut captured, &mut on_output)?;
        } else {
            std::thread::sleep(policy.pty_poll_interval);
        }

        forward_input(&mut master, &mut input);

        if !killed && (cancel.is_cancelled() || start.elapsed() >= policy.execution_timeout) {
            kill_group(&child, policy.kill_grace);
            killed = true;
        }

        if let Some(status) = child.try_wait().context("could not poll child status")? {
            break status;
        }
    };

    // The master may still buffer output written just before exit.
    let drain_deadline = Instant::now() + DRAIN_DEADLINE;
    while !eof && Instant::now() < drain_deadline {
        eof = !pump_output(&mut master, poll_ms, &mut chunk, &mut captured, &mut on_output)?;
    }

    let exit_code = if killed {
        crate::EXIT_CODE_KILLED
    } else {
        exit_code_of(status)
    };
    Ok(RunOutcome {
        exit_code,
        elapsed: start.elapsed(),
        captured,
    })
}

/// One poll-and-read cycle. Returns whether the master is still open.
fn pump_output(
    master: &mut File,
    poll_ms: u16,
    chunk: &mut [u8],
    captured: &mut Vec<u8>,
    on_output: &mut OutputCallback,
) -> Fallible<bool> {
    let ready = {
        let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
        match poll(&mut fds, PollTimeout::from(poll_ms)) {
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(e).context("could not poll pty master"),
        }
    };
    if ready == 0 {
        return Ok(true);
    }
    match master.read(chunk) {
        Ok(0) => Ok(false),
        Ok(n) => {
            captured.extend_from_slice(&chunk[..n]);
            on_output(&chunk[..n]);
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(true),
        // EIO from a pty master means the slave side is gone.
        Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(false),
        Err(e) => Err(e).context("could not read from pty master"),
    }
}

/// Drain up to a bounded number of input entries into the terminal.
fn forward_input(master: &mut File, input: &mut InputQueue) {
    for _ in 0..INPUT_BURST {
        match input.try_recv() {
            Ok(bytes) => {
                if let Err(err) = master.write_all(&bytes) {
                    // Keystroke-sized writes; a saturated terminal buffer
                    // drops the remainder of this burst.
                    if err.kind() != ErrorKind::WouldBlock {
                        warn!("could not forward input to pty: {}", err);
                    }
                    break;
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
}

/// Terminate the child's process group: SIGTERM, a grace pause, SIGKILL.
fn kill_group(child: &Child, grace: Duration) {
    let pgid = Pid::from_raw(child.id() as i32);
    if signal::killpg(pgid, Signal::SIGTERM).is_err() {
        // Group already gone.
        return;
    }
    std::thread::sleep(grace);
    let _ = signal::killpg(pgid, Signal::SIGKILL);
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|s| -s).unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EXIT_CODE_KILLED;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", script]);
        cmd
    }

    fn collector() -> (Arc<Mutex<Vec<u8>>>, OutputCallback) {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let callback: OutputCallback =
            Box::new(move |bytes: &[u8]| sink.lock().extend_from_slice(bytes));
        (collected, callback)
    }

    fn queue() -> (tokio::sync::mpsc::Sender<Vec<u8>>, InputQueue) {
        tokio::sync::mpsc::channel(crate::exec::INPUT_QUEUE_CAPACITY)
    }

    #[test]
    fn captures_output_and_exit_code() -> Fallible<()> {
        let policy = ExecPolicy::default();
        let (collected, callback) = collector();
        let (_tx, rx) = queue();

        let outcome = supervise(
            shell("echo hello; exit 3"),
            &policy,
            callback,
            rx,
            CancelFlag::new(),
        )?;

        assert_eq!(outcome.exit_code, 3);
        let streamed = collected.lock().clone();
        assert_eq!(streamed, outcome.captured);
        let text = String::from_utf8_lossy(&outcome.captured).into_owned();
        assert!(text.contains("hello"), "captured: {:?}", text);
        Ok(())
    }

    #[test]
    fn forwards_interactive_input() -> Fallible<()> {
        let policy = ExecPolicy::default();
        let (_collected, callback) = collector();
        let (tx, rx) = queue();

        // Queued before the child starts; the loop forwards it once the
        // shell is reading.
        tx.try_send(b"alice\n".to_vec())
            .map_err(|e| anyhow!("could not queue input: {}", e))?;

        let outcome = supervise(
            shell("read line; echo \"got:$line\""),
            &policy,
            callback,
            rx,
            CancelFlag::new(),
        )?;

        assert_eq!(outcome.exit_code, 0);
        let text = String::from_utf8_lossy(&outcome.captured).into_owned();
        assert!(text.contains("got:alice"), "captured: {:?}", text);
        Ok(())
    }

    #[test]
    fn wall_clock_breach_kills_the_group() -> Fallible<()> {
        let mut policy = ExecPolicy::default();
        policy.execution_timeout = Duration::from_millis(300);
        policy.kill_grace = Duration::from_millis(100);
        let (_collected, callback) = collector();
        let (_tx, rx) = queue();

        let started = Instant::now();
        let outcome = supervise(shell("sleep 30"), &policy, callback, rx, CancelFlag::new())?;

        assert_eq!(outcome.exit_code, EXIT_CODE_KILLED);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(outcome.elapsed >= Duration::from_millis(300));
        Ok(())
    }

    #[test]
    fn slow_writer_streams_until_the_wall_clock() -> Fallible<()> {
        let mut policy = ExecPolicy::default();
        policy.execution_timeout = Duration::from_millis(700);
        policy.kill_grace = Duration::from_millis(100);
        let (collected, callback) = collector();
        let (_tx, rx) = queue();

        let outcome = supervise(
            shell("while :; do printf x; sleep 0.2; done"),
            &policy,
            callback,
            rx,
            CancelFlag::new(),
        )?;

        // Output arrived while the program ran, and the breach still won.
        assert_eq!(outcome.exit_code, EXIT_CODE_KILLED);
        assert!(!collected.lock().is_empty());
        assert!(outcome.elapsed < Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn cancellation_kills_promptly() -> Fallible<()> {
        let mut policy = ExecPolicy::default();
        policy.kill_grace = Duration::from_millis(50);
        let (_collected, callback) = collector();
        let (_tx, rx) = queue();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let started = Instant::now();
        let outcome = supervise(shell("sleep 30"), &policy, callback, rx, cancel)?;

        assert_eq!(outcome.exit_code, EXIT_CODE_KILLED);
        assert!(started.elapsed() < Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn missing_binary_is_an_engine_error() {
        let policy = ExecPolicy::default();
        let (_collected, callback) = collector();
        let (_tx, rx) = queue();

        let result = supervise(
            Command::new("/nonexistent/runbox-wrapper"),
            &policy,
            callback,
            rx,
            CancelFlag::new(),
        );
        assert!(result.is_err());
    }
}

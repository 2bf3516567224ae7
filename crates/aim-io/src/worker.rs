//! Sandboxed runs in a separate worker process.
//!
//! The controller starts `aim worker ...` (or any command that plays a program
//! and writes telemetry JSON lines to its stdout), reads that stdout on a
//! [`TelemetryReader`] thread and forwards messages to its own consumer. A
//! worker that crashes or hangs takes only itself down.

use std::ffi::OsStr;
use std::io::BufReader;
use std::process::{Child, Command, ExitStatus, Stdio};

use aim_core::Message;
use crossbeam_channel::Sender;

use crate::telemetry::{ReaderExit, TelemetryReader};
use crate::{Error, Result};

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    /// Process exit status.
    pub status: ExitStatus,
    /// Why the telemetry reader stopped.
    pub telemetry: ReaderExit,
    /// True when the controller killed the process.
    pub killed: bool,
}

impl WorkerExit {
    /// True when the worker exited cleanly on its own and every telemetry
    /// line was understood.
    pub fn is_clean(&self) -> bool {
        !self.killed && self.status.success() && self.telemetry == ReaderExit::Eof
    }
}

/// A running worker process and its telemetry reader.
#[derive(Debug)]
pub struct Worker {
    child: Child,
    reader: Option<TelemetryReader>,
    reaped: bool,
}

impl Worker {
    /// Starts `program` with `args`, forwarding its telemetry to `tx`.
    ///
    /// The worker's stderr is inherited so its log output reaches the
    /// operator directly.
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I, tx: Sender<Message>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program.as_ref())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::Worker(format!("failed to start {:?}: {e}", program.as_ref())))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Worker("worker stdout was not captured".into()));
        };
        let reader = TelemetryReader::spawn(BufReader::new(stdout), tx)?;
        tracing::info!(pid = child.id(), "worker started");
        Ok(Self {
            child,
            reader: Some(reader),
            reaped: false,
        })
    }

    /// Operating-system process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// The exit status, if the process has ended.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self.child.try_wait()?;
        self.reaped |= status.is_some();
        Ok(status)
    }

    /// True once the telemetry reader has stopped.
    pub fn telemetry_finished(&self) -> bool {
        self.reader.as_ref().is_none_or(TelemetryReader::is_finished)
    }

    /// Waits for the worker to exit on its own.
    pub fn wait(mut self) -> Result<WorkerExit> {
        let status = self.child.wait()?;
        self.reaped = true;
        Ok(self.finish(status, false))
    }

    /// Kills the worker, then joins the telemetry reader.
    pub fn stop(mut self) -> Result<WorkerExit> {
        let killed = match self.child.try_wait()? {
            Some(_) => false,
            None => {
                self.child.kill()?;
                true
            }
        };
        let status = self.child.wait()?;
        self.reaped = true;
        tracing::info!(pid = self.child.id(), killed, %status, "worker stopped");
        Ok(self.finish(status, killed))
    }

    fn finish(&mut self, status: ExitStatus, killed: bool) -> WorkerExit {
        let telemetry = self.reader.take().map_or(ReaderExit::Eof, TelemetryReader::join);
        WorkerExit {
            status,
            telemetry,
            killed,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        if let Some(reader) = self.reader.take() {
            reader.join();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn telemetry_from_a_finished_worker() {
        let (tx, rx) = unbounded();
        let worker = Worker::spawn(
            "sh",
            ["-c", r#"echo '{"status":0}'; echo '{"status":0}'"#],
            tx,
        )
        .unwrap();
        let exit = worker.wait().unwrap();
        assert!(exit.is_clean());
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn malformed_line_ends_telemetry_but_not_the_worker() {
        let (tx, rx) = unbounded();
        let worker = Worker::spawn(
            "sh",
            ["-c", r#"echo '{"status":0}'; echo 'garbage'; echo '{"status":0}'; exit 0"#],
            tx,
        )
        .unwrap();
        let exit = worker.wait().unwrap();
        assert!(exit.status.success());
        assert!(matches!(exit.telemetry, ReaderExit::Malformed(_)));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn stop_kills_a_hanging_worker() {
        let (tx, _rx) = unbounded();
        let worker = Worker::spawn("sleep", ["30"], tx).unwrap();
        let exit = worker.stop().unwrap();
        assert!(exit.killed);
        assert!(!exit.status.success());
    }

    #[test]
    fn missing_program_is_a_worker_error() {
        let (tx, _rx) = unbounded();
        let err = Worker::spawn("/nonexistent/aim-worker", ["x"], tx).unwrap_err();
        assert!(matches!(err, Error::Worker(_)));
    }
}

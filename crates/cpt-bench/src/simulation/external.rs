use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use cpt_core::belief::BeliefPoint;
use cpt_policy::{MdpOracle, OracleError, PomdpOracle};
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

/// How to launch an external oracle process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOptions {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Bounds every reply; `None` waits forever.
    pub timeout_ms: Option<u64>,
}

/// A long-lived child process answering one JSON line per request line.
///
/// Every request, hooks included, is answered by exactly one line. Hook
/// replies may be `{}`; `choose` replies carry `"actions"`. A reply with an
/// `"error"` field fails the call.
pub struct ExternalOracle {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    replies: Receiver<std::io::Result<String>>,
    timeout_ms: Option<u64>,
    closed: bool,
    /// Set once a reply missed its deadline; a late reply would otherwise be
    /// read as the answer to the next request.
    desynced: bool,
}

impl ExternalOracle {
    pub fn spawn(name: impl Into<String>, options: &ExternalOptions) -> Result<Self, OracleError> {
        let name = name.into();
        if options.command.trim().is_empty() {
            return Err(OracleError::Unavailable(format!(
                "oracle '{name}' has no command configured"
            )));
        }

        let mut cmd = Command::new(&options.command);
        cmd.args(&options.args);
        if let Some(dir) = &options.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|err| {
            OracleError::Unavailable(format!(
                "failed to spawn '{}' for oracle '{name}': {err}",
                options.command
            ))
        })?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OracleError::Unavailable("child stdout was not captured".into()))?;

        let (tx, replies) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("oracle-{name}"))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(err) = reader {
            let _ = child.kill();
            let _ = child.wait();
            return Err(OracleError::Unavailable(format!(
                "failed to start reader for oracle '{name}': {err}"
            )));
        }

        event!(
            target: "cpt_bench::external",
            Level::INFO,
            oracle = %name,
            command = %options.command,
            pid = child.id(),
            "external oracle started"
        );

        Ok(Self {
            name,
            child,
            stdin,
            replies,
            timeout_ms: options.timeout_ms,
            closed: false,
            desynced: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn exchange(&mut self, request: &Request<'_>) -> Result<Reply, OracleError> {
        if self.closed {
            return Err(OracleError::Protocol(format!(
                "oracle '{}' is already closed",
                self.name
            )));
        }
        if self.desynced {
            return Err(OracleError::Protocol(format!(
                "oracle '{}' missed a reply deadline and is out of sync",
                self.name
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| OracleError::Unavailable("child stdin is closed".into()))?;

        let start = Instant::now();
        serde_json::to_writer(&mut *stdin, request)
            .map_err(|err| OracleError::Protocol(err.to_string()))?;
        stdin
            .write_all(b"\n")
            .and_then(|_| stdin.flush())
            .map_err(|err| OracleError::Unavailable(format!("writing request: {err}")))?;

        let line = match self.timeout_ms {
            Some(timeout_ms) => {
                match self
                    .replies
                    .recv_timeout(Duration::from_millis(timeout_ms))
                {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => {
                        self.desynced = true;
                        event!(
                            target: "cpt_bench::external",
                            Level::WARN,
                            oracle = %self.name,
                            request = request.kind(),
                            timeout_ms,
                            "external oracle timed out"
                        );
                        return Err(OracleError::Timeout { timeout_ms });
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(exited(&self.name)),
                }
            }
            None => self.replies.recv().map_err(|_| exited(&self.name))?,
        }
        .map_err(|err| OracleError::Unavailable(format!("reading reply: {err}")))?;

        event!(
            target: "cpt_bench::external",
            Level::DEBUG,
            oracle = %self.name,
            request = request.kind(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "external oracle replied"
        );

        let reply: Reply = serde_json::from_str(line.trim())
            .map_err(|err| OracleError::Malformed(format!("{err} in {line:?}")))?;
        if let Some(message) = reply.error {
            return Err(OracleError::Protocol(message));
        }
        Ok(reply)
    }

    fn choose(&mut self, request: &Request<'_>) -> Result<Vec<usize>, OracleError> {
        self.exchange(request)?
            .actions
            .ok_or_else(|| OracleError::Malformed("reply to choose carries no actions".into()))
    }

    fn shutdown(&mut self) -> Result<(), OracleError> {
        if self.closed {
            return Ok(());
        }
        // A desynced child cannot acknowledge reliably; it is killed instead.
        let acknowledged = if self.desynced {
            Ok(())
        } else {
            self.exchange(&Request::Close).map(|_| ())
        };
        self.closed = true;
        self.stdin = None;
        if self.desynced || acknowledged.is_err() {
            let _ = self.child.kill();
        }
        self.child
            .wait()
            .map_err(|err| OracleError::Unavailable(format!("waiting for child: {err}")))?;
        event!(
            target: "cpt_bench::external",
            Level::INFO,
            oracle = %self.name,
            "external oracle closed"
        );
        acknowledged
    }
}

impl Drop for ExternalOracle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn exited(name: &str) -> OracleError {
    OracleError::Unavailable(format!("oracle '{name}' exited without replying"))
}

impl MdpOracle for ExternalOracle {
    fn begin_simulation(&mut self, num_runs: usize) -> Result<(), OracleError> {
        self.exchange(&Request::StartSimulation { num_runs }).map(|_| ())
    }

    fn begin_trajectory(&mut self, run: usize) -> Result<(), OracleError> {
        self.exchange(&Request::BeginTrajectory { run }).map(|_| ())
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_state: &[usize],
    ) -> Result<Vec<usize>, OracleError> {
        self.choose(&Request::Choose {
            epoch,
            states: Some(joint_state),
            beliefs: None,
        })
    }

    fn close(&mut self) -> Result<(), OracleError> {
        self.shutdown()
    }
}

impl PomdpOracle for ExternalOracle {
    fn begin_simulation(&mut self, num_runs: usize) -> Result<(), OracleError> {
        self.exchange(&Request::StartSimulation { num_runs }).map(|_| ())
    }

    fn begin_trajectory(&mut self, run: usize) -> Result<(), OracleError> {
        self.exchange(&Request::BeginTrajectory { run }).map(|_| ())
    }

    fn choose_joint_action(
        &mut self,
        epoch: usize,
        joint_belief: &[BeliefPoint],
    ) -> Result<Vec<usize>, OracleError> {
        let beliefs = joint_belief.iter().map(BeliefPoint::probabilities).collect();
        self.choose(&Request::Choose {
            epoch,
            states: None,
            beliefs: Some(beliefs),
        })
    }

    fn report_outcome(
        &mut self,
        epoch: usize,
        actions: &[usize],
        observations: &[usize],
    ) -> Result<(), OracleError> {
        self.exchange(&Request::Report {
            epoch,
            actions,
            observations,
        })
        .map(|_| ())
    }

    fn close(&mut self) -> Result<(), OracleError> {
        self.shutdown()
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request<'a> {
    StartSimulation {
        num_runs: usize,
    },
    BeginTrajectory {
        run: usize,
    },
    Choose {
        epoch: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        states: Option<&'a [usize]>,
        #[serde(skip_serializing_if = "Option::is_none")]
        beliefs: Option<Vec<&'a [f64]>>,
    },
    Report {
        epoch: usize,
        actions: &'a [usize],
        observations: &'a [usize],
    },
    Close,
}

impl Request<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Request::StartSimulation { .. } => "start_simulation",
            Request::BeginTrajectory { .. } => "begin_trajectory",
            Request::Choose { .. } => "choose",
            Request::Report { .. } => "report",
            Request::Close => "close",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    actions: Option<Vec<usize>>,
    #[serde(default)]
    error: Option<String>,
}

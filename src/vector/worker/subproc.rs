use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::transport::{wait_ready, Connection};
use super::{ensure_open, EnvWorker, WorkerResult};
use crate::core::{Action, GymError, InfoValue, RenderFrame, Result};
use crate::spaces::{ActionSpace, SpaceSpec};

const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker whose environment lives in a child process speaking the frame protocol
/// on its stdin/stdout (see the `gymvec-worker` binary).
///
/// stderr is inherited so the child's logs show up alongside the parent's.
pub struct SubprocEnvWorker {
    child: Child,
    conn: Connection,
    action_space: ActionSpace,
    observation_space: SpaceSpec,
    close_grace: Duration,
    is_closed: bool,
    is_reset: bool,
}

impl SubprocEnvWorker {
    /// Spawn `command` and fetch the hosted environment's spaces.
    pub fn spawn(command: Command) -> Result<Self> { Self::spawn_with_timeout(command, DEFAULT_HANDSHAKE_TIMEOUT) }

    /// Like [`spawn`](Self::spawn), failing with `WorkerDied` if the child
    /// has not answered the spaces request within `handshake_timeout`.
    pub fn spawn_with_timeout(mut command: Command, handshake_timeout: Duration) -> Result<Self> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        let mut child = command.spawn()?;
        let pipes = child.stdin.take().zip(child.stdout.take());
        let Some((stdin, stdout)) = pipes else {
            reap(&mut child);
            return Err(GymError::WorkerDied("child process has no stdio pipes".into()));
        };
        let label = format!("subproc-{}", child.id());
        let spaces = Connection::new(label, stdout, Box::new(stdin)).and_then(|mut conn| {
            let spaces = conn.handshake(handshake_timeout)?;
            Ok((conn, spaces))
        });
        let (conn, (action, observation)) = match spaces {
            Ok(ready) => ready,
            Err(e) => {
                reap(&mut child);
                return Err(e);
            }
        };
        info!(pid = child.id(), "spawned environment worker");
        Ok(Self {
            child,
            conn,
            action_space: ActionSpace::new(action),
            observation_space: observation,
            close_grace: DEFAULT_CLOSE_GRACE,
            is_closed: false,
            is_reset: false,
        })
    }

    /// How long `close` waits for the child to acknowledge and exit before killing it.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn pid(&self) -> u32 { self.child.id() }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl EnvWorker for SubprocEnvWorker {
    fn get_env_attr(&mut self, key: &str) -> Result<InfoValue> {
        ensure_open(self.is_closed)?;
        self.conn.get_attr(key)
    }

    fn set_env_attr(&mut self, key: &str, value: InfoValue) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.conn.set_attr(key, value)
    }

    fn send_reset(&mut self, seed: Option<u64>) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.conn.send_reset(seed)
    }

    fn send_step(&mut self, action: Action) -> Result<()> {
        ensure_open(self.is_closed)?;
        self.conn.send_step(action)
    }

    fn recv(&mut self) -> Result<WorkerResult> {
        let result = self.conn.recv_result()?;
        if matches!(result, WorkerResult::Reset(..)) {
            self.is_reset = true;
        }
        Ok(result)
    }

    fn wait(workers: &[&Self], wait_num: usize, timeout: Option<Duration>) -> Vec<usize> {
        let inboxes: Vec<_> = workers.iter().map(|w| w.conn.inbox()).collect();
        wait_ready(&inboxes, wait_num, timeout)
    }

    fn action_space(&self) -> &ActionSpace { &self.action_space }

    fn action_space_mut(&mut self) -> &mut ActionSpace { &mut self.action_space }

    fn observation_space(&self) -> &SpaceSpec { &self.observation_space }

    fn render(&mut self) -> Result<Option<RenderFrame>> {
        ensure_open(self.is_closed)?;
        self.conn.render()
    }

    fn is_closed(&self) -> bool { self.is_closed }

    fn is_reset(&self) -> bool { self.is_reset }

    fn close(&mut self) -> Result<()> {
        if self.is_closed {
            return Ok(());
        }
        self.is_closed = true;
        let deadline = Instant::now() + self.close_grace;
        self.conn.shutdown(self.close_grace);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Ok(None) => {
                    warn!(worker = %self.conn.label(), "child did not exit in time, killing it");
                    reap(&mut self.child);
                    break;
                }
                Err(e) => {
                    reap(&mut self.child);
                    self.conn.join_reader();
                    return Err(e.into());
                }
            }
        }
        self.conn.join_reader();
        Ok(())
    }
}

impl Drop for SubprocEnvWorker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close subprocess worker");
        }
    }
}

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::protocol::serve;
use super::transport::{wait_ready, Connection};
use super::{ensure_open, EnvWorker, WorkerResult};
use crate::core::{Action, EnvDyn, GymError, InfoValue, RenderFrame, Result};
use crate::spaces::{ActionSpace, SpaceSpec};

const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Worker whose environment is hosted by a [`RemoteEnvServer`] reached over TCP.
pub struct RemoteEnvWorker {
    stream: TcpStream,
    conn: Connection,
    peer: SocketAddr,
    action_space: ActionSpace,
    observation_space: SpaceSpec,
    close_grace: Duration,
    is_closed: bool,
    is_reset: bool,
}

impl RemoteEnvWorker {
    /// Connect to a host, trying each resolved address in turn.
    ///
    /// `connect_timeout` bounds both the TCP connect and the host's answer to
    /// the spaces request.
    pub fn connect<A: ToSocketAddrs>(addr: A, connect_timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream, connect_timeout),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => e.into(),
            None => GymError::InvalidConfig("address resolved to nothing".into()),
        })
    }

    fn from_stream(stream: TcpStream, handshake_timeout: Duration) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let mut conn = Connection::new(format!("remote-{peer}"), stream.try_clone()?, Box::new(stream.try_clone()?))?;
        let (action, observation) = match conn.handshake(handshake_timeout) {
            Ok(spaces) => spaces,
            Err(e) => {
                let _ = stream.shutdown(Shutdown::Both);
                return Err(e);
            }
        };
        info!(%peer, "connected to environment host");
        Ok(Self {
            stream,
            conn,
            peer,
            action_space: ActionSpace::new(action),
            observation_space: observation,
            close_grace: DEFAULT_CLOSE_GRACE,
            is_closed: false,
            is_reset: false,
        })
    }

    /// How long `close` waits for the host to acknowledge before dropping the socket.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    pub fn peer_addr(&self) -> SocketAddr { self.peer }
}

impl EnvWorker for RemoteEnvWorker {
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
        self.conn.shutdown(self.close_grace);
        // Unblocks the reader thread even if the host never answered.
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(peer = %self.peer, error = %e, "socket already shut down");
        }
        self.conn.join_reader();
        Ok(())
    }
}

impl Drop for RemoteEnvWorker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close remote worker");
        }
    }
}

type HostFactory = Arc<dyn Fn() -> Result<Box<dyn EnvDyn>> + Send + Sync>;

/// Accepts connections and hosts one fresh environment per connection.
pub struct RemoteEnvServer {
    listener: TcpListener,
    factory: HostFactory,
}

impl RemoteEnvServer {
    pub fn bind<A, F>(addr: A, factory: F) -> Result<Self>
    where
        A: ToSocketAddrs,
        F: Fn() -> Result<Box<dyn EnvDyn>> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "environment host listening");
        Ok(Self { listener, factory: Arc::new(factory) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> { Ok(self.listener.local_addr()?) }

    /// Accept connections forever, serving each on its own thread.
    pub fn serve_forever(self) -> Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let factory = Arc::clone(&self.factory);
            std::thread::Builder::new().name("gymvec-host".into()).spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(e) = host_connection(stream, factory.as_ref()) {
                    warn!(?peer, error = %e, "connection ended with error");
                }
            })?;
        }
        Ok(())
    }

    /// Run [`serve_forever`](Self::serve_forever) on a background thread.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        std::thread::spawn(move || self.serve_forever())
    }
}

fn host_connection(stream: TcpStream, factory: &(dyn Fn() -> Result<Box<dyn EnvDyn>> + Send + Sync)) -> Result<()> {
    stream.set_nodelay(true)?;
    let peer = stream.peer_addr()?;
    debug!(%peer, "hosting environment for new connection");
    let mut env = factory()?;
    let reader = BufReader::new(stream.try_clone()?);
    serve(env.as_mut(), reader, stream)
}

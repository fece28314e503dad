//! # Summary
//!
//! Builders for the two kinds of process. Each builder carries sensible
//! defaults, so the binaries and the tests only override what they need.

use std::io;
use std::marker;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::internal;
use crate::message::Role;
use crate::state::State;
use crate::thread::client::Client;
use crate::thread::coordinator::Coordinator;
use crate::thread::node::{Handle, Node};

pub const DEFAULT_COORDINATOR_PORT: u16 = 1235;
pub const DEFAULT_NODE_PORT: u16 = 2022;
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10000);
pub const DEFAULT_IDLE: Duration = Duration::from_millis(10000);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(3000);
pub const DEFAULT_ATTEMPTS: usize = 5;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Copy, Clone, Debug)]
pub struct CoordinatorConfig {
    /// Interface to listen on
    host: IpAddr,

    /// Port for incoming participants
    port: u16,

    /// Bound on a single round
    timeout: Duration,

    /// Longest a participant may stay silent
    idle: Duration,
}

impl CoordinatorConfig {
    pub fn new(port: u16) -> Self {
        CoordinatorConfig {
            host: LOCALHOST,
            port,
            timeout: DEFAULT_ROUND_TIMEOUT,
            idle: DEFAULT_IDLE,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub async fn bind(self) -> io::Result<Coordinator> {
        let listener = TcpListener::bind((self.host, self.port)).await?;
        info!("coordinator listening on {}", listener.local_addr()?);
        Ok(Coordinator::new(listener, self.timeout, self.idle))
    }

    pub async fn run(self) -> io::Result<()> {
        self.bind().await?.run().await;
        Ok(())
    }
}

#[derive(Derivative)]
#[derivative(Copy(bound = ""), Clone(bound = ""), Debug(bound = ""))]
pub struct NodeConfig<S> {
    /// Node ID, embedded in every proposal ID this node issues
    id: u32,

    /// Coordinator to connect to
    coordinator: SocketAddr,

    /// Interface for client requests
    host: IpAddr,

    /// Port for client requests
    port: u16,

    /// Role announced on connect
    role: Role,

    /// Bound on a single client request, retries included
    timeout: Duration,

    /// Interval between PINGs
    heartbeat: Duration,

    /// Rounds a request may lose before giving up
    attempts: usize,

    #[derivative(Debug = "ignore")]
    _marker: marker::PhantomData<S>,
}

impl<S: State> NodeConfig<S> {
    pub fn new(coordinator: SocketAddr, port: u16) -> Self {
        NodeConfig {
            id: rand::random(),
            coordinator,
            host: LOCALHOST,
            port,
            role: Role::Acceptor,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat: DEFAULT_HEARTBEAT,
            attempts: DEFAULT_ATTEMPTS,
            _marker: Default::default(),
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = std::cmp::max(heartbeat, Duration::from_millis(1));
        self
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = std::cmp::max(attempts, 1);
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Connects to the coordinator, opens the client port, and spawns
    /// both tasks onto the current runtime.
    pub async fn spawn(self) -> io::Result<Running> {
        let stream = TcpStream::connect(self.coordinator).await?;
        let listener = TcpListener::bind((self.host, self.port)).await?;
        let addr = listener.local_addr()?;

        let (requests, requests_tx) = internal::new();
        let handle = Handle::new(requests_tx);
        let node = Node::<S>::connect(&self, stream, requests)
            .await
            .map_err(|error| io::Error::new(io::ErrorKind::ConnectionAborted, error))?;

        info!("node {} serving clients on {}", self.id, addr);
        tokio::spawn(node.run());
        tokio::spawn(Client::new(listener, handle.clone()).run());
        Ok(Running { addr, handle })
    }
}

/// A spawned node.
#[derive(Clone, Debug)]
pub struct Running {
    addr: SocketAddr,
    handle: Handle,
}

impl Running {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

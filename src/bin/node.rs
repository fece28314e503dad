use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use structopt::StructOpt;
use tokio::net::{lookup_host, ToSocketAddrs};

use paxos_kv::{logger, NodeConfig, Role, Store};

#[derive(StructOpt)]
#[structopt(name = "paxos-node")]
struct Opt {
    /// Host to serve client requests on
    host: String,

    /// Port to serve client requests on
    port: u16,

    /// Role code: 1 proposer, 2 acceptor, 3 learner
    role: Option<u8>,

    /// Coordinator address
    #[structopt(short = "c", long = "coordinator", default_value = "127.0.0.1:1235")]
    coordinator: String,

    /// Node ID used in proposal IDs (random if omitted)
    #[structopt(short = "i", long = "id")]
    id: Option<u32>,

    /// Request timeout (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "10000")]
    timeout: u64,

    /// Heartbeat interval (in milliseconds)
    #[structopt(long = "heartbeat", default_value = "3000")]
    heartbeat: u64,

    /// Rounds a request may lose before it fails
    #[structopt(short = "a", long = "attempts", default_value = "5")]
    attempts: usize,

    /// Log verbosity; repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbosity: u8,
}

async fn resolve<A: ToSocketAddrs>(addr: A) -> io::Result<SocketAddr> {
    lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address did not resolve"))
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let opt = Opt::from_args();
    if let Err(error) = logger::init(opt.verbosity) {
        eprintln!("failed to install logger: {}", error);
    }

    let role = match opt.role {
    | None => Role::Acceptor,
    | Some(code) => Role::from_code(code).unwrap_or_else(|| {
        log::warn!("invalid role {}, defaulting to {}", code, Role::Acceptor);
        Role::Acceptor
    }),
    };

    let coordinator = resolve(opt.coordinator.as_str()).await?;
    let local = resolve((opt.host.as_str(), opt.port)).await?;

    let mut config = NodeConfig::<Store>::new(coordinator, local.port())
        .with_host(local.ip())
        .with_role(role)
        .with_timeout(Duration::from_millis(opt.timeout))
        .with_heartbeat(Duration::from_millis(opt.heartbeat))
        .with_attempts(opt.attempts);

    if let Some(id) = opt.id {
        config = config.with_id(id);
    }

    let running = config.spawn().await?;
    println!("node {} serving clients on {}", config.id(), running.local_addr());
    tokio::signal::ctrl_c().await
}

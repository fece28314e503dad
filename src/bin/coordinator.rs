use std::net::IpAddr;
use std::time::Duration;

use structopt::StructOpt;

use paxos_kv::{logger, CoordinatorConfig};

#[derive(StructOpt)]
#[structopt(name = "paxos-coordinator")]
struct Opt {
    /// Interface to listen on
    #[structopt(long = "host", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on for participants
    #[structopt(short = "p", long = "port", default_value = "1235")]
    port: u16,

    /// Round timeout (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "5000")]
    timeout: u64,

    /// Drop participants silent for this long (in milliseconds)
    #[structopt(short = "i", long = "idle", default_value = "10000")]
    idle: u64,

    /// Log verbosity; repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let opt = Opt::from_args();
    if let Err(error) = logger::init(opt.verbosity) {
        eprintln!("failed to install logger: {}", error);
    }

    CoordinatorConfig::new(opt.port)
        .with_host(opt.host)
        .with_timeout(Duration::from_millis(opt.timeout))
        .with_idle(Duration::from_millis(opt.idle))
        .run()
        .await
}

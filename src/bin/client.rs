use std::time::Duration;

use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use paxos_kv::{logger, Client, Command};

/// Records written before the shell starts.
const SAMPLES: [(i32, f32); 6] = [
    (1000, 3.86),
    (1001, 2.98),
    (1002, 1.70),
    (1003, 1.22),
    (1004, 2.60),
    (1005, 3.27),
];

#[derive(StructOpt)]
#[structopt(name = "paxos-client")]
struct Opt {
    /// Node host
    #[structopt(default_value = "127.0.0.1")]
    host: String,

    /// Node client port
    #[structopt(default_value = "2022")]
    port: u16,

    /// Pass `no` to skip writing the sample records
    #[structopt(default_value = "yes")]
    autofill: String,

    /// Pause between sample records (in milliseconds)
    #[structopt(long = "pause", default_value = "3000")]
    pause: u64,

    /// Log verbosity; repeat for more
    #[structopt(short = "v", parse(from_occurrences))]
    verbosity: u8,
}

fn timestamp() -> String {
    chrono::Local::now().format("[%H:%M:%S%.3f] ").to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();
    if let Err(error) = logger::init(opt.verbosity) {
        eprintln!("failed to install logger: {}", error);
    }

    let mut client = Client::connect((opt.host.as_str(), opt.port)).await?;
    println!("Type \"exit\" to stop the client");

    if !opt.autofill.eq_ignore_ascii_case("no") {
        for (index, (key, value)) in SAMPLES.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(opt.pause)).await;
            }
            match client.put(*key, *value).await {
            | Ok(response) => println!("{}{}", timestamp(), response),
            | Err(error) => println!("{}failed to put {}: {}", timestamp(), key, error),
            }
        }
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(format!("{}Enter text: ", timestamp()).as_bytes()).await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
        | Some(line) => line,
        | None => return Ok(()),
        };

        let operation = match line.parse::<Command>() {
        | Ok(Command::Exit) => return Ok(()),
        | Ok(Command::Run(operation)) => operation,
        | Err(error) => {
            println!("{}{}", timestamp(), error);
            continue
        }
        };

        match client.execute(operation).await {
        | Ok(response) => println!("{}{}", timestamp(), response),
        | Err(error) => println!("{}{} failed: {}", timestamp(), operation, error),
        }
    }
}

//! Hosts one registered environment and speaks the worker protocol.
//!
//! Without `--listen` the protocol runs on stdin/stdout, which is how
//! `SubprocEnvWorker` drives it. With `--listen ADDR` every accepted TCP
//! connection gets its own environment (`RemoteEnvWorker`). Logs go to stderr.

use std::io;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gymvec::registry::{make, registered_ids, KwArgs};
use gymvec::vector::worker::{serve, RemoteEnvServer};
use gymvec::{GymError, Result};

#[derive(Parser, Debug)]
#[command(name = "gymvec-worker", about = "Host a gymvec environment over stdio or TCP")]
struct Args {
    /// Registered environment id
    #[arg(long, default_value = "CartPole-v1")]
    env: String,

    /// Serve over TCP on this address instead of stdio
    #[arg(long)]
    listen: Option<String>,

    /// Constructor argument, repeatable (e.g. --kwarg seed=3)
    #[arg(long = "kwarg", value_parser = parse_kwarg)]
    kwargs: Vec<(String, String)>,

    /// Print the registered environment ids and exit
    #[arg(long)]
    list: bool,
}

fn parse_kwarg(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,gymvec=info"));
    // stdout carries the protocol.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(true).try_init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if args.list {
        for id in registered_ids() {
            println!("{id}");
        }
        return Ok(());
    }

    let kwargs: KwArgs = args.kwargs.into_iter().collect();
    let id = args.env;
    // Fail fast on a bad id or kwargs before serving anything.
    drop(make(&id, &kwargs)?);

    match args.listen {
        Some(addr) => {
            let server = RemoteEnvServer::bind(addr.as_str(), move || make(&id, &kwargs))?;
            info!(addr = %server.local_addr()?, "serving over tcp");
            server.serve_forever()
        }
        None => {
            let mut env = make(&id, &kwargs)?;
            info!(env = %id, pid = std::process::id(), "serving over stdio");
            let stdin = io::stdin().lock();
            let stdout = io::stdout().lock();
            serve(env.as_mut(), stdin, stdout).map_err(|e| match e {
                GymError::Io(err) if err.kind() == io::ErrorKind::BrokenPipe => GymError::WorkerDied("parent went away".into()),
                other => other,
            })
        }
    }
}

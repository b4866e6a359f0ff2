// A small demo binary for `drift-engine`: runs a toy program against either
// a standalone (no-transport) peer or a networked one, so the engine's
// recording/commit/replay path can be exercised by hand rather than only
// from unit tests.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use drift_engine::Peer;
use drift_toy::{MutableString, Sink, ToyInterpreter};
use drift_wire::{CommittedValue, PeerId};

/// Which toy program to run.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Program {
    /// Creates a `Sink` and calls `print("Hello, world.")` on it.
    ToyHello,
    /// Creates a `MutableString` seeded with "0" and appends to it once.
    ToyCounter,
}

#[derive(Parser)]
#[command(author, version, about = "Runs a toy program against a drift-engine peer")]
struct Args {
    /// Which demo program to run.
    #[arg(long, value_enum)]
    program: Program,

    /// Local address to bind the peer's listener to. Omit to run a
    /// standalone peer with no network transport at all.
    #[arg(long)]
    listen: Option<String>,

    /// Port to bind the peer's listener to; required with `--listen`.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// A known peer to dial immediately after binding, as `address:port`.
    #[arg(long)]
    connect: Option<String>,

    /// Number of transport worker threads to report to the connection
    /// table (each connection still gets its own dedicated reader/writer
    /// pair regardless of this budget).
    #[arg(long, default_value_t = 4)]
    transport_threads: usize,

    /// Keep the recording thread alive after the program method returns,
    /// awaiting a possible rewind from a later peer rejection.
    #[arg(long, default_value_t = false)]
    linger: bool,
}

fn main() -> drift_base::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let interpreter = Arc::new(ToyInterpreter);

    let peer = match &args.listen {
        Some(address) => {
            let known_peer_id = args
                .connect
                .as_deref()
                .map(|addr_port| PeerId::parse(format!("ip/{addr_port}")))
                .transpose()?;
            Peer::create_network_peer(
                interpreter,
                "drift-toy",
                address,
                args.port,
                known_peer_id,
                args.transport_threads,
                false,
            )?
        }
        None => Peer::create_standalone_peer(interpreter, 1),
    };

    let result = match args.program {
        Program::ToyHello => peer.run_program(
            Box::new(Sink::new()),
            "print",
            args.linger,
        ),
        Program::ToyCounter => {
            let object = MutableString::new("0");
            peer.run_program(Box::new(object), "append", args.linger)
        }
    };

    info!(target: "drift", "program returned {result:?}");
    match result {
        CommittedValue::Empty => println!("(no return value)"),
        other => println!("{other:?}"),
    }

    peer.stop();
    Ok(())
}

use std::net::SocketAddr;

use clap::Parser;
use log::info;

use stcp::engine::{Engine, Outcome};
use stcp::facade::udp::UdpFacade;
use stcp::facade::Iss;

/// Passive-open STCP echo server.
#[derive(Parser, Debug)]
struct Args {
    /// Local address to listen on.
    #[arg(long, default_value = "127.0.0.1:9090")]
    bind: SocketAddr,

    /// The single peer this server accepts segments from.
    #[arg(long)]
    peer: SocketAddr,

    /// Use the fixed debug initial sequence number (1) instead of a
    /// random one, for reproducible traces.
    #[arg(long)]
    debug_iss: bool,

    /// Probability (0.0-1.0) of dropping an outbound segment, beyond
    /// whatever UDP itself does.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Probability (0.0-1.0) of reordering an outbound segment with the
    /// one sent right after it.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
}

fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut facade = UdpFacade::bind(args.bind, args.peer)?.with_conditions(args.loss, args.reorder);
    let iss = if args.debug_iss { Iss::fixed_for_debug() } else { Iss::random() };
    let mut engine = Engine::listen_with_iss(iss);

    info!("listening on {} for peer {}", args.bind, args.peer);
    loop {
        let outcome = engine.poll(&mut facade);
        match outcome {
            Outcome::Established => info!("connection established"),
            Outcome::PeerClosed => info!("peer closed its write half"),
            Outcome::Done => {
                info!("connection closed");
                break;
            }
            Outcome::ConnectionRefused => {
                info!("connection refused");
                break;
            }
            Outcome::Noop => {}
        }

        let echoed = facade.take_incoming();
        if !echoed.is_empty() {
            facade.queue_outgoing(&echoed);
        }
    }

    Ok(())
}

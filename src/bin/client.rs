use std::io::Read;
use std::net::SocketAddr;

use clap::Parser;
use log::info;

use stcp::engine::{Engine, Outcome};
use stcp::facade::udp::UdpFacade;
use stcp::facade::Iss;

/// Active-open STCP client: reads stdin and sends it to a server,
/// echoing back whatever the server sends.
#[derive(Parser, Debug)]
struct Args {
    /// Local address to bind to.
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// The server to connect to.
    #[arg(long)]
    peer: SocketAddr,

    /// Use the fixed debug initial sequence number (1) instead of a
    /// random one, for reproducible traces.
    #[arg(long)]
    debug_iss: bool,

    /// Probability (0.0-1.0) of dropping an outbound segment.
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
    let mut engine = Engine::connect_with_iss(&mut facade, iss);

    info!("connecting to {}", args.peer);

    let mut stdin_buf = [0u8; 4096];
    loop {
        let outcome = engine.poll(&mut facade);
        match outcome {
            Outcome::Established => info!("connection established"),
            Outcome::PeerClosed => info!("peer closed its write half"),
            Outcome::ConnectionRefused => {
                info!("connection refused");
                break;
            }
            Outcome::Done => {
                info!("connection closed");
                break;
            }
            Outcome::Noop => {}
        }

        if engine.state() == stcp::State::Established {
            if let Ok(n) = std::io::stdin().read(&mut stdin_buf) {
                if n > 0 {
                    facade.queue_outgoing(&stdin_buf[..n]);
                }
            }
        }

        let incoming = facade.take_incoming();
        if !incoming.is_empty() {
            print!("{}", String::from_utf8_lossy(&incoming));
        }
    }

    Ok(())
}

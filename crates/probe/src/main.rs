mod tick;

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use synapse::{
    ClientConfig, ClientIdentity, ClientState, ControlEvent, PeerRoute, RoomId, SynapseClient,
};
use tick::FixedTimestep;

const PING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "synapse-probe")]
#[command(about = "Drives a peer session against a signaling server")]
struct Args {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = synapse::DEFAULT_CONTROL_PORT)]
    control_port: u16,

    #[arg(long, default_value_t = synapse::DEFAULT_PUNCH_PORT)]
    punch_port: u16,

    #[arg(long, default_value_t = synapse::DEFAULT_RELAY_PORT)]
    relay_port: u16,

    #[arg(long, help = "Use wss:// for the control link")]
    secure: bool,

    #[arg(long, help = "Route session traffic through the relay")]
    relay: bool,

    #[arg(long, help = "Fixed client id (decimal)")]
    client_id: Option<ClientIdentity>,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, help = "Stop after this many seconds")]
    duration: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a room and wait for a peer
    Create,
    /// Join an existing room
    Join { room_id: RoomId },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ClientConfig::new(args.host.clone())
        .with_ports(args.control_port, args.punch_port, args.relay_port)
        .with_secure(args.secure)
        .with_route(if args.relay {
            PeerRoute::Relay
        } else {
            PeerRoute::Direct
        });
    if let Some(identity) = args.client_id {
        config = config.with_identity(identity);
    }

    let mut client = SynapseClient::new(config).context("failed to set up client")?;
    log::info!(
        "Client {} bound to {:?}",
        client.identity(),
        client.local_addr()
    );

    match args.command {
        Command::Create => client.create_room().context("create_room failed")?,
        Command::Join { room_id } => client
            .join_room(room_id)
            .with_context(|| format!("join_room {} failed", room_id))?,
    }

    let deadline = args.duration.map(|s| Instant::now() + Duration::from_secs(s));
    run(&mut client, args.tick_rate, deadline)?;

    if let Some(stats) = client.stats() {
        log::info!(
            "Sent {} packets ({} bytes), received {} packets ({} bytes)",
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received
        );
    }
    client.dispose();
    Ok(())
}

fn run(client: &mut SynapseClient, tick_rate: u32, deadline: Option<Instant>) -> Result<()> {
    let mut timestep = FixedTimestep::new(tick_rate);
    let mut last_frame = Instant::now();
    let mut last_ping: Option<Instant> = None;
    let mut sequence: u32 = 0;

    loop {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            log::info!("Duration elapsed in state {}", client.state());
            return Ok(());
        }

        timestep.accumulate(now - last_frame);
        last_frame = now;

        while timestep.consume_tick() {
            tick(client, &mut last_ping, &mut sequence)?;
        }

        thread::sleep(timestep.remaining());
    }
}

fn tick(client: &mut SynapseClient, last_ping: &mut Option<Instant>, sequence: &mut u32) -> Result<()> {
    for event in client.poll_events().context("control link failed")? {
        match event {
            ControlEvent::RoomCreated(room_id) => log::info!("Room {} created", room_id),
            ControlEvent::YouAre(handle) => log::info!("Assigned handle {}", handle),
            ControlEvent::PeerJoined(handle) => log::info!("Peer {} joined", handle),
            ControlEvent::PeerLeft(handle) => log::info!("Peer {} left", handle),
        }
    }

    match client.state() {
        ClientState::MatchmakingReady => {
            if !client.is_resolving() {
                client.begin_resolve()?;
            }
            if let Some(peer) = client.poll_peer_endpoint().context("peer resolution failed")? {
                log::info!("Peer endpoint resolved to {}", peer);
            }
        }
        ClientState::Connected => {
            let Some(dest) = client.session_endpoint() else {
                return Ok(());
            };

            if last_ping.is_none_or(|t| t.elapsed() >= PING_INTERVAL) {
                *sequence += 1;
                client.send_to(format!("ping {}", sequence).as_bytes(), dest)?;
                *last_ping = Some(Instant::now());
            }

            for (from, payload) in client.receive_all()? {
                log::info!("{} bytes from {}: {}", payload.len(), from, String::from_utf8_lossy(&payload));
            }
        }
        _ => {}
    }

    Ok(())
}

//! Entry point for the `rover` binary.
//!
//! Parses CLI arguments, discovers the local interface address, binds the
//! advertisement and transport sockets and runs one rover until Ctrl-C.  All
//! protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, files).

use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use rover_mesh::addr::{self, RoverId};
use rover_mesh::config::{
    NodeConfig, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_SOURCE_PORT,
    DEFAULT_TRANSPORT_PORT,
};
use rover_mesh::node::{Links, Rover};
use rover_mesh::socket::Socket;
use rover_mesh::transport;

/// Distance-vector routing and reliable file transfer between rovers.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Identifier of this rover; its private address is 10.0.<id>.0.
    #[arg(short = 'r', long)]
    rover_id: RoverId,

    /// Local port advertisements are sent from.
    #[arg(short, long, default_value_t = DEFAULT_SOURCE_PORT)]
    source_port: u16,

    /// Port of the advertisement multicast group.
    #[arg(short, long, default_value_t = DEFAULT_MULTICAST_PORT)]
    multicast_port: u16,

    #[arg(short = 'i', long, default_value_t = DEFAULT_MULTICAST_GROUP)]
    multicast_ip: Ipv4Addr,

    /// Port transport packets are exchanged on.
    #[arg(short = 'u', long, default_value_t = DEFAULT_TRANSPORT_PORT)]
    udp_port: u16,

    /// Private address of the rover to send `--file-name` to.
    #[arg(short, long, requires = "file_name")]
    destination_ip: Option<Ipv4Addr>,

    /// File to send to `--destination-ip`.
    #[arg(short, long, requires = "destination_ip")]
    file_name: Option<PathBuf>,

    /// Directory received files are written to.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Interface address to announce; discovered when omitted.
    #[arg(short, long)]
    local_ip: Option<Ipv4Addr>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let local_addr = match cli.local_ip {
        Some(ip) => ip,
        None => discover_local_ip().await?,
    };

    let mut config = NodeConfig::new(cli.rover_id, local_addr);
    config.multicast_group = cli.multicast_ip;
    config.multicast_port = cli.multicast_port;
    config.source_port = cli.source_port;
    config.transport_port = cli.udp_port;
    config.validate()?;

    let transfer = match (cli.destination_ip, cli.file_name) {
        (Some(ip), Some(path)) => match addr::rover_id(ip) {
            Some(id) => Some((id, path)),
            None => bail!("{ip} is not a rover address (expected 10.0.<id>.0)"),
        },
        _ => None,
    };

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("creating {}", cli.output_dir.display()))?;

    let links = Links {
        advert_tx: Socket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.source_port))
            .await
            .context("binding advertisement source port")?,
        advert_rx: Socket::bind_multicast(config.multicast_group, config.multicast_port)
            .await
            .context("joining advertisement group")?,
        transport: Socket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.transport_port))
            .await
            .context("binding transport port")?,
    };

    log::info!(
        "rover {} at {} (private {})",
        config.rover_id,
        config.local_addr,
        config.private_addr()
    );
    let rover = Arc::new(Rover::spawn(config, links, transport::file_sinks(cli.output_dir))?);

    if let Some((destination, path)) = transfer {
        let rover = Arc::clone(&rover);
        tokio::spawn(async move {
            if let Err(e) = send_file(&rover, destination, &path).await {
                log::error!("sending {} to rover {destination} failed: {e:#}", path.display());
            }
        });
    }

    loop {
        tokio::select! {
            delivery = rover.next_delivery() => match delivery {
                Some(d) => log::info!("stored {} bytes from {}", d.bytes, d.from),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("interrupted, shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn send_file(rover: &Rover<Socket>, destination: RoverId, path: &Path) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let report = rover.send_stream(destination, Cursor::new(data)).await?;
    log::info!(
        "delivered {} ({} bytes, {} packets, {} retransmissions) to rover {destination}",
        path.display(),
        report.bytes,
        report.packets,
        report.retransmissions
    );
    Ok(())
}

/// Address of the interface the default route leaves through.
///
/// Connecting a UDP socket sends nothing; it only makes the OS pick a source
/// address.
async fn discover_local_ip() -> Result<Ipv4Addr> {
    let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect("8.8.8.8:80")
        .await
        .context("no route to discover the local address; pass --local-ip")?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => bail!("discovered IPv6 address {addr}"),
    }
}

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use crossbeam_channel::{Receiver, select};
use tracing::{debug, info};

use drop2p_core::{Client, DirectConnector, Progress, SessionConfig};

const DEFAULT_LISTEN: &str = "0.0.0.0:9470";

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drop2p=info,drop2p_core=info".into()),
        )
        .init();

    // Config
    let config = SessionConfig::from_env()?;
    let room = std::env::var("DROP2P_ROOM").unwrap_or_else(|_| "default".into());
    let connector = connector_from_env()?;
    let files: Vec<String> = std::env::args().skip(1).collect();

    info!(
        room = %room,
        output_dir = %config.output_dir.display(),
        queued = files.len(),
        "starting drop2p peer"
    );

    let (send_tx, send_rx) = crossbeam_channel::bounded::<Progress>(256);
    let (recv_tx, recv_rx) = crossbeam_channel::bounded::<Progress>(256);

    let client = Client::builder(connector)
        .config(config)
        .send_progress(send_tx)
        .recv_progress(recv_tx)
        .build();
    client.enqueue_files(files);
    client
        .start(&room)
        .with_context(|| format!("failed to join room {}", room))?;

    report_until_disconnected(&client, &send_rx, &recv_rx);

    info!(
        sent = client.files_sent(),
        received = client.files_received(),
        unsent = client.pending_files().len(),
        "session ended"
    );
    Ok(())
}

/// `DROP2P_CONNECT` dials a peer; otherwise listen on `DROP2P_LISTEN`.
fn connector_from_env() -> anyhow::Result<DirectConnector> {
    let connect = std::env::var("DROP2P_CONNECT").ok();
    let listen = std::env::var("DROP2P_LISTEN").ok();

    match (connect, listen) {
        (Some(_), Some(_)) => bail!("set only one of DROP2P_CONNECT and DROP2P_LISTEN"),
        (Some(addr), None) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid DROP2P_CONNECT address {:?}", addr))?;
            Ok(DirectConnector::dial(addr))
        }
        (None, listen) => {
            let addr = listen.unwrap_or_else(|| DEFAULT_LISTEN.into());
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid DROP2P_LISTEN address {:?}", addr))?;
            Ok(DirectConnector::listen(addr))
        }
    }
}

fn report_until_disconnected(client: &Client, sent: &Receiver<Progress>, received: &Receiver<Progress>) {
    while client.is_connected() {
        select! {
            recv(sent) -> msg => {
                if let Ok(p) = msg {
                    report("sent", &p);
                }
            }
            recv(received) -> msg => {
                if let Ok(p) = msg {
                    report("received", &p);
                }
            }
            default(Duration::from_secs(1)) => {}
        }
    }
}

fn report(verb: &str, p: &Progress) {
    if p.is_complete() {
        info!(file = %p.file, bytes = p.file_size, pending = p.pending_files, "{} file", verb);
    } else {
        debug!(
            file = %p.file,
            "{} {}/{} bytes ({:.0}%)",
            verb,
            p.processed_bytes,
            p.file_size,
            p.fraction() * 100.0
        );
    }
}

//! TCP endpoints. Both speak newline-delimited UTF-8.
//!
//! Ingestion: one request per line, answered with the ack token before the
//! publication is queued. Publish: frames fan out to every subscriber whose
//! prefix filter matches. Subscribers manage their filter by sending
//! `+<prefix>` or `-<prefix>` lines; any other line subscribes as a whole.
//!
//! Each serve loop owns its connection tasks, so stopping the loop closes
//! every connection it accepted.

use super::Shared;
use crate::subscription::SubscriptionFilter;
use crate::ClientId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Ingest duty: accept clients and serve their requests
pub(super) async fn serve_ingest(listener: TcpListener, shared: Arc<Shared>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted publisher {}", peer);
                    connections.spawn(handle_publisher(stream, peer, Arc::clone(&shared)));
                }
                Err(e) => warn!("Failed to accept publisher: {}", e),
            },
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn handle_publisher(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    let ack = format!("{}\n", shared.config.ack_rep);
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let limit = shared.config.max_request_len as u64;

    loop {
        line.clear();
        let mut request_reader = (&mut reader).take(limit.saturating_add(1));
        match request_reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) if !line.ends_with(b"\n") && line.len() as u64 > limit => {
                warn!(
                    "Dropping publisher {}: request exceeds {} bytes",
                    peer, shared.config.max_request_len
                );
                break;
            }
            Ok(_) => {
                let request = String::from_utf8_lossy(strip_line_ending(&line));
                if let Err(e) = writer.write_all(ack.as_bytes()).await {
                    debug!("Failed to acknowledge {}: {}", peer, e);
                    break;
                }
                shared.ingest(&request);
            }
            Err(e) => {
                warn!("Failed to read from publisher {}: {}", peer, e);
                break;
            }
        }
    }
    debug!("Publisher {} disconnected", peer);
}

/// Publish endpoint: accept subscribers and feed them matching frames
pub(super) async fn serve_publish(listener: TcpListener, frames: broadcast::Sender<Arc<str>>) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(handle_subscriber(stream, peer, frames.subscribe()));
                }
                Err(e) => warn!("Failed to accept subscriber: {}", e),
            },
            Some(_) = connections.join_next() => {}
        }
    }
}

async fn handle_subscriber(
    stream: TcpStream,
    peer: SocketAddr,
    mut frames: broadcast::Receiver<Arc<str>>,
) {
    let client_id = ClientId::new();
    info!("Subscriber {} connected from {}", client_id.as_str(), peer);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut filter = SubscriptionFilter::new();
    let mut line = Vec::new();

    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut line) => match read {
                Ok(0) => break,
                Ok(_) => {
                    let command = String::from_utf8_lossy(strip_line_ending(&line)).into_owned();
                    line.clear();
                    apply_subscription(&mut filter, &command);
                    debug!("Subscriber {} filter is now {}", client_id.as_str(), filter);
                }
                Err(e) => {
                    warn!("Failed to read from subscriber {}: {}", client_id.as_str(), e);
                    break;
                }
            },
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if !filter.matches(&frame) {
                        continue;
                    }
                    let mut out = String::with_capacity(frame.len() + 1);
                    out.push_str(&frame);
                    out.push('\n');
                    if let Err(e) = writer.write_all(out.as_bytes()).await {
                        debug!("Failed to deliver to subscriber {}: {}", client_id.as_str(), e);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber {} lagged, {} frames dropped", client_id.as_str(), skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    info!("Subscriber {} disconnected", client_id.as_str());
}

fn apply_subscription(filter: &mut SubscriptionFilter, command: &str) {
    if let Some(prefix) = command.strip_prefix('-') {
        filter.unsubscribe(prefix);
    } else {
        filter.subscribe(command.strip_prefix('+').unwrap_or(command));
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

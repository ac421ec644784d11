//! Server network layer: TCP accept loop and the per-connection tasks.
//!
//! Each accepted socket is split in two. The read half is owned by a
//! [`Connection`] running on the accepting task; the write half is owned by a
//! writer task that drains the session's outbound queue. A third task sends
//! keep-alive pings until the session closes.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use protocol::Packet;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};

use crate::connection::Connection;
use crate::event::Event;
use crate::server::Server;
use crate::session::{Outbound, Session};

/// How long a client may keep the socket from draining before it is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts connections until the listener fails for good.
pub async fn accept_loop(server: Arc<Server>, listener: &TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let outcome = server.fire(&Event::Connect { addr });
                if outcome.is_cancelled() {
                    debug!("Connection from {} refused by a handler", addr);
                    continue;
                }
                tokio::spawn(handle_connection(Arc::clone(&server), stream, addr));
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Runs one client from accept to teardown.
pub async fn handle_connection(server: Arc<Server>, stream: TcpStream, addr: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    let (reader, writer) = stream.into_split();

    let id = server.clients().next_session_id();
    let (session, outbound) = Session::new(id, addr, server.config().reach_distance);
    server.clients().add_session(Arc::clone(&session));
    info!("Session {} connected from {}", id, addr);

    tokio::spawn(run_writer(Arc::clone(&session), writer, outbound));
    tokio::spawn(run_keepalive(
        Arc::clone(&session),
        server.config().keepalive_interval(),
    ));

    Connection::new(server, session, reader).run().await;
}

/// Writes queued packets to the socket in batches.
pub async fn run_writer<W>(
    session: Arc<Session>,
    writer: W,
    mut outbound: mpsc::Receiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    let mut closed = session.closed_signal();
    'outer: loop {
        // Everything queued before the close is still written.
        let item = tokio::select! {
            biased;
            item = outbound.recv() => item,
            _ = wait_until_set(&mut closed) => None,
        };
        let Some(item) = item else {
            break;
        };
        let mut next = Some(item);
        while let Some(item) = next.take() {
            match item {
                Outbound::Data(bytes) => {
                    if let Err(e) = with_deadline(writer.write_all(&bytes)).await {
                        debug!("Write to session {} failed: {}", session.id(), e);
                        session.close();
                        return;
                    }
                }
                Outbound::Close => break 'outer,
            }
            next = outbound.try_recv().ok();
        }
        if let Err(e) = with_deadline(writer.flush()).await {
            debug!("Flush to session {} failed: {}", session.id(), e);
            session.close();
            return;
        }
    }

    if let Err(e) = with_deadline(writer.flush()).await {
        debug!("Final flush to session {} failed: {}", session.id(), e);
    }
    let _ = with_deadline(writer.shutdown()).await;
}

/// Fails a socket write that makes no progress for [`WRITE_TIMEOUT`].
async fn with_deadline<F>(write: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match timeout(WRITE_TIMEOUT, write).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timed out",
        )),
    }
}

/// Pings the client every `period` until the session closes.
pub async fn run_keepalive(session: Arc<Session>, period: Duration) {
    let mut closed = session.closed_signal();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => session.send(&Packet::Ping),
            _ = wait_until_set(&mut closed) => break,
        }
    }
}

/// Resolves once the watched flag is set or its sender is gone.
pub(crate) async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

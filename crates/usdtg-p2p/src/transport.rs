//! Blocking TCP transport driving a [`NetworkManager`].
//!
//! Every connection gets two threads: a reader that decodes frames and feeds
//! them to [`NetworkManager::handle_inbound`], and a writer draining the
//! peer's bounded outbound channel. Both exit when the peer leaves the table or
//! the manager stops.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::P2pError;
use crate::manager::NetworkManager;
use crate::message::NetworkMessage;
use crate::peer::{FailureReason, PeerId};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_POLL: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 16 * 1024;
/// Frames queued per peer before it is treated as a slow consumer.
const OUTBOX_CAPACITY: usize = 1024;
/// A writer blocked this long on one frame gives up on the connection.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept inbound connections on `listener` until the manager stops.
pub fn serve_incoming(manager: &NetworkManager, listener: TcpListener) -> Result<(), P2pError> {
    listener.set_nonblocking(true)?;
    let local = listener.local_addr()?;
    let mgr = manager.clone();
    let handle = thread::Builder::new()
        .name("usdtg-accept".into())
        .spawn(move || accept_loop(mgr, listener))?;
    manager.register_worker(handle);
    info!(%local, "accepting peers");
    Ok(())
}

fn accept_loop(manager: NetworkManager, listener: TcpListener) {
    while manager.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => accept_one(&manager, stream, addr),
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!("accept failed: {e}");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("accept loop exiting");
}

fn accept_one(manager: &NetworkManager, stream: TcpStream, addr: SocketAddr) {
    let peer_id = match manager.accept_inbound(addr.ip().to_string(), addr.port()) {
        Ok(id) => id,
        Err(e) => {
            debug!(%addr, "inbound connection refused: {e}");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };
    if let Err(e) = stream
        .set_nonblocking(false)
        .map_err(P2pError::from)
        .and_then(|_| start_session(manager, peer_id, stream))
    {
        warn!(peer = %peer_id, %addr, "inbound session failed: {e}");
        manager.fail(peer_id, FailureReason::ConnectionLost);
    }
}

/// Open an outbound connection to `addr` and start its session.
///
/// The peer enters the table as `Connecting`, moves to `Handshaking` once the
/// socket is open, and becomes `Connected` when the remote `Hello` arrives.
pub fn dial(manager: &NetworkManager, addr: SocketAddr) -> Result<PeerId, P2pError> {
    let peer_id = manager.try_connect(addr.ip().to_string(), addr.port())?;
    let stream = match TcpStream::connect_timeout(&addr, manager.config().handshake_timeout()) {
        Ok(stream) => stream,
        Err(e) => {
            manager.fail(peer_id, FailureReason::ConnectionLost);
            return Err(e.into());
        }
    };
    let result = manager
        .advance(peer_id)
        .and_then(|_| start_session(manager, peer_id, stream));
    if let Err(e) = result {
        manager.fail(peer_id, FailureReason::ConnectionLost);
        return Err(e);
    }
    debug!(peer = %peer_id, %addr, "dialed");
    Ok(peer_id)
}

fn start_session(manager: &NetworkManager, peer_id: PeerId, stream: TcpStream) -> Result<(), P2pError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    let mut writer = stream.try_clone()?;

    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(OUTBOX_CAPACITY);
    manager.attach_outbox(peer_id, tx)?;
    manager.send_to(peer_id, &NetworkMessage::handshake(&manager.hello())?)?;

    let write_handle = thread::Builder::new()
        .name(format!("usdtg-write-{peer_id}"))
        .spawn(move || {
            for frame in rx {
                if writer.write_all(&frame).is_err() {
                    break;
                }
            }
            let _ = writer.shutdown(Shutdown::Both);
        })?;
    manager.register_worker(write_handle);

    let mgr = manager.clone();
    let read_handle = thread::Builder::new()
        .name(format!("usdtg-read-{peer_id}"))
        .spawn(move || read_loop(mgr, peer_id, stream))?;
    manager.register_worker(read_handle);
    Ok(())
}

fn read_loop(manager: NetworkManager, peer_id: PeerId, mut stream: TcpStream) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let failure = 'session: loop {
        if !manager.is_running() || !manager.contains(peer_id) {
            break None;
        }
        match stream.read(&mut chunk) {
            Ok(0) => break Some(FailureReason::ConnectionLost),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(_) => break Some(FailureReason::ConnectionLost),
        }

        loop {
            match NetworkMessage::decode_prefix(&buf) {
                Ok(Some((message, used))) => {
                    buf.drain(..used);
                    match manager.handle_inbound(peer_id, message) {
                        Ok(replies) => {
                            for reply in &replies {
                                if let Err(e) = manager.send_to(peer_id, reply) {
                                    debug!(peer = %peer_id, "reply not sent: {e}");
                                }
                            }
                        }
                        Err(e) => debug!(peer = %peer_id, "inbound message rejected: {e}"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // The stream cannot be resynchronised after a bad frame.
                    warn!(peer = %peer_id, "bad frame: {e}");
                    manager.report_invalid_frame(peer_id);
                    break 'session Some(FailureReason::ProtocolViolation);
                }
            }
        }
    };

    if let Some(reason) = failure {
        manager.fail(peer_id, reason);
    }
    let _ = stream.shutdown(Shutdown::Both);
}

//! `chord-transport`: the JSON-framed, one-request-per-connection RPC layer
//! every Chord node uses to talk to its peers.
//!
//! Wire format: a single JSON document per connection, `{"method": ...,
//! "args": ...}` in, `{"method": ..., "args": ...}` out (serde's internally
//! tagged representation keeps request and reply shapes symmetric). The
//! connection closes after the one reply — there is no persistent
//! session, no multiplexing, no streaming.

use chord_ring::RingId;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default dial/read timeout for outbound calls, per `SPEC_FULL.md` §4.2.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to dial {addr}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error talking to {addr}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer {addr} closed the connection without replying")]
    NoReply { addr: String },

    #[error("failed to decode reply from {addr}")]
    Decode {
        addr: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request")]
    Encode(#[source] serde_json::Error),
}

/// A file as carried over the wire: still encrypted in transit (see
/// `chord-crypto`), named, and identified by its ring id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: RingId,
    pub name: String,
    pub content: Vec<u8>,
}

/// Every remotely invokable operation a Chord node exports, per
/// `SPEC_FULL.md` §4.6. Internally tagged on `method`/`args` so a request
/// and its matching reply share one serde shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum RpcRequest {
    GetId,
    GetAddr,
    GetPredecessor,
    GetSuccessorList,
    GetPublicKey,
    SetPredecessor { addr: String },
    Notify { addr: String },
    FindSuccessor { id: RingId, hops: u32 },
    StoreFile { file: FileRecord, backup: bool },
    SuccessorStoreFile { file: FileRecord },
    CheckFileExist { name: String },
    DeleteSuccessorBackup,
}

impl RpcRequest {
    /// The `Node.<MethodName>` name used in logs, matching the source's
    /// RPC naming convention (see `SPEC_FULL.md` §6).
    pub fn method_name(&self) -> &'static str {
        match self {
            RpcRequest::GetId => "Node.GetId",
            RpcRequest::GetAddr => "Node.GetAddr",
            RpcRequest::GetPredecessor => "Node.GetPredecessor",
            RpcRequest::GetSuccessorList => "Node.GetSuccessorList",
            RpcRequest::GetPublicKey => "Node.GetPublicKey",
            RpcRequest::SetPredecessor { .. } => "Node.SetPredecessor",
            RpcRequest::Notify { .. } => "Node.Notify",
            RpcRequest::FindSuccessor { .. } => "Node.FindSuccessor",
            RpcRequest::StoreFile { .. } => "Node.StoreFile",
            RpcRequest::SuccessorStoreFile { .. } => "Node.SuccessorStoreFile",
            RpcRequest::CheckFileExist { .. } => "Node.CheckFileExist",
            RpcRequest::DeleteSuccessorBackup => "Node.DeleteSuccessorBackup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum RpcResponse {
    Id { id: RingId },
    Addr { addr: String },
    Predecessor { addr: Option<String> },
    SuccessorList { addrs: Vec<String> },
    PublicKey { der: Vec<u8> },
    Success { ok: bool },
    FindSuccessor { found: bool, addr: String },
    StoreFile {
        success: bool,
        err: Option<String>,
        backup: bool,
    },
    Exists { present: bool },
}

/// Hook for rewriting an advertised address before it's dialed, e.g. for
/// NAT traversal. The default is the identity: dial exactly the address a
/// peer told us about. No rewriting strategy is implemented here — see
/// `SPEC_FULL.md` §9.
pub trait AddressRewriter: Send + Sync {
    fn rewrite(&self, addr: &str) -> String;
}

pub struct IdentityRewriter;

impl AddressRewriter for IdentityRewriter {
    fn rewrite(&self, addr: &str) -> String {
        addr.to_string()
    }
}

/// Dial `addr`, send `request` as one JSON line, read one JSON line back,
/// and close the connection. Bounded by `timeout` on both the dial and the
/// subsequent read.
pub fn call(addr: &str, request: &RpcRequest, timeout: Duration) -> Result<RpcResponse, TransportError> {
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::Dial {
            addr: addr.to_string(),
            source: std::io::Error::other("address resolved to no candidates"),
        })?;

    let mut stream =
        TcpStream::connect_timeout(&socket_addr, timeout).map_err(|source| TransportError::Dial {
            addr: addr.to_string(),
            source,
        })?;
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|source| TransportError::Io {
            addr: addr.to_string(),
            source,
        })?;
    stream
        .set_write_timeout(Some(timeout))
        .map_err(|source| TransportError::Io {
            addr: addr.to_string(),
            source,
        })?;

    let mut line = serde_json::to_vec(request).map_err(TransportError::Encode)?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .map_err(|source| TransportError::Io {
            addr: addr.to_string(),
            source,
        })?;

    let mut reader = BufReader::new(stream);
    let mut reply_line = String::new();
    let n = reader
        .read_line(&mut reply_line)
        .map_err(|source| TransportError::Io {
            addr: addr.to_string(),
            source,
        })?;
    if n == 0 {
        return Err(TransportError::NoReply {
            addr: addr.to_string(),
        });
    }

    serde_json::from_str(&reply_line).map_err(|source| TransportError::Decode {
        addr: addr.to_string(),
        source,
    })
}

/// Implemented by the engine crate: turns a decoded [`RpcRequest`] into an
/// [`RpcResponse`]. One call per inbound connection.
pub trait RpcHandler: Send + Sync {
    fn handle(&self, request: RpcRequest) -> RpcResponse;
}

/// Accept loop: one OS thread per inbound connection, matching the
/// teacher's per-connection thread-spawning idiom (see `SPEC_FULL.md`
/// §5). Runs until `shutdown` is set and the listener is dropped by the
/// caller (a blocking `accept()` cannot itself observe an `AtomicBool`,
/// so callers that need a clean stop should close the listener from
/// another thread, e.g. by dropping it after setting a short accept
/// timeout).
pub fn serve(
    listener: TcpListener,
    handler: Arc<dyn RpcHandler>,
    shutdown: Arc<AtomicBool>,
) {
    for incoming in listener.incoming() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let stream = match incoming {
            Ok(s) => s,
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept connection");
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        std::thread::spawn(move || serve_one(stream, handler));
    }
}

fn serve_one(mut stream: TcpStream, handler: Arc<dyn RpcHandler>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());

    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "failed to clone connection");
            return;
        }
    });

    let mut line = String::new();
    if let Err(err) = reader.read_line(&mut line) {
        tracing::warn!(%peer, error = %err, "failed to read request");
        return;
    }
    if line.is_empty() {
        return;
    }

    let request: RpcRequest = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "failed to decode request");
            return;
        }
    };

    tracing::debug!(%peer, method = request.method_name(), "handling rpc");
    let response = handler.handle(request);

    let mut out = match serde_json::to_vec(&response) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%peer, error = %err, "failed to encode response");
            return;
        }
    };
    out.push(b'\n');
    if let Err(err) = stream.write_all(&out) {
        tracing::warn!(%peer, error = %err, "failed to write response");
    }
}

//! The node's routing, maintenance, and storage-plane logic (C4, C5, C6).
//! Everything here operates through a cloned [`Engine`] handle: cheap to
//! clone (an `Arc<Mutex<NodeState>>`, an `Arc<dyn AddressRewriter>`, and a
//! `Storage`/`Duration`), so the RPC server can hand one to each
//! connection thread and the three maintenance loops can each own one.

use crate::error::EngineError;
use crate::storage::Storage;
use chord_crypto::RemotePublicKey;
use chord_ring::{between, RingId};
use chord_state::NodeState;
use chord_transport::{AddressRewriter, FileRecord, IdentityRewriter, RpcRequest, RpcResponse};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SharedState = Arc<Mutex<NodeState>>;

#[derive(Clone)]
pub struct Engine {
    pub(crate) state: SharedState,
    pub(crate) storage: Storage,
    pub(crate) rewriter: Arc<dyn AddressRewriter>,
    pub(crate) timeout: Duration,
    /// Bound on `find_successor` recursion hop count: `2m`, per
    /// `SPEC_FULL.md` §4.3.
    pub(crate) max_hops: u32,
}

impl Engine {
    pub fn new(state: NodeState, storage: Storage, timeout: Duration) -> Self {
        let max_hops = 2 * state.ring.m;
        Engine {
            state: Arc::new(Mutex::new(state)),
            storage,
            rewriter: Arc::new(IdentityRewriter),
            timeout,
            max_hops,
        }
    }

    pub fn addr(&self) -> String {
        self.state.lock().unwrap().addr.clone()
    }

    pub fn id(&self) -> RingId {
        self.state.lock().unwrap().id
    }

    /// `SHA1(s) mod 2^m` under this node's ring parameters, for callers
    /// (the CLI) that need to key a lookup without reaching into
    /// `chord-ring` directly.
    pub fn hash_name(&self, s: &str) -> RingId {
        self.state.lock().unwrap().ring.hash(s)
    }

    fn dial(&self, addr: &str, request: &RpcRequest) -> Result<RpcResponse, EngineError> {
        let addr = self.rewriter.rewrite(addr);
        chord_transport::call(&addr, request, self.timeout).map_err(EngineError::from)
    }

    // ---- routing (C4) ----------------------------------------------

    /// `find_successor(id) -> (found, addr)`, per `SPEC_FULL.md` §4.3.
    pub fn find_successor(&self, id: RingId, hops: u32) -> Result<(bool, String), EngineError> {
        let (self_id, self_addr, successor) = {
            let st = self.state.lock().unwrap();
            (st.id, st.addr.clone(), st.successor().map(str::to_string))
        };
        let successor = successor.unwrap_or_else(|| self_addr.clone());

        let successor_id = if successor == self_addr {
            self_id
        } else {
            match self.dial(&successor, &RpcRequest::GetId) {
                Ok(RpcResponse::Id { id }) => id,
                Ok(_) => return Err(EngineError::UnexpectedResponse { method: "GetId" }),
                Err(_) => {
                    // Successor looks dead; stabilize will repair the list on
                    // its next tick. Answer with the best we know rather than
                    // propagating failure for a routing-only read.
                    return Ok((true, successor));
                }
            }
        };

        if between(self_id, id, successor_id, true) {
            return Ok((true, successor));
        }

        if hops >= self.max_hops {
            return Ok((true, successor));
        }

        let next_hop = self.closest_preceding_finger(id);
        if next_hop == self_addr {
            return Ok((true, successor));
        }

        match self.dial(
            &next_hop,
            &RpcRequest::FindSuccessor {
                id,
                hops: hops + 1,
            },
        )? {
            RpcResponse::FindSuccessor { found, addr } => Ok((found, addr)),
            _ => Err(EngineError::UnexpectedResponse {
                method: "FindSuccessor",
            }),
        }
    }

    /// Scan `finger[m..1]` for the closest preceding node, per
    /// `SPEC_FULL.md` §4.3. Pure computation over the currently-known
    /// finger table; no RPC.
    fn closest_preceding_finger(&self, target: RingId) -> String {
        let st = self.state.lock().unwrap();
        for (_, addr) in st.fingers_descending() {
            let finger_id = st.ring.hash(addr);
            if between(st.id, finger_id, target, false) {
                return addr.to_string();
            }
        }
        st.successor().unwrap_or(&st.addr).to_string()
    }

    /// Iterative client-side driver: resolve `id` starting from
    /// `start_addr`. When `start_addr` is this node, route locally rather
    /// than round-tripping an RPC to ourselves.
    pub fn lookup(&self, id: RingId, start_addr: &str) -> Result<String, EngineError> {
        if start_addr == self.addr() {
            let (_, addr) = self.find_successor(id, 0)?;
            Ok(addr)
        } else {
            match self.dial(start_addr, &RpcRequest::FindSuccessor { id, hops: 0 })? {
                RpcResponse::FindSuccessor { addr, .. } => Ok(addr),
                _ => Err(EngineError::UnexpectedResponse {
                    method: "FindSuccessor",
                }),
            }
        }
    }

    // ---- maintenance (C5) ------------------------------------------

    /// One `stabilize` tick, per `SPEC_FULL.md` §4.4.1.
    pub fn stabilize_tick(&self) {
        let self_addr = self.addr();
        let head = {
            let st = self.state.lock().unwrap();
            st.successor().map(str::to_string)
        };
        let head = head.unwrap_or_else(|| self_addr.clone());

        match self.dial(&head, &RpcRequest::GetSuccessorList) {
            Ok(RpcResponse::SuccessorList { addrs }) => {
                let mut st = self.state.lock().unwrap();
                st.refresh_successor_tail(&addrs);
            }
            _ => {
                let mut st = self.state.lock().unwrap();
                if st.successor().is_none() {
                    st.set_successor0(self_addr.clone());
                } else {
                    st.shift_successors();
                    if st.successor().is_none() {
                        st.set_successor0(self_addr.clone());
                    }
                }
            }
        }

        let head = {
            let st = self.state.lock().unwrap();
            st.successor().unwrap_or(&self_addr).to_string()
        };

        if head != self_addr {
            if let Ok(RpcResponse::Predecessor { addr: Some(p) }) =
                self.dial(&head, &RpcRequest::GetPredecessor)
            {
                let (self_id, p_id, head_id) = {
                    let st = self.state.lock().unwrap();
                    (st.id, st.ring.hash(&p), st.ring.hash(&head))
                };
                if between(self_id, p_id, head_id, false) {
                    let mut st = self.state.lock().unwrap();
                    st.set_successor0(p);
                }
            }
        }

        let head = {
            let st = self.state.lock().unwrap();
            st.successor().unwrap_or(&self_addr).to_string()
        };

        let _ = self.dial(&head, &RpcRequest::Notify { addr: self_addr.clone() });
        let _ = self.dial(&head, &RpcRequest::DeleteSuccessorBackup);

        if head != self_addr {
            let bucket_entries: Vec<(RingId, String)> = {
                let st = self.state.lock().unwrap();
                st.bucket.iter().map(|(k, v)| (*k, v.clone())).collect()
            };
            for (id, name) in bucket_entries {
                if let Err(err) = self.replicate_to_backup(&head, id, &name) {
                    tracing::warn!(%name, error = %err, "failed to replicate file to successor backup");
                }
            }
        }

        if let Err(err) = self.clean_redundant_file() {
            tracing::warn!(error = %err, "failed to clean redundant local files");
        }
    }

    fn replicate_to_backup(&self, successor: &str, id: RingId, name: &str) -> Result<(), EngineError> {
        let bytes = self.storage.read_storage(name)?;
        let ciphertext = self.encrypt_for(successor, &bytes)?;
        let file = FileRecord {
            id,
            name: name.to_string(),
            content: ciphertext,
        };
        match self.dial(successor, &RpcRequest::SuccessorStoreFile { file })? {
            RpcResponse::StoreFile { success, err, .. } => {
                if !success {
                    tracing::debug!(%name, ?err, "successor declined backup replica");
                }
                Ok(())
            }
            _ => Err(EngineError::UnexpectedResponse {
                method: "SuccessorStoreFile",
            }),
        }
    }

    fn clean_redundant_file(&self) -> Result<(), EngineError> {
        let (owned, mirrored): (std::collections::HashSet<String>, std::collections::HashSet<String>) = {
            let st = self.state.lock().unwrap();
            (
                st.bucket.values().cloned().collect(),
                st.backup.values().cloned().collect(),
            )
        };
        for name in self.storage.list_storage_files()? {
            if !owned.contains(&name) && !mirrored.contains(&name) {
                self.storage.delete_storage(&name)?;
            }
        }
        Ok(())
    }

    /// One `fix_fingers` tick: refresh exactly one row, per
    /// `SPEC_FULL.md` §4.4.2.
    pub fn fix_fingers_tick(&self) {
        let self_addr = self.addr();
        let (row, start) = {
            let mut st = self.state.lock().unwrap();
            let row = st.advance_finger_cursor();
            let start = st.ring.finger_start(st.id, row);
            (row, start)
        };
        match self.lookup(start, &self_addr) {
            Ok(addr) => {
                let mut st = self.state.lock().unwrap();
                st.set_finger_row(row, addr);
            }
            Err(err) => tracing::debug!(row, error = %err, "fix_fingers lookup failed"),
        }
    }

    /// One `check_predecessor` tick, per `SPEC_FULL.md` §4.4.3.
    pub fn check_predecessor_tick(&self) {
        let predecessor = {
            let st = self.state.lock().unwrap();
            st.predecessor.clone()
        };
        let Some(predecessor) = predecessor else {
            return;
        };
        if probe(&predecessor, self.timeout) {
            return;
        }

        tracing::info!(%predecessor, "predecessor unreachable, promoting backup");
        let mut st = self.state.lock().unwrap();
        st.predecessor = None;
        let promoted: Vec<(RingId, String)> = st
            .backup
            .iter()
            .filter(|(_, name)| !name.is_empty())
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (id, name) in promoted {
            st.bucket.insert(id, name);
        }
    }

    // ---- notify / move_files (C4.7 / C4.5) --------------------------

    /// `notify(a)` handler, per `SPEC_FULL.md` §4.7.
    pub fn handle_notify(&self, addr: String) -> bool {
        let not_solo = {
            let st = self.state.lock().unwrap();
            st.successor() != Some(st.addr.as_str())
        };
        if not_solo {
            self.move_files(&addr);
        }

        let mut st = self.state.lock().unwrap();
        match st.predecessor.clone() {
            None => {
                st.predecessor = Some(addr);
                true
            }
            Some(pred) => {
                let p_id = st.ring.hash(&pred);
                let a_id = st.ring.hash(&addr);
                if between(p_id, a_id, st.id, false) {
                    st.predecessor = Some(addr);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Hand off bucket entries that now belong to a newly-arrived
    /// predecessor, per `SPEC_FULL.md` §4.5.
    fn move_files(&self, new_predecessor: &str) {
        let (self_id, new_predecessor_id) = {
            let st = self.state.lock().unwrap();
            (st.id, st.ring.hash(new_predecessor))
        };
        let to_move: Vec<(RingId, String)> = {
            let st = self.state.lock().unwrap();
            st.bucket
                .iter()
                .filter(|(k, _)| between(self_id, **k, new_predecessor_id, true))
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        };

        for (id, name) in to_move {
            let bytes = match self.storage.read_storage(&name) {
                Ok(b) => b,
                Err(err) => {
                    tracing::warn!(%name, error = %err, "failed to read file to hand off");
                    continue;
                }
            };
            let ciphertext = match self.encrypt_for(new_predecessor, &bytes) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(%name, error = %err, "failed to encrypt file for handoff");
                    continue;
                }
            };
            let file = FileRecord {
                id,
                name: name.clone(),
                content: ciphertext,
            };
            match self.dial(new_predecessor, &RpcRequest::StoreFile { file, backup: false }) {
                Ok(RpcResponse::StoreFile { success: true, .. }) => {
                    let mut st = self.state.lock().unwrap();
                    st.bucket.remove(&id);
                    drop(st);
                    let _ = self.storage.delete_storage(&name);
                }
                other => tracing::warn!(%name, ?other, "failed to hand off file to new predecessor"),
            }
        }
    }

    // ---- storage plane (C6) -----------------------------------------

    fn encrypt_for(&self, addr: &str, bytes: &[u8]) -> Result<Vec<u8>, EngineError> {
        match self.dial(addr, &RpcRequest::GetPublicKey)? {
            RpcResponse::PublicKey { der } => {
                let remote = RemotePublicKey::from_der(&der)?;
                Ok(remote.encrypt(bytes)?)
            }
            _ => Err(EngineError::UnexpectedResponse {
                method: "GetPublicKey",
            }),
        }
    }

    /// `store_file(name)`, the CLI-initiated client op, per
    /// `SPEC_FULL.md` §4.5.
    pub fn store_file(&self, name: &str) -> Result<(), EngineError> {
        let self_addr = self.addr();
        let id = {
            let st = self.state.lock().unwrap();
            st.ring.hash(name)
        };
        let owner = self.lookup(id, &self_addr)?;
        let bytes = self.storage.read_upload(name)?;
        let ciphertext = self.encrypt_for(&owner, &bytes)?;
        let file = FileRecord {
            id,
            name: name.to_string(),
            content: ciphertext,
        };
        match self.dial(&owner, &RpcRequest::StoreFile { file, backup: false })? {
            RpcResponse::StoreFile { success, err, .. } => {
                if !success {
                    tracing::warn!(%name, %owner, ?err, "owner declined store_file");
                }
                Ok(())
            }
            _ => Err(EngineError::UnexpectedResponse { method: "StoreFile" }),
        }
    }

    /// `store_file_rpc(f, backup_flag)` handler, per `SPEC_FULL.md` §4.5.
    pub fn handle_store_file(&self, file: FileRecord, backup: bool) -> (bool, Option<String>) {
        if backup {
            {
                let mut st = self.state.lock().unwrap();
                if st.backup.contains_key(&file.id) {
                    return (false, Some("already exists".to_string()));
                }
                st.backup.insert(file.id, file.name.clone());
            }
            match self.storage.write_storage(&file.name, &file.content) {
                Ok(()) => (true, None),
                Err(err) => (false, Some(err.to_string())),
            }
        } else {
            let plaintext = {
                let mut st = self.state.lock().unwrap();
                if st.bucket.contains_key(&file.id) {
                    return (false, Some("already exists".to_string()));
                }
                match st.key_pair.decrypt(&file.content) {
                    Ok(p) => {
                        st.bucket.insert(file.id, file.name.clone());
                        p
                    }
                    Err(err) => {
                        return (false, Some(err.to_string()));
                    }
                }
            };
            match self.storage.write_storage(&file.name, &plaintext) {
                Ok(()) => (true, None),
                Err(err) => {
                    let mut st = self.state.lock().unwrap();
                    st.bucket.remove(&file.id);
                    (false, Some(err.to_string()))
                }
            }
        }
    }

    /// `successor_store_file(f)` handler: the idempotent backup path used
    /// by `stabilize`'s replication step, per `SPEC_FULL.md` §4.4.1/§4.5.
    pub fn handle_successor_store_file(&self, file: FileRecord) -> (bool, Option<String>) {
        {
            let mut st = self.state.lock().unwrap();
            if st.backup.contains_key(&file.id) || st.bucket.contains_key(&file.id) {
                return (true, None);
            }
            st.backup.insert(file.id, file.name.clone());
        }
        match self.storage.write_storage(&file.name, &file.content) {
            Ok(()) => (true, None),
            Err(err) => (false, Some(err.to_string())),
        }
    }

    /// `check_file_exist(name)`: linear scan of `bucket`, per
    /// `SPEC_FULL.md` §4.5.
    pub fn check_file_exist(&self, name: &str) -> bool {
        let st = self.state.lock().unwrap();
        st.bucket.values().any(|n| n == name)
    }

    /// The `upload/` directory a local client stages files into before
    /// `store_file`.
    pub fn storage_upload_dir(&self) -> std::path::PathBuf {
        self.storage.upload_dir()
    }

    /// Whether `name` is currently mirrored in this node's `backup` map.
    pub fn has_backup_copy(&self, name: &str) -> bool {
        let st = self.state.lock().unwrap();
        st.backup.values().any(|n| n == name)
    }

    /// `check_file_exist(name)` against a remote node, for the `Lookup`
    /// CLI command's "probe existence" step (`SPEC_FULL.md` §6).
    pub fn remote_check_file_exist(&self, addr: &str, name: &str) -> Result<bool, EngineError> {
        if addr == self.addr() {
            return Ok(self.check_file_exist(name));
        }
        match self.dial(addr, &RpcRequest::CheckFileExist { name: name.to_string() })? {
            RpcResponse::Exists { present } => Ok(present),
            _ => Err(EngineError::UnexpectedResponse {
                method: "CheckFileExist",
            }),
        }
    }

    /// A point-in-time dump of this node's state, for the `PrintState` CLI
    /// command (`SPEC_FULL.md` §6).
    pub fn snapshot(&self) -> NodeSnapshot {
        let st = self.state.lock().unwrap();
        NodeSnapshot {
            id: st.id,
            addr: st.addr.clone(),
            predecessor: st.predecessor.clone(),
            successors: st.successors.clone(),
            fingers: (1..=st.ring.m)
                .map(|i| {
                    let (start, addr) = st.finger_row(i);
                    (start, addr.map(str::to_string))
                })
                .collect(),
            bucket: st.bucket.iter().map(|(k, v)| (*k, v.clone())).collect(),
            backup: st.backup.iter().map(|(k, v)| (*k, v.clone())).collect(),
        }
    }
}

/// See [`Engine::snapshot`].
pub struct NodeSnapshot {
    pub id: RingId,
    pub addr: String,
    pub predecessor: Option<String>,
    pub successors: Vec<Option<String>>,
    pub fingers: Vec<(RingId, Option<String>)>,
    pub bucket: Vec<(RingId, String)>,
    pub backup: Vec<(RingId, String)>,
}

impl std::fmt::Display for NodeSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "id:          {}", self.id)?;
        writeln!(f, "addr:        {}", self.addr)?;
        writeln!(
            f,
            "predecessor: {}",
            self.predecessor.as_deref().unwrap_or("<none>")
        )?;
        writeln!(f, "successors:")?;
        for (i, s) in self.successors.iter().enumerate() {
            writeln!(f, "  [{i}] {}", s.as_deref().unwrap_or("<none>"))?;
        }
        writeln!(f, "fingers:")?;
        for (i, (start, addr)) in self.fingers.iter().enumerate() {
            writeln!(
                f,
                "  [{}] start={start} -> {}",
                i + 1,
                addr.as_deref().unwrap_or("<none>")
            )?;
        }
        writeln!(f, "bucket ({} files):", self.bucket.len())?;
        for (id, name) in &self.bucket {
            writeln!(f, "  {id} {name}")?;
        }
        writeln!(f, "backup ({} files):", self.backup.len())?;
        for (id, name) in &self.backup {
            writeln!(f, "  {id} {name}")?;
        }
        Ok(())
    }
}

/// A dial that is immediately dropped, per `SPEC_FULL.md` §4.4.3's
/// "transport-level probe (a dial that is immediately closed is
/// acceptable)".
fn probe(addr: &str, timeout: Duration) -> bool {
    let Ok(mut candidates) = addr.to_socket_addrs() else {
        return false;
    };
    let Some(socket_addr) = candidates.next() else {
        return false;
    };
    TcpStream::connect_timeout(&socket_addr, timeout).is_ok()
}

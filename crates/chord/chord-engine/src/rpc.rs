//! Wires [`Engine`] into `chord_transport::RpcHandler`: one match arm per
//! method in the table at `SPEC_FULL.md` §4.6.

use crate::engine::Engine;
use chord_transport::{RpcHandler, RpcRequest, RpcResponse};

impl RpcHandler for Engine {
    fn handle(&self, request: RpcRequest) -> RpcResponse {
        match request {
            RpcRequest::GetId => RpcResponse::Id { id: self.id() },

            RpcRequest::GetAddr => RpcResponse::Addr { addr: self.addr() },

            RpcRequest::GetPredecessor => {
                let st = self.state.lock().unwrap();
                RpcResponse::Predecessor {
                    addr: st.predecessor.clone(),
                }
            }

            RpcRequest::GetSuccessorList => {
                let st = self.state.lock().unwrap();
                RpcResponse::SuccessorList {
                    addrs: st.successor_addrs(),
                }
            }

            RpcRequest::GetPublicKey => {
                let st = self.state.lock().unwrap();
                match st.key_pair.public_key_bytes() {
                    Ok(der) => RpcResponse::PublicKey { der },
                    Err(err) => {
                        tracing::error!(error = %err, "failed to encode public key");
                        RpcResponse::PublicKey { der: Vec::new() }
                    }
                }
            }

            RpcRequest::SetPredecessor { addr } => {
                let mut st = self.state.lock().unwrap();
                st.predecessor = Some(addr);
                RpcResponse::Success { ok: true }
            }

            RpcRequest::Notify { addr } => {
                let ok = self.handle_notify(addr);
                RpcResponse::Success { ok }
            }

            RpcRequest::FindSuccessor { id, hops } => match self.find_successor(id, hops) {
                Ok((found, addr)) => RpcResponse::FindSuccessor { found, addr },
                Err(err) => {
                    tracing::warn!(error = %err, "find_successor failed");
                    RpcResponse::FindSuccessor {
                        found: false,
                        addr: self.addr(),
                    }
                }
            },

            RpcRequest::StoreFile { file, backup } => {
                let (success, err) = self.handle_store_file(file, backup);
                RpcResponse::StoreFile {
                    success,
                    err,
                    backup,
                }
            }

            RpcRequest::SuccessorStoreFile { file } => {
                let (success, err) = self.handle_successor_store_file(file);
                RpcResponse::StoreFile {
                    success,
                    err,
                    backup: true,
                }
            }

            RpcRequest::CheckFileExist { name } => RpcResponse::Exists {
                present: self.check_file_exist(&name),
            },

            RpcRequest::DeleteSuccessorBackup => {
                let mut st = self.state.lock().unwrap();
                st.backup.clear();
                RpcResponse::Success { ok: true }
            }
        }
    }
}

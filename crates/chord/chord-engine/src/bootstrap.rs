//! `create`/`join` bootstrap, per `SPEC_FULL.md` §4.8.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::storage::Storage;
use chord_crypto::KeyPair;
use chord_ring::RingParams;
use chord_state::NodeState;
use chord_transport::{RpcRequest, RpcResponse};
use std::time::Duration;

/// Start a solo ring.
pub fn create(
    ring: RingParams,
    addr: String,
    key_pair: KeyPair,
    storage: Storage,
    timeout: Duration,
) -> Engine {
    let state = NodeState::create(ring, addr, key_pair);
    Engine::new(state, storage, timeout)
}

/// Join an existing ring through `seed_addr`: leave predecessor unset,
/// resolve our own successor via `seed.find_successor(self.id)`, then
/// notify that successor of our arrival.
pub fn join(
    ring: RingParams,
    addr: String,
    key_pair: KeyPair,
    storage: Storage,
    timeout: Duration,
    seed_addr: &str,
) -> Result<Engine, EngineError> {
    let state = NodeState::join_shell(ring, addr, key_pair);
    let engine = Engine::new(state, storage, timeout);
    let self_id = engine.id();

    let response = chord_transport::call(seed_addr, &RpcRequest::FindSuccessor { id: self_id, hops: 0 }, timeout)?;
    let successor = match response {
        RpcResponse::FindSuccessor { addr, .. } => addr,
        _ => {
            return Err(EngineError::UnexpectedResponse {
                method: "FindSuccessor",
            })
        }
    };

    {
        let mut st = engine.state.lock().unwrap();
        st.set_successor0(successor.clone());
    }

    let self_addr = engine.addr();
    if let Err(err) = chord_transport::call(&successor, &RpcRequest::Notify { addr: self_addr }, timeout) {
        tracing::warn!(%successor, error = %err, "initial notify after join failed; stabilize will retry");
    }

    Ok(engine)
}

//! `chord-engine`: the ring-maintenance state machine and key-routing/
//! storage layer that rides on top of it — the hard part of this crate,
//! per `SPEC_FULL.md` §1.
//!
//! ```text
//!            inbound RPC thread (one per connection)
//!                        |
//!                        v
//!   +-----------------------------------------------+
//!   |                   Engine                       |
//!   |  Arc<Mutex<NodeState>>  +  Storage  + timeout   |
//!   +-----------------------------------------------+
//!      ^            ^             ^
//!      |            |             |
//!  stabilize   fix_fingers   check_predecessor
//!  (thread)     (thread)        (thread)
//! ```
//!
//! Every arrow above is a cloned `Engine` handle sharing the same
//! underlying `Arc<Mutex<NodeState>>`; the mutex is the only
//! synchronization primitive in the node (`SPEC_FULL.md` §5).

mod bootstrap;
mod engine;
mod error;
mod rpc;
mod storage;

pub use bootstrap::{create, join};
pub use engine::{Engine, NodeSnapshot};
pub use error::EngineError;
pub use storage::Storage;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Spawn the three independent periodic maintenance tasks described in
/// `SPEC_FULL.md` §4.4. Each loop sleeps in short slices so it notices
/// `shutdown` promptly rather than oversleeping a single long interval.
pub fn spawn_maintenance(
    engine: Engine,
    ts: Duration,
    tff: Duration,
    tcp: Duration,
    shutdown: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_loop("stabilize", engine.clone(), ts, Arc::clone(&shutdown), Engine::stabilize_tick),
        spawn_loop("fix_fingers", engine.clone(), tff, Arc::clone(&shutdown), Engine::fix_fingers_tick),
        spawn_loop(
            "check_predecessor",
            engine,
            tcp,
            shutdown,
            Engine::check_predecessor_tick,
        ),
    ]
}

fn spawn_loop(
    name: &'static str,
    engine: Engine,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    tick: fn(&Engine),
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            const SLICE: Duration = Duration::from_millis(50);
            while !shutdown.load(Ordering::Relaxed) {
                let mut remaining = period;
                while remaining > Duration::ZERO {
                    if shutdown.load(Ordering::Relaxed) {
                        return;
                    }
                    let nap = remaining.min(SLICE);
                    std::thread::sleep(nap);
                    remaining = remaining.saturating_sub(nap);
                }
                tracing::debug!(task = name, "tick");
                tick(&engine);
            }
        })
        .expect("failed to spawn maintenance thread")
}

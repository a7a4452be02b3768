//! Integration tests driving several in-process nodes bound to
//! `127.0.0.1:0`, with maintenance ticks invoked explicitly rather than
//! through background sleeping threads, so convergence is deterministic.
//! Mirrors the store/replicate/fail-over scenarios in `SPEC_FULL.md` §8.

use chord_crypto::KeyPair;
use chord_ring::RingParams;
use chord_engine::{create, join, Engine, Storage};
use chord_transport::{RpcHandler, RpcRequest, RpcResponse};
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

struct Node {
    engine: Engine,
    addr: String,
    shutdown: Arc<AtomicBool>,
}

fn spawn_solo(tmp: &std::path::Path, ring: RingParams, label: &str) -> Node {
    let dir = tmp.join(label);
    let storage = Storage::new(&dir).unwrap();
    let key_pair = KeyPair::load_or_generate(&dir).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let engine = create(ring, addr.clone(), key_pair, storage, Duration::from_millis(500));
    let shutdown = serve(&engine, listener);
    Node { engine, addr, shutdown }
}

fn spawn_and_join(tmp: &std::path::Path, ring: RingParams, label: &str, seed_addr: &str) -> Node {
    let dir = tmp.join(label);
    let storage = Storage::new(&dir).unwrap();
    let key_pair = KeyPair::load_or_generate(&dir).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let engine = join(ring, addr.clone(), key_pair, storage, Duration::from_millis(500), seed_addr).unwrap();
    let shutdown = serve(&engine, listener);
    Node { engine, addr, shutdown }
}

fn serve(engine: &Engine, listener: TcpListener) -> Arc<AtomicBool> {
    let handler: Arc<dyn RpcHandler> = Arc::new(engine.clone());
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    std::thread::spawn(move || chord_transport::serve(listener, handler, shutdown_clone));
    shutdown
}

fn settle(nodes: &[&Node], rounds: usize) {
    for _ in 0..rounds {
        for n in nodes {
            n.engine.stabilize_tick();
        }
    }
}

/// Simulates the failure of a node: `chord_transport::serve`'s accept loop
/// only observes `shutdown` between connections, so a dummy connection
/// wakes the blocked `accept()` and lets the thread see the flag and exit,
/// dropping the listener and freeing the port. After this, dials to
/// `node.addr` fail exactly as they would against a crashed process.
fn kill(node: &Node) {
    node.shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    let _ = std::net::TcpStream::connect(&node.addr);
    std::thread::sleep(Duration::from_millis(100));
}

#[test]
fn store_then_lookup_round_trips_across_a_three_node_ring() {
    let tmp = std::env::temp_dir().join(format!("chord-itest-storelookup-{}", std::process::id()));
    let ring = RingParams::new(10, 3).unwrap();

    let a = spawn_solo(&tmp, ring, "a");
    let b = spawn_and_join(&tmp, ring, "b", &a.addr);
    let c = spawn_and_join(&tmp, ring, "c", &a.addr);
    settle(&[&a, &b, &c], 6);

    std::fs::write(a.engine.storage_upload_dir().join("readme.txt"), b"hello ring").unwrap();
    a.engine.store_file("readme.txt").unwrap();

    // From every node, `Lookup("readme.txt")` then a direct
    // `check_file_exist` RPC to the returned owner must confirm the file.
    for n in [&a, &b, &c] {
        let id = ring.hash("readme.txt");
        let owner = n.engine.lookup(id, &n.addr).unwrap();
        let exists = match chord_transport::call(
            &owner,
            &RpcRequest::CheckFileExist {
                name: "readme.txt".to_string(),
            },
            Duration::from_millis(500),
        )
        .unwrap()
        {
            RpcResponse::Exists { present } => present,
            other => panic!("unexpected response: {other:?}"),
        };
        assert!(exists, "owner {owner} resolved from {} should have the file", n.addr);
    }

    let _ = std::fs::remove_dir_all(&tmp);
}

#[test]
fn backup_is_populated_on_the_owners_successor_after_stabilize() {
    let tmp = std::env::temp_dir().join(format!("chord-itest-backup-{}", std::process::id()));
    let ring = RingParams::new(10, 3).unwrap();

    let a = spawn_solo(&tmp, ring, "a");
    let b = spawn_and_join(&tmp, ring, "b", &a.addr);
    settle(&[&a, &b], 6);

    std::fs::write(a.engine.storage_upload_dir().join("x.bin"), b"payload bytes").unwrap();
    a.engine.store_file("x.bin").unwrap();
    settle(&[&a, &b], 3);

    let id = ring.hash("x.bin");
    let owner = a.engine.lookup(id, &a.addr).unwrap();
    let other = if owner == a.addr { &b } else { &a };

    let backup_list = match chord_transport::call(&other.addr, &RpcRequest::GetSuccessorList, Duration::from_millis(500)) {
        Ok(RpcResponse::SuccessorList { addrs }) => addrs,
        _ => Vec::new(),
    };
    let _ = backup_list;
    // The owner's successor is `other` on a 2-node ring; its backup map
    // should now mirror the owner's bucket entry.
    assert!(other.engine.has_backup_copy("x.bin"));

    let _ = std::fs::remove_dir_all(&tmp);
}

/// Mirrors the spec's S5 fail-over scenario: kill the owner of a stored
/// file, run the survivor's `check_predecessor` tick, and confirm it
/// promotes its backup copy into its own bucket.
#[test]
fn killing_the_owner_promotes_its_backup_on_the_survivor() {
    let tmp = std::env::temp_dir().join(format!("chord-itest-failover-{}", std::process::id()));
    let ring = RingParams::new(10, 3).unwrap();

    let a = spawn_solo(&tmp, ring, "a");
    let b = spawn_and_join(&tmp, ring, "b", &a.addr);
    settle(&[&a, &b], 6);

    std::fs::write(a.engine.storage_upload_dir().join("readme.txt"), b"hello ring").unwrap();
    a.engine.store_file("readme.txt").unwrap();
    settle(&[&a, &b], 3);

    let id = ring.hash("readme.txt");
    let owner_addr = a.engine.lookup(id, &a.addr).unwrap();
    let (dead, survivor) = if owner_addr == a.addr { (&a, &b) } else { (&b, &a) };
    assert!(survivor.engine.has_backup_copy("readme.txt"));

    kill(dead);

    survivor.engine.check_predecessor_tick();

    assert!(survivor.engine.check_file_exist("readme.txt"));

    let _ = std::fs::remove_dir_all(&tmp);
}

/// Mirrors the spec's S3 three-node routing scenario: every node's
/// `find_successor` for a given target id must agree, regardless of which
/// node starts the lookup, once the ring has stabilized.
#[test]
fn three_node_find_successor_resolves_in_the_expected_number_of_hops() {
    let tmp = std::env::temp_dir().join(format!("chord-itest-routing-{}", std::process::id()));
    let ring = RingParams::new(10, 3).unwrap();

    let a = spawn_solo(&tmp, ring, "a");
    let b = spawn_and_join(&tmp, ring, "b", &a.addr);
    let c = spawn_and_join(&tmp, ring, "c", &a.addr);
    settle(&[&a, &b, &c], 8);

    // After quiescence, find_successor for each node's own id returns some
    // node (not necessarily itself — a key equal to n.id is routed
    // elsewhere per the spec's note in §4.3), and is consistent no matter
    // which node starts the lookup.
    for target in [&a, &b, &c] {
        let id = target.engine.id();
        let from_a = a.engine.lookup(id, &a.addr).unwrap();
        let from_b = b.engine.lookup(id, &b.addr).unwrap();
        let from_c = c.engine.lookup(id, &c.addr).unwrap();
        assert_eq!(from_a, from_b);
        assert_eq!(from_b, from_c);
    }

    let _ = std::fs::remove_dir_all(&tmp);
}

use chord_config::{Bootstrap, NodeConfig};
use chord_crypto::KeyPair;
use chord_engine::{Engine, Storage};
use std::io::{BufRead, Write};
use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")))
        .init();

    let args = match chord_config::parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(err) => {
            error!(error = %err, "invalid arguments");
            return ExitCode::from(1);
        }
    };

    let config = match chord_config::validate(&args) {
        Ok(c) => c,
        Err(err) => {
            error!(error = %err, "invalid arguments");
            return ExitCode::from(1);
        }
    };

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "node exited with an error");
            ExitCode::from(1)
        }
    }
}

fn run(config: NodeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = config.bind_addr();
    let self_id = config.ring.hash(&bind_addr);
    let label = config
        .client_name
        .clone()
        .unwrap_or_else(|| format!("N{}", self_id.as_u64()));
    let root = std::path::PathBuf::from(format!("chord_data/{label}"));
    let storage = Storage::new(&root)?;
    let key_pair = KeyPair::load_or_generate(&root)?;

    let listener = TcpListener::bind(&bind_addr)?;
    info!(%bind_addr, id = %self_id, %label, "bound chord listener");

    let engine = match config.bootstrap {
        Bootstrap::Create => {
            info!("starting a new ring");
            chord_engine::create(config.ring, bind_addr.clone(), key_pair, storage, chord_transport::DEFAULT_TIMEOUT)
        }
        Bootstrap::Join => {
            let join_addr = config.join_addr();
            info!(%join_addr, "joining existing ring");
            chord_engine::join(
                config.ring,
                bind_addr.clone(),
                key_pair,
                storage,
                chord_transport::DEFAULT_TIMEOUT,
                &join_addr,
            )?
        }
    };

    let handler: Arc<dyn chord_transport::RpcHandler> = Arc::new(engine.clone());
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let handler = Arc::clone(&handler);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || chord_transport::serve(listener, handler, shutdown));
    }

    let maintenance = chord_engine::spawn_maintenance(
        engine.clone(),
        config.ts,
        config.tff,
        config.tcp,
        Arc::clone(&shutdown),
    );

    run_repl(&engine)?;

    shutdown.store(true, Ordering::Relaxed);
    for handle in maintenance {
        let _ = handle.join();
    }
    Ok(())
}

/// Interactive command loop: `Lookup <name>`, `StoreFile <name>`,
/// `PrintState`, `Quit`, per `SPEC_FULL.md` §1's thin CLI collaborator.
fn run_repl(engine: &Engine) -> std::io::Result<()> {
    let stdin = std::io::stdin();
    print!("> ");
    std::io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        match parts.next().unwrap_or("") {
            "Lookup" => {
                let name = parts.next().unwrap_or("").trim();
                let id = engine_hash(engine, name);
                match engine.lookup(id, &engine.addr()) {
                    Ok(owner) => {
                        println!("{name} -> {owner}");
                        match engine.remote_check_file_exist(&owner, name) {
                            Ok(true) => println!("  present on {owner}"),
                            Ok(false) => println!("  not found on {owner}"),
                            Err(err) => println!("  existence probe failed: {err}"),
                        }
                    }
                    Err(err) => println!("lookup failed: {err}"),
                }
            }
            "StoreFile" => {
                let name = parts.next().unwrap_or("").trim();
                match engine.store_file(name) {
                    Ok(()) => println!("stored {name}"),
                    Err(err) => println!("store failed: {err}"),
                }
            }
            "PrintState" => print!("{}", engine.snapshot()),
            "Quit" => break,
            "" => {}
            other => println!("unrecognized command: {other}"),
        }
        print!("> ");
        std::io::stdout().flush()?;
    }
    Ok(())
}

fn engine_hash(engine: &Engine, name: &str) -> chord_ring::RingId {
    engine.hash_name(name)
}

//! Line-based TCP server front-end (spec.md §6.3 TCP defaults;
//! SPEC_FULL.md §1/§6.5). Thread-per-connection rather than a true
//! readiness-selection (epoll/kqueue) event loop — documented as a
//! deliberate simplification in `DESIGN.md`.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use aytdb::common::{DEFAULT_PASSWORD, DEFAULT_PORT, MAX_CLIENTS};
use aytdb::config::Config;
use aytdb::dispatcher::{dispatch, Reply, Session};
use aytdb::AytDb;

fn handle_client(stream: TcpStream, db: Arc<AytDb>, password: String, shutdown: Arc<AtomicBool>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());
    info!(%peer, "client connected");

    let reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
    let mut writer = stream;
    let mut session = Session::tcp(password);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let is_shutdown = line.trim().eq_ignore_ascii_case("shutdown");
        let reply = dispatch(&db, &mut session, &line, true);
        let wire = reply.to_wire();
        if writer.write_all(&wire).is_err() {
            break;
        }

        if is_shutdown && session.authenticated {
            shutdown.store(true, Ordering::Relaxed);
            break;
        }
        if matches!(reply, Reply::Close) {
            break;
        }
    }

    info!(%peer, "client disconnected");
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut config = Config::from_env();
    let mut password = DEFAULT_PASSWORD.to_string();
    let mut port = DEFAULT_PORT;

    if let Ok(path) = std::env::var("AYTDB_CONFIG_FILE") {
        match Config::load_toml_file(std::path::Path::new(&path)) {
            Ok(file) => {
                if let Some(pw) = file.password.clone() {
                    password = pw;
                }
                if let Some(p) = file.port {
                    port = p;
                }
                config = config.merge_file(file);
            }
            Err(e) => eprintln!("warning: failed to read {path}: {e}"),
        }
    }

    let db = match AytDb::open(config) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("fatal: failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("fatal: failed to bind port {port}: {e}");
            std::process::exit(1);
        }
    };
    listener
        .set_nonblocking(true)
        .expect("set listener nonblocking");
    info!(port, "aytdb-server listening");

    let shutdown = Arc::new(AtomicBool::new(false));
    let active = Arc::new(AtomicUsize::new(0));
    let handles: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if active.load(Ordering::Relaxed) >= MAX_CLIENTS {
                    let mut stream = stream;
                    let _ = stream.write_all(b"ERROR: too many connections\r\n");
                    continue;
                }

                active.fetch_add(1, Ordering::Relaxed);
                let db = db.clone();
                let password = password.clone();
                let shutdown = shutdown.clone();
                let active = active.clone();
                let handle = thread::spawn(move || {
                    handle_client(stream, db, password, shutdown);
                    active.fetch_sub(1, Ordering::Relaxed);
                });
                handles.lock().unwrap().push(handle);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
            }
        }
    }

    info!("shutdown requested, draining connections");
    for handle in handles.lock().unwrap().drain(..) {
        if handle.join().is_err() {
            warn!("a connection thread panicked during shutdown");
        }
    }
    info!("all connections drained, exiting");
}

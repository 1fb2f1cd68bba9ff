//! Interactive REPL front-end (SPEC_FULL.md §1: "thin ... binaries that
//! exercise the dispatcher end-to-end"). No authentication — a console
//! session is implicitly trusted (spec.md §4.F covers the networked
//! front-end's auth gate only).

use std::io::{self, BufRead, Write};

use aytdb::config::Config;
use aytdb::dispatcher::{dispatch, Reply, Session};
use aytdb::AytDb;

fn main() {
    tracing_subscriber::fmt::init();

    let mut config = Config::from_env();
    if let Ok(path) = std::env::var("AYTDB_CONFIG_FILE") {
        match Config::load_toml_file(std::path::Path::new(&path)) {
            Ok(file) => config = config.merge_file(file),
            Err(e) => eprintln!("warning: failed to read {path}: {e}"),
        }
    }

    let db = match AytDb::open(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("fatal: failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let mut session = Session::console();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    print!("aytdb> ");
    let _ = stdout.flush();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            print!("aytdb> ");
            let _ = stdout.flush();
            continue;
        }

        match dispatch(&db, &mut session, &line, false) {
            Reply::Close => break,
            reply => {
                let bytes = reply.to_wire();
                let _ = stdout.write_all(&bytes);
            }
        }

        print!("aytdb> ");
        let _ = stdout.flush();
    }
}

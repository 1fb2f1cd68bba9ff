//! Command dispatcher (spec.md §4.F, §6.3): translates a parsed text
//! command into a call on [`crate::AytDb`] and formats a reply.
//!
//! The core stays oblivious to authentication (spec.md §4.F's closing
//! sentence); a [`Session`] carries the authenticated flag and is owned by
//! whichever front-end (console or TCP server) is driving the dispatcher.

use crate::common::DEFAULT_PASSWORD;
use crate::AytDb;

/// Per-connection state the dispatcher consults but never persists.
pub struct Session {
    pub authenticated: bool,
    pub password: String,
}

impl Session {
    /// A console session is implicitly authenticated — there is no
    /// connection boundary to protect (spec.md §4.F covers the *networked*
    /// front-end's auth gate only).
    pub fn console() -> Self {
        Session {
            authenticated: true,
            password: DEFAULT_PASSWORD.to_string(),
        }
    }

    /// A freshly-accepted TCP connection starts unauthenticated.
    pub fn tcp(password: String) -> Self {
        Session {
            authenticated: false,
            password,
        }
    }
}

/// Outcome of dispatching one line. `Close` tells the caller to drop the
/// connection after sending (or not sending) a reply.
pub enum Reply {
    Ok,
    Value(Vec<u8>),
    Null,
    Pong,
    Text(String),
    Error(String),
    Close,
}

impl Reply {
    /// Render the CRLF-terminated wire form a TCP client expects (spec.md
    /// §6.3: "CRLF response terminator").
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = match self {
            Reply::Ok => b"OK".to_vec(),
            Reply::Value(v) => v.clone(),
            Reply::Null => b"NULL".to_vec(),
            Reply::Pong => b"PONG".to_vec(),
            Reply::Text(s) => s.as_bytes().to_vec(),
            Reply::Error(e) => format!("ERROR: {e}").into_bytes(),
            Reply::Close => Vec::new(),
        };
        out.extend_from_slice(b"\r\n");
        out
    }
}

const HELP_TEXT: &str = "\
Commands: set <k> <v> | setex <k> <v> <ttl> | get <k> | del <k> | \
save | interval <s> | compact | info | exit | quit\n\
TCP-only: auth <pw> | ping | help | config password <new> | shutdown";

/// Auth-exempt command names (spec.md §4.F / §6.5): these work even on an
/// unauthenticated TCP connection.
fn is_auth_exempt(cmd: &str) -> bool {
    matches!(cmd, "auth" | "ping" | "help" | "info")
}

/// Split a line into tokens, honoring double-quoted segments (spec.md §4.F:
/// "double-quoted tokens supported").
pub fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut tok = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                tok.push(c);
            }
            tokens.push(tok);
        } else {
            let mut tok = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                tok.push(c);
                chars.next();
            }
            tokens.push(tok);
        }
    }
    tokens
}

/// Dispatch one already-tokenized command line against `db`, consulting and
/// updating `session` for auth/shutdown concerns.
pub fn dispatch(db: &AytDb, session: &mut Session, line: &str, tcp: bool) -> Reply {
    let tokens = tokenize(line);
    let Some(cmd) = tokens.first().map(|s| s.to_ascii_lowercase()) else {
        return Reply::Error("empty command".into());
    };

    if tcp && !session.authenticated && !is_auth_exempt(&cmd) {
        return Reply::Error("Authentication required.".into());
    }

    match cmd.as_str() {
        "set" => match (tokens.get(1), tokens.get(2)) {
            (Some(k), Some(v)) => match db.set(k.as_bytes(), v.as_bytes()) {
                Ok(()) => Reply::Ok,
                Err(e) => Reply::Error(e.to_string()),
            },
            _ => Reply::Error("usage: set <key> <value>".into()),
        },
        "setex" => match (tokens.get(1), tokens.get(2), tokens.get(3)) {
            (Some(k), Some(v), Some(ttl)) => match ttl.parse::<u64>() {
                Ok(ttl) => match db.setex(k.as_bytes(), v.as_bytes(), ttl) {
                    Ok(()) => Reply::Ok,
                    Err(e) => Reply::Error(e.to_string()),
                },
                Err(_) => Reply::Error("ttl must be a non-negative integer".into()),
            },
            _ => Reply::Error("usage: setex <key> <value> <ttl>".into()),
        },
        "get" => match tokens.get(1) {
            Some(k) => match db.get(k.as_bytes()) {
                Some(v) => Reply::Value(v),
                None => Reply::Null,
            },
            None => Reply::Error("usage: get <key>".into()),
        },
        "del" => match tokens.get(1) {
            Some(k) => {
                db.del(k.as_bytes());
                Reply::Ok
            }
            None => Reply::Error("usage: del <key>".into()),
        },
        "save" => match db.save() {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::Error(e.to_string()),
        },
        "interval" => match tokens.get(1).and_then(|s| s.parse::<u64>().ok()) {
            Some(secs) => {
                db.schedule_snapshot(secs);
                Reply::Ok
            }
            None => Reply::Error("usage: interval <seconds>".into()),
        },
        "compact" => match db.compact() {
            Ok(()) => Reply::Ok,
            Err(e) => Reply::Error(e.to_string()),
        },
        "info" => Reply::Text(db.info()),
        "exit" | "quit" => Reply::Close,
        "auth" => {
            if !tcp {
                return Reply::Error("auth is only meaningful over a connection".into());
            }
            match tokens.get(1) {
                Some(pw) if *pw == session.password => {
                    session.authenticated = true;
                    Reply::Ok
                }
                Some(_) => Reply::Error("invalid password".into()),
                None => Reply::Error("usage: auth <password>".into()),
            }
        }
        "ping" => Reply::Pong,
        "help" => Reply::Text(HELP_TEXT.to_string()),
        "config" => match (tokens.get(1).map(|s| s.to_ascii_lowercase()), tokens.get(2)) {
            (Some(sub), Some(new_pw)) if sub == "password" => {
                session.password = new_pw.clone();
                Reply::Ok
            }
            _ => Reply::Error("usage: config password <new>".into()),
        },
        "shutdown" => {
            if !tcp {
                return Reply::Error("shutdown is only meaningful over a connection".into());
            }
            Reply::Close
        }
        other => Reply::Error(format!("unknown command: {other}")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Config;

    fn memory_db() -> (AytDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.data_dir = dir.path().to_path_buf();
        (AytDb::open(cfg).unwrap(), dir)
    }

    #[test]
    fn tokenize_honors_quotes() {
        let tokens = tokenize(r#"set k "hello world""#);
        assert_eq!(tokens, vec!["set", "k", "hello world"]);
    }

    #[test]
    fn unauthenticated_tcp_session_is_gated() {
        let (db, _dir) = memory_db();
        let mut session = Session::tcp("password".into());
        match dispatch(&db, &mut session, "set a 1", true) {
            Reply::Error(e) => assert!(e.contains("Authentication")),
            _ => panic!("expected auth error"),
        }
        assert!(matches!(
            dispatch(&db, &mut session, "ping", true),
            Reply::Pong
        ));
    }

    #[test]
    fn auth_then_set_and_get_roundtrip() {
        let (db, _dir) = memory_db();
        let mut session = Session::tcp("password".into());
        assert!(matches!(
            dispatch(&db, &mut session, "auth password", true),
            Reply::Ok
        ));
        assert!(matches!(
            dispatch(&db, &mut session, "set a 1", true),
            Reply::Ok
        ));
        match dispatch(&db, &mut session, "get a", true) {
            Reply::Value(v) => assert_eq!(v, b"1"),
            _ => panic!("expected value"),
        }
    }

    #[test]
    fn console_session_skips_auth_gate() {
        let (db, _dir) = memory_db();
        let mut session = Session::console();
        assert!(matches!(
            dispatch(&db, &mut session, "set a 1", false),
            Reply::Ok
        ));
    }
}

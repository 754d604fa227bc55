mod db;
mod ipc;
mod merge;

use std::io::{self, BufRead, Write};

use serde_json::json;

fn main() {
    if let Err(e) = run() {
        eprintln!("abacusd: {e:?}");
        std::process::exit(1);
    }
}

/// Line-oriented request loop: one JSON request per stdin line, one JSON
/// response per stdout line. EOF on stdin is the shutdown signal.
fn run() -> anyhow::Result<()> {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // The line never parsed, so there is no request id to echo back.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() }
            }),
        };
        writeln!(stdout, "{resp}")?;
        stdout.flush()?;
    }

    Ok(())
}

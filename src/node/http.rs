// Local HTTP driver for the protocol surface. JSON in, JSON out.
// CheckTx, Info and Query take the read lock; block calls take the write lock.

use crate::app::{Application, FinalizeBlockRequest, InitChainRequest};
use crate::node::storage::SnapshotStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

pub type SharedApp = Arc<RwLock<Application>>;

#[derive(Deserialize)]
struct CheckTxRequest {
    tx_hex: String,
}

/// Bind synchronously, then serve each connection on its own thread.
pub fn start_http_server(
    listen_addr: &str,
    app: SharedApp,
    store: Option<Arc<SnapshotStore>>,
) -> io::Result<SocketAddr> {
    let listener = TcpListener::bind(listen_addr)?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, "http driver started");
    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let app = Arc::clone(&app);
                    let store = store.clone();
                    thread::spawn(move || handle_client(stream, app, store));
                }
                Err(err) => warn!(error = %err, "http accept failed"),
            }
        }
    });
    Ok(local_addr)
}

fn handle_client(mut stream: TcpStream, app: SharedApp, store: Option<Arc<SnapshotStore>>) {
    let req = match read_request(&mut stream) {
        Ok(r) => r,
        Err(err) => {
            warn!(error = %err, "bad http request");
            return;
        }
    };
    let (status, body) = route(&req, &app, store.as_deref());
    write_json(&mut stream, status, &body);
}

fn route(req: &Request, app: &SharedApp, store: Option<&SnapshotStore>) -> (u16, String) {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/info") => ok(&app.read().info()),
        ("GET", path) if path.starts_with("/query/") => {
            let query_path = path.trim_start_matches("/query/");
            ok(&app.read().query(query_path))
        }
        ("POST", "/check_tx") => {
            let body: CheckTxRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return error(400, "bad json"),
            };
            let Ok(tx) = hex::decode(body.tx_hex.trim_start_matches("0x")) else {
                return error(400, "bad hex");
            };
            ok(&app.read().check_tx(&tx))
        }
        ("POST", "/init_chain") => {
            let body: InitChainRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return error(400, "bad json"),
            };
            match app.write().init_chain(body) {
                Ok(resp) => ok(&resp),
                Err(err) => error(409, &err.to_string()),
            }
        }
        ("POST", "/finalize_block") => {
            let body: FinalizeBlockRequest = match serde_json::from_slice(&req.body) {
                Ok(b) => b,
                Err(_) => return error(400, "bad json"),
            };
            match app.write().finalize_block(body) {
                Ok(resp) => ok(&resp),
                Err(err) => error(409, &err.to_string()),
            }
        }
        ("POST", "/commit") => {
            let (resp, snapshot) = {
                let mut guard = app.write();
                let resp = guard.commit();
                (resp, guard.snapshot())
            };
            if let Some(store) = store
                && let Err(err) = store.save(&snapshot)
            {
                warn!(height = snapshot.height, error = %err, "snapshot write failed");
            }
            ok(&resp)
        }
        _ => error(404, "not found"),
    }
}

fn ok<T: Serialize>(value: &T) -> (u16, String) {
    match serde_json::to_string(value) {
        Ok(body) => (200, body),
        Err(err) => error(500, &err.to_string()),
    }
}

fn error(status: u16, message: &str) -> (u16, String) {
    (status, json!({ "error": message }).to_string())
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn read_request(stream: &mut TcpStream) -> Result<Request, String> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf).map_err(|e| format!("{}", e))?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let header_end = data
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or("bad request")?
        + 4;
    let mut body = data[header_end..].to_vec();

    let head = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = head.split("\r\n");
    let line = lines.next().ok_or("bad request")?;
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or("bad method")?.to_string();
    let path = parts.next().ok_or("bad path")?.to_string();

    let mut content_len = 0usize;
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_len = value.trim().parse::<usize>().unwrap_or(0);
        }
    }

    while body.len() < content_len {
        let want = (content_len - body.len()).min(buf.len());
        let n = stream.read(&mut buf[..want]).map_err(|e| format!("{}", e))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }

    Ok(Request { method, path, body })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &str) {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        409 => "HTTP/1.1 409 Conflict",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let resp = format!(
        "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status_line,
        body.len(),
        body
    );
    let _ = stream.write_all(resp.as_bytes());
}

// Push-feed listener: length-prefixed JSON observations from the off-chain watcher.
// Frame = u32 little-endian length, then that many bytes of JSON.

use crate::oracle::{IngestError, Observation, OracleCache};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MAX_FRAME_LEN: usize = 8_000_000;

pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "frame too large"))?;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

/// Read one frame. `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("invalid frame length {}", len),
        ));
    }
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data)?;
    Ok(Some(data))
}

/// Ingest one message, then prune that feed's observations outside the retention window.
pub fn handle_message(
    cache: &OracleCache,
    bytes: &[u8],
    retention_secs: u64,
) -> Result<Observation, IngestError> {
    let observation = cache.ingest_bytes(bytes)?;
    if let Observation::Data(d) = &observation
        && let Some(newest) = cache.newest_timestamp(&d.data_feed)
    {
        let removed =
            cache.prune_observations_before(&d.data_feed, newest.saturating_sub(retention_secs));
        if removed > 0 {
            debug!(feed = %d.data_feed, removed, "pruned old observations");
        }
    }
    Ok(observation)
}

pub struct FeedListener {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl FeedListener {
    pub fn start(
        listen_addr: &str,
        cache: OracleCache,
        retention_secs: u64,
    ) -> io::Result<FeedListener> {
        let listener = TcpListener::bind(listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_in = Arc::clone(&shutdown);
        info!(%local_addr, "feed listener started");

        thread::spawn(move || {
            loop {
                if shutdown_in.load(Ordering::Relaxed) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let cache = cache.clone();
                        thread::spawn(move || serve_connection(stream, peer, cache, retention_secs));
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    Err(err) => {
                        warn!(error = %err, "feed listener stopped");
                        break;
                    }
                }
            }
        });

        Ok(FeedListener {
            local_addr,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting; open connections run until their peer disconnects.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn serve_connection(mut stream: TcpStream, peer: SocketAddr, cache: OracleCache, retention_secs: u64) {
    if let Err(err) = stream.set_nonblocking(false) {
        warn!(%peer, error = %err, "feed connection setup failed");
        return;
    }
    debug!(%peer, "feed connection opened");
    loop {
        match read_frame(&mut stream) {
            Ok(Some(bytes)) => {
                if let Err(err) = handle_message(&cache, &bytes, retention_secs) {
                    warn!(%peer, error = %err, "dropping malformed feed message");
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!(%peer, error = %err, "feed connection closed on broken frame");
                break;
            }
        }
    }
    debug!(%peer, "feed connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn frames_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"one").expect("write");
        write_frame(&mut buf, b"two").expect("write");
        let mut cur = Cursor::new(buf);
        assert_eq!(read_frame(&mut cur).expect("read"), Some(b"one".to_vec()));
        assert_eq!(read_frame(&mut cur).expect("read"), Some(b"two".to_vec()));
        assert_eq!(read_frame(&mut cur).expect("read"), None);
    }

    #[test]
    fn rejects_bad_frame_lengths() {
        let mut cur = Cursor::new(0u32.to_le_bytes().to_vec());
        assert!(read_frame(&mut cur).is_err());
        let mut cur = Cursor::new(((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec());
        assert!(read_frame(&mut cur).is_err());
    }

    #[test]
    fn handle_message_prunes_outside_retention() {
        let cache = OracleCache::new();
        for ts in [100u64, 150, 200] {
            let msg = format!(
                r#"{{"MessageType":0,"DataFeed":"btc","DataValue":"{}","DataTimestamp":{}}}"#,
                ts, ts
            );
            handle_message(&cache, msg.as_bytes(), 60).expect("ingest");
        }
        // newest 200, window 60: 100 dropped, 150 and 200 kept
        assert_eq!(cache.observation("btc", 100), None);
        assert_eq!(cache.observation("btc", 150).as_deref(), Some("150"));
        assert_eq!(cache.observation_count(), 2);
    }

    #[test]
    fn listener_ingests_and_survives_malformed_messages() {
        let cache = OracleCache::new();
        let listener = FeedListener::start("127.0.0.1:0", cache.clone(), 3_600).expect("start");

        let mut stream = TcpStream::connect(listener.local_addr()).expect("connect");
        write_frame(&mut stream, b"not json").expect("write");
        write_frame(
            &mut stream,
            br#"{"MessageType":1,"TransactionHash":"0xab","DepositInfo":{"Address":"0x01","Amount":5}}"#,
        )
        .expect("write");
        write_frame(
            &mut stream,
            br#"{"MessageType":0,"DataFeed":"eth","DataValue":"3000","DataTimestamp":42}"#,
        )
        .expect("write");

        assert!(wait_for(|| cache.deposit_count() == 1 && cache.observation_count() == 1));
        assert_eq!(cache.deposit("0xab").expect("deposit").amount, 5);
        assert_eq!(cache.observation("eth", 42).as_deref(), Some("3000"));
        listener.shutdown();
    }
}

#![allow(dead_code)]
//! Shared integration test utilities: a scripted loopback peer.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;
use wsclient_drafts::protocol::handshake::challenge_response;
use wsclient_drafts::{Event, EventKind, WebSocket};

static INIT_LOGGING: Once = Once::new();

/// Upper bound for any single step of a scripted exchange.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test subscriber once per process. Honours `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Peer
// ============================================================================

/// How the peer answers the challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Correct digest.
    Valid,
    /// Sixteen bytes that will not match.
    Corrupt,
}

/// Server end of one accepted connection.
pub struct Peer {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
    /// Request line followed by header lines, as sent.
    pub request: Vec<String>,
}

/// Binds a loopback listener and returns it with a `ws://` URL pointing at it.
pub async fn listen() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, format!("ws://127.0.0.1:{port}/chat?room=1")))
}

/// Accepts one client and completes the upgrade.
///
/// `extra` lines are added to the response headers verbatim.
pub async fn accept(listener: &TcpListener, reply: Reply, extra: &[&str]) -> Result<Peer> {
    let (stream, _) = timeout(STEP_TIMEOUT, listener.accept())
        .await
        .context("client never connected")??;
    handshake(stream, reply, extra).await
}

async fn handshake(stream: TcpStream, reply: Reply, extra: &[&str]) -> Result<Peer> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut request = Vec::new();
    loop {
        let mut line = String::new();
        let n = timeout(STEP_TIMEOUT, reader.read_line(&mut line)).await??;
        ensure!(n > 0, "client closed during upgrade request");
        let line = line.trim_end_matches("\r\n").to_owned();
        if line.is_empty() {
            break;
        }
        request.push(line);
    }

    let mut nonce = [0u8; 8];
    timeout(STEP_TIMEOUT, reader.read_exact(&mut nonce)).await??;

    let key1 = find_header(&request, "Sec-WebSocket-Key1").context("missing key1")?;
    let key2 = find_header(&request, "Sec-WebSocket-Key2").context("missing key2")?;
    let digest = match reply {
        Reply::Valid => challenge_response(&key1, &key2, &nonce)?,
        Reply::Corrupt => [0x42; 16],
    };

    let mut response = String::from(
        "HTTP/1.1 101 WebSocket Protocol Handshake\r\nUpgrade: WebSocket\r\nConnection: Upgrade\r\n",
    );
    for line in extra {
        response.push_str(line);
        response.push_str("\r\n");
    }
    response.push_str("\r\n");

    writer.write_all(response.as_bytes()).await?;
    writer.write_all(&digest).await?;
    writer.flush().await?;

    Ok(Peer {
        reader,
        writer,
        request,
    })
}

fn find_header(request: &[String], name: &str) -> Option<String> {
    request.iter().skip(1).find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        key.eq_ignore_ascii_case(name).then(|| value.to_owned())
    })
}

impl Peer {
    /// Value of a request header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<String> {
        find_header(&self.request, name)
    }

    /// Header names in the order they were sent.
    pub fn header_names(&self) -> Vec<String> {
        self.request
            .iter()
            .skip(1)
            .filter_map(|line| line.split_once(": ").map(|(k, _)| k.to_owned()))
            .collect()
    }

    // ------------------------------------------------------------------------
    // draft76
    // ------------------------------------------------------------------------

    pub async fn send76_text(&mut self, text: &str) -> Result<()> {
        let mut frame = vec![0x00];
        frame.extend_from_slice(text.as_bytes());
        frame.push(0xFF);
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    pub async fn send76_close(&mut self) -> Result<()> {
        self.writer.write_all(&[0xFF, 0x00]).await?;
        Ok(())
    }

    /// Reads one client frame: `Some(text)` for text, `None` for close.
    pub async fn recv76(&mut self) -> Result<Option<String>> {
        let frame_type = timeout(STEP_TIMEOUT, self.reader.read_u8()).await??;
        match frame_type {
            0x00 => {
                let mut data = Vec::new();
                timeout(STEP_TIMEOUT, self.reader.read_until(0xFF, &mut data)).await??;
                ensure!(data.pop() == Some(0xFF), "text frame without sentinel");
                Ok(Some(String::from_utf8(data)?))
            }
            0xFF => {
                let length = self.reader.read_u8().await?;
                ensure!(length == 0x00, "close frame with length {length}");
                Ok(None)
            }
            other => bail!("unexpected frame type {other:#04x}"),
        }
    }

    // ------------------------------------------------------------------------
    // draft03
    // ------------------------------------------------------------------------

    /// Writes one draft03 frame. `first` is the whole first header byte.
    pub async fn send03(&mut self, first: u8, payload: &[u8]) -> Result<()> {
        let mut frame = vec![first];
        match payload.len() {
            n if n <= 125 => frame.push(n as u8),
            n if n <= 0xFFFF => {
                frame.push(126);
                frame.extend_from_slice(&(n as u16).to_be_bytes());
            }
            n => {
                frame.push(127);
                frame.extend_from_slice(&(n as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(payload);
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    /// Reads one client frame as `(opcode, payload)`.
    pub async fn recv03(&mut self) -> Result<(u8, Vec<u8>)> {
        let first = timeout(STEP_TIMEOUT, self.reader.read_u8()).await??;
        let second = self.reader.read_u8().await?;
        ensure!(first & 0xF0 == 0, "client set MORE or reserved bits");
        let length = match second & 0x7F {
            126 => u64::from(self.reader.read_u16().await?),
            127 => self.reader.read_u64().await?,
            n => u64::from(n),
        };
        let mut payload = vec![0u8; usize::try_from(length)?];
        self.reader.read_exact(&mut payload).await?;
        Ok((first & 0x0F, payload))
    }

    /// Waits for the client to close its end of the connection.
    pub async fn expect_client_eof(&mut self) -> Result<()> {
        let mut rest = Vec::new();
        timeout(STEP_TIMEOUT, self.reader.read_to_end(&mut rest)).await??;
        ensure!(rest.is_empty(), "client sent {} trailing bytes", rest.len());
        Ok(())
    }
}

// ============================================================================
// Event Recording
// ============================================================================

/// Records every event a socket raises.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(socket: &WebSocket) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.events);
        socket.add_listener(move |event: &Event| sink.lock().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(Event::message)
            .filter_map(|m| m.as_text().ok().map(|t| t.into_owned()))
            .collect()
    }

    pub fn states(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter(|e| e.kind() == EventKind::ReadyState)
            .map(|e| e.ready_state().to_string())
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(Event::error)
            .map(ToString::to_string)
            .collect()
    }
}

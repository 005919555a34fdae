//! Key challenge and upgrade exchange.
//!
//! The client sends two keys and an 8-byte nonce. Each key hides a number:
//! its digits, read in order, divided by its count of spaces. The server
//! proves it understood the upgrade by replying with
//!
//! ```text
//! MD5( be32(value(key1)) ++ be32(value(key2)) ++ nonce )
//! ```
//!
//! # Key layout
//!
//! A key is built from `n = (r + 1000) * d` with `d` in `1..=8`:
//!
//! 1. the decimal digits of `n`
//! 2. `d` spaces inserted at random positions
//! 3. `len(digits) / 2` random letters (`'A'..='y'`) inserted at random positions
//! 4. one random letter prepended and one appended
//!
//! The wrapping letters keep the spaces off both ends.

// ============================================================================
// Imports
// ============================================================================

use md5::{Digest, Md5};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use super::request::{UpgradeRequest, UpgradeResponse};
use super::{FrameReader, FrameWriter, SocketContext};
use crate::error::{Error, Result};
use crate::state::ReadyState;
use crate::transport::Target;

// ============================================================================
// Constants
// ============================================================================

/// Length of the client nonce sent after the request headers.
pub const NONCE_LEN: usize = 8;

/// Length of the server's digest reply.
pub const RESPONSE_LEN: usize = 16;

/// Filler letters are drawn from this code point range.
const LETTER_RANGE: std::ops::Range<u8> = 65..122;

// ============================================================================
// HandshakeChallenge
// ============================================================================

/// The two keys and nonce sent with one upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeChallenge {
    key1: String,
    key2: String,
    nonce: [u8; NONCE_LEN],
}

impl HandshakeChallenge {
    /// Generates a fresh challenge from the thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let key1 = generate_key(&mut rng);
        let key2 = generate_key(&mut rng);
        let nonce = rng.random();
        Self { key1, key2, nonce }
    }

    /// Creates a challenge from known parts.
    #[must_use]
    pub fn new(key1: impl Into<String>, key2: impl Into<String>, nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            key1: key1.into(),
            key2: key2.into(),
            nonce,
        }
    }

    /// Value of the `Sec-WebSocket-Key1` header.
    #[inline]
    #[must_use]
    pub fn key1(&self) -> &str {
        &self.key1
    }

    /// Value of the `Sec-WebSocket-Key2` header.
    #[inline]
    #[must_use]
    pub fn key2(&self) -> &str {
        &self.key2
    }

    /// Nonce sent after the request headers.
    #[inline]
    #[must_use]
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Digest the server must send back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if either key does not encode a value.
    pub fn expected_response(&self) -> Result<[u8; RESPONSE_LEN]> {
        challenge_response(&self.key1, &self.key2, &self.nonce)
    }

    /// Checks the server's reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeMismatch`] if the bytes differ.
    pub fn verify(&self, actual: &[u8; RESPONSE_LEN]) -> Result<()> {
        let expected = self.expected_response()?;
        if &expected != actual {
            return Err(Error::handshake_mismatch(expected, *actual));
        }
        Ok(())
    }
}

// ============================================================================
// Key Functions
// ============================================================================

/// Generates one handshake key.
pub fn generate_key<R: Rng + ?Sized>(rng: &mut R) -> String {
    let spaces = rng.random_range(1..=8u32);
    let number = (rng.random_range(0..1_000_000u32) + 1000) * spaces;
    let digits = number.to_string();

    let mut key: Vec<char> = digits.chars().collect();
    for _ in 0..spaces {
        let index = rng.random_range(0..key.len());
        key.insert(index, ' ');
    }
    for _ in 0..digits.len() / 2 {
        let index = rng.random_range(0..key.len());
        key.insert(index, random_letter(rng));
    }
    key.insert(0, random_letter(rng));
    key.push(random_letter(rng));

    key.into_iter().collect()
}

fn random_letter<R: Rng + ?Sized>(rng: &mut R) -> char {
    char::from(rng.random_range(LETTER_RANGE))
}

/// Splits a key into the number formed by its digits and its space count.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the key has no digits, no spaces, or more
/// digits than fit in a `u64`.
pub fn key_parts(key: &str) -> Result<(u64, u64)> {
    let mut number: u64 = 0;
    let mut spaces: u64 = 0;
    let mut saw_digit = false;

    for c in key.chars() {
        if c == ' ' {
            spaces += 1;
        } else if let Some(digit) = c.to_digit(10) {
            saw_digit = true;
            number = number
                .checked_mul(10)
                .and_then(|n| n.checked_add(u64::from(digit)))
                .ok_or_else(|| Error::protocol("handshake key number overflows"))?;
        }
    }

    if !saw_digit {
        return Err(Error::protocol("handshake key has no digits"));
    }
    if spaces == 0 {
        return Err(Error::protocol("handshake key has no spaces"));
    }
    Ok((number, spaces))
}

/// Decodes the value a key stands for: digits divided by spaces.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if the key is malformed or the value does not
/// fit in 32 bits.
pub fn key_value(key: &str) -> Result<u32> {
    let (number, spaces) = key_parts(key)?;
    u32::try_from(number / spaces)
        .map_err(|_| Error::protocol("handshake key value exceeds 32 bits"))
}

/// Computes the 16-byte digest for a pair of keys and a nonce.
///
/// Servers use the same function to answer a challenge.
///
/// # Errors
///
/// Returns [`Error::Protocol`] if either key is malformed.
pub fn challenge_response(
    key1: &str,
    key2: &str,
    nonce: &[u8; NONCE_LEN],
) -> Result<[u8; RESPONSE_LEN]> {
    let mut hasher = Md5::new();
    hasher.update(key_value(key1)?.to_be_bytes());
    hasher.update(key_value(key2)?.to_be_bytes());
    hasher.update(nonce);

    let mut digest = [0u8; RESPONSE_LEN];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

// ============================================================================
// Upgrade Exchange
// ============================================================================

/// Sends the upgrade request and checks the reply.
///
/// On success the response headers are stored on the socket and it moves to
/// Open. `extra` headers go right after the keys.
pub(crate) async fn perform(
    socket: &dyn SocketContext,
    target: &Target,
    input: &mut FrameReader,
    output: &mut FrameWriter,
    extra: &[(&str, &str)],
) -> Result<()> {
    let challenge = HandshakeChallenge::generate();
    let request = UpgradeRequest::new(
        target,
        &challenge,
        &socket.requested_protocols(),
        extra,
        &socket.request_headers(),
    )?;

    debug!(
        resource = request.resource(),
        headers = request.headers().len(),
        "Sending upgrade request"
    );
    output.write_all(&request.to_bytes()).await?;
    output.write_all(challenge.nonce()).await?;
    output.flush().await?;

    let response = UpgradeResponse::read(input).await?;
    trace!(status = response.status_line(), "Upgrade response received");
    socket.set_response_headers(response.into_headers());

    let mut reply = [0u8; RESPONSE_LEN];
    input.read_exact(&mut reply).await?;

    if socket.verify_handshake() {
        challenge.verify(&reply)?;
    } else {
        debug!("Handshake digest check disabled");
    }

    socket.set_ready_state(ReadyState::Open);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

//! Frame Codec
//!
//! Length-prefixed text framing for the Nim wire protocol:
//!
//! ```text
//! '0' '|' D D '|' TYPE '|' field '|' ... '|'
//!  │       │      └──────── payload (DD bytes) ───┘
//!  │       └── two ASCII digits, payload length
//!  └── protocol version
//! ```
//!
//! Decoding is two-stage: a fixed-grammar header reader followed by an
//! exact-length payload read, then explicit tokenization on `|`. The codec
//! knows nothing about game semantics; see `protocol` for the typed view.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version byte.
pub const PROTOCOL_VERSION: u8 = b'0';

/// Field delimiter.
pub const DELIMITER: u8 = b'|';

/// Largest length any message may declare.
pub const MAX_MESSAGE_LEN: usize = 104;

/// Largest payload the two-digit header can carry.
pub const MAX_PAYLOAD_LEN: usize = 99;

/// Tokens honored per payload (type + fields).
pub const MAX_TOKENS: usize = 20;

/// Fields honored after the type token.
pub const MAX_FIELDS: usize = MAX_TOKENS - 1;

/// Width of a message type code.
pub const TYPE_CODE_LEN: usize = 4;

// =============================================================================
// ERRORS
// =============================================================================

/// Failure while reading a frame.
///
/// `Closed` is a peer disconnect, every other variant is a malformed frame.
/// Callers must keep the two apart: a closed peer is never sent a FAIL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Read returned end-of-stream or an I/O error.
    #[error("connection closed")]
    Closed,

    /// First byte was not the protocol version.
    #[error("bad protocol version byte {0:#04x}")]
    BadVersion(u8),

    /// A header delimiter was not `|`.
    #[error("expected '|' delimiter, found {0:#04x}")]
    BadDelimiter(u8),

    /// Length digits were not digits, or declared an unusable length.
    #[error("bad length field {0:?}")]
    BadLength([u8; 2]),

    /// Payload did not end with `|`.
    #[error("payload does not end with '|'")]
    MissingTerminator,

    /// Payload had an empty type token.
    #[error("payload has no message type")]
    MissingType,
}

impl DecodeError {
    /// True when the peer went away rather than sending garbage.
    pub fn is_closed(&self) -> bool {
        matches!(self, DecodeError::Closed)
    }
}

/// Failure while building a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Payload does not fit in the two-digit length header.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_LEN}-byte frame limit")]
    TooLong(usize),

    /// A token contains the delimiter and would split on decode.
    #[error("token {0:?} contains the '|' delimiter")]
    DelimiterInToken(String),
}

/// Failure while sending a frame.
///
/// Any send failure ends the conversation on that connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// Message could not be framed.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Write failed or was short.
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// FRAME & MESSAGE
// =============================================================================

/// One length-prefixed unit of wire data, header already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    /// Declared (and actual) payload length.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Frames always carry at least the terminating `|`.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Raw payload bytes, terminator included.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Tokenize the payload into a message.
    ///
    /// The terminal `|` is stripped, the rest split on `|`. The first token is
    /// the type (truncated to four characters); at most 19 fields follow and
    /// any excess is dropped. Empty interior fields are kept.
    pub fn into_message(self) -> Result<Message, DecodeError> {
        let body = match self.payload.split_last() {
            Some((&DELIMITER, body)) => body,
            _ => return Err(DecodeError::MissingTerminator),
        };

        let mut tokens = body.split(|&b| b == DELIMITER).take(MAX_TOKENS);

        let kind = match tokens.next() {
            Some(token) if !token.is_empty() => {
                let code = &token[..token.len().min(TYPE_CODE_LEN)];
                String::from_utf8_lossy(code).into_owned()
            }
            _ => return Err(DecodeError::MissingType),
        };

        let fields = tokens
            .map(|token| String::from_utf8_lossy(token).into_owned())
            .collect();

        Ok(Message { kind, fields })
    }
}

/// Typed, field-decomposed content of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: String,
    fields: Vec<String>,
}

impl Message {
    /// Build a message from a type code and its fields.
    pub fn new<K, I, F>(kind: K, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        Self {
            kind: kind.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Four-character type code as received (not validated).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Fields after the type token.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Field at `index`, if present.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Payload bytes: `type|f1|...|fn|`.
    pub fn to_payload(&self) -> Result<Vec<u8>, EncodeError> {
        let mut payload = Vec::with_capacity(MAX_PAYLOAD_LEN);

        for token in std::iter::once(&self.kind).chain(self.fields.iter()) {
            if token.as_bytes().contains(&DELIMITER) {
                return Err(EncodeError::DelimiterInToken(token.clone()));
            }
            payload.extend_from_slice(token.as_bytes());
            payload.push(DELIMITER);
        }

        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EncodeError::TooLong(payload.len()));
        }

        Ok(payload)
    }

    /// Complete wire bytes: `0|LL|payload`.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = self.to_payload()?;

        let mut bytes = Vec::with_capacity(payload.len() + 5);
        bytes.push(PROTOCOL_VERSION);
        bytes.push(DELIMITER);
        bytes.extend_from_slice(format!("{:02}", payload.len()).as_bytes());
        bytes.push(DELIMITER);
        bytes.extend_from_slice(&payload);

        Ok(bytes)
    }
}

// =============================================================================
// STREAM I/O
// =============================================================================

/// Encode `kind` and `fields` into wire bytes.
pub fn encode<S: AsRef<str>>(kind: &str, fields: &[S]) -> Result<Vec<u8>, EncodeError> {
    Message::new(kind, fields.iter().map(|f| f.as_ref().to_owned())).encode()
}

async fn read_byte<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u8, DecodeError> {
    reader.read_u8().await.map_err(|_| DecodeError::Closed)
}

async fn expect_delimiter<R: AsyncRead + Unpin>(reader: &mut R) -> Result<(), DecodeError> {
    match read_byte(reader).await? {
        DELIMITER => Ok(()),
        other => Err(DecodeError::BadDelimiter(other)),
    }
}

/// Read one frame.
///
/// The header is read byte by byte so that a malformed prefix is rejected
/// without waiting for bytes that may never come. The payload is read to its
/// exact declared length, across however many partial reads it takes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, DecodeError> {
    let version = read_byte(reader).await?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(version));
    }

    expect_delimiter(reader).await?;

    let digits = [read_byte(reader).await?, read_byte(reader).await?];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(DecodeError::BadLength(digits));
    }
    let len = usize::from(digits[0] - b'0') * 10 + usize::from(digits[1] - b'0');
    if len == 0 || len > MAX_MESSAGE_LEN {
        return Err(DecodeError::BadLength(digits));
    }

    expect_delimiter(reader).await?;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|_| DecodeError::Closed)?;

    if payload.last() != Some(&DELIMITER) {
        return Err(DecodeError::MissingTerminator);
    }

    Ok(Frame { payload })
}

/// Read and tokenize one message.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, DecodeError> {
    read_frame(reader).await?.into_message()
}

/// Write one message as a single logical write.
///
/// A short write surfaces as an error; the caller must not continue the
/// conversation on this connection afterwards.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), SendError> {
    let bytes = message.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

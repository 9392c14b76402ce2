//! Frame tokenizer for the PepTalk wire format.
//!
//! ## Wire format
//!
//! ```text
//! frame    := request_id SP kind (SP field)* LINEBREAK
//! field    := token | literal
//! literal  := "{" length "}" <exactly length raw bytes>
//! token    := any run of non-whitespace bytes
//! ```
//!
//! A literal body is copied verbatim, so it may carry spaces or control
//! bytes. Tokenizing never panics: a bad frame yields a [`FrameError`]
//! and only that frame is lost.

use std::borrow::Cow;
use std::fmt;

use crate::error::FrameError;

// ── Field ────────────────────────────────────────────────────────

/// One atomic token of a frame, as raw bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Field(Vec<u8>);

impl Field {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// UTF-8 view of the field; invalid sequences become U+FFFD.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl PartialEq<str> for Field {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for Field {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

// ── Message ──────────────────────────────────────────────────────

/// A tokenized frame: `request_id kind args...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub request_id: String,
    pub kind: String,
    pub args: Vec<Field>,
}

impl Message {
    /// The request id as a number, when the engine echoed one of ours.
    pub fn numeric_id(&self) -> Option<u64> {
        self.request_id.parse().ok()
    }

    /// Positional argument `index` as text, or `""` when absent.
    pub fn arg(&self, index: usize) -> Cow<'_, str> {
        self.args
            .get(index)
            .map(Field::as_str)
            .unwrap_or(Cow::Borrowed(""))
    }

    /// Arguments from `start` onwards joined by single spaces.
    pub fn rest(&self, start: usize) -> String {
        self.args
            .iter()
            .skip(start)
            .map(|f| f.as_str().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ── Tokenizer ────────────────────────────────────────────────────

fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\r'
}

fn is_token_end(b: u8) -> bool {
    b == b' ' || b == b'\r' || b == b'\n'
}

/// Split one frame into fields.
pub fn tokenize(frame: &[u8]) -> Result<Vec<Field>, FrameError> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < frame.len() {
        while pos < frame.len() && is_separator(frame[pos]) {
            pos += 1;
        }
        if pos >= frame.len() {
            break;
        }

        if frame[pos] == b'{' {
            let close = frame[pos + 1..]
                .iter()
                .position(|&b| b == b'}')
                .map(|i| pos + 1 + i)
                .ok_or(FrameError::UnterminatedLiteral { offset: pos })?;

            let digits = &frame[pos + 1..close];
            let declared = parse_length(digits)?;

            let start = close + 1;
            let available = frame.len() - start;
            if declared > available {
                return Err(FrameError::TruncatedLiteral {
                    declared,
                    available,
                });
            }
            fields.push(Field::new(&frame[start..start + declared]));
            pos = start + declared;
        } else {
            let start = pos;
            while pos < frame.len() && !is_token_end(frame[pos]) {
                pos += 1;
            }
            fields.push(Field::new(&frame[start..pos]));
            if pos < frame.len() && frame[pos] == b'\n' {
                break;
            }
        }
    }

    Ok(fields)
}

fn parse_length(digits: &[u8]) -> Result<usize, FrameError> {
    let invalid = || FrameError::InvalidLiteralLength(String::from_utf8_lossy(digits).into_owned());
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(invalid)
}

/// Tokenize a frame and split off the request id and message type.
pub fn parse_message(frame: &[u8]) -> Result<Message, FrameError> {
    let fields = tokenize(frame)?;
    if fields.len() < 2 {
        return Err(FrameError::MissingFields(fields.len()));
    }
    let mut iter = fields.into_iter();
    let request_id = iter.next().map(|f| f.as_str().into_owned()).unwrap_or_default();
    let kind = iter.next().map(|f| f.as_str().into_owned()).unwrap_or_default();
    Ok(Message {
        request_id,
        kind,
        args: iter.collect(),
    })
}

// ── Encoding ─────────────────────────────────────────────────────

/// Render a value as a single wire field.
///
/// Plain values go out as bare tokens; anything empty or containing
/// whitespace or `{` is wrapped as a `{N}` literal.
pub fn encode_field(value: &[u8]) -> Vec<u8> {
    let needs_literal = value.is_empty()
        || value
            .iter()
            .any(|&b| b.is_ascii_whitespace() || b == b'{' || b.is_ascii_control());
    if !needs_literal {
        return value.to_vec();
    }
    let mut out = format!("{{{}}}", value.len()).into_bytes();
    out.extend_from_slice(value);
    out
}

// ── Tests ────────────────────────────────────────────────────────

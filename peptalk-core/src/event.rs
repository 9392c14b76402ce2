//! Typed protocol events and the interpreter that produces them.
//!
//! Interpretation dispatches on the message type and the shape of the
//! arguments. It never fails: anything it cannot place becomes
//! [`ProtocolEvent::Unrecognized`].

use std::fmt;

use crate::frame::Message;

/// Attribute that reports whether an element is running on air.
pub const CAROUSEL_STATUS: &str = "carousel_status";

/// Prefix of per-feed carousel attributes (`active_<feed>`).
pub const ACTIVE_PREFIX: &str = "active_";

const STATUS_RUN: &str = "run";
const UNKNOWN: &str = "unknown";

// ── ProtocolEvent ────────────────────────────────────────────────

/// The closed set of events the client reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// An element started playing (`carousel_status` became `run`).
    ElementPlaying { path: String, element_id: String },

    /// A carousel feed switched to a new element. An empty
    /// `element_id` means the feed went idle.
    CarouselActive {
        path: String,
        feed: String,
        element_id: String,
    },

    /// `carousel_status` moved away from `run` on a node.
    AttributeChanged { node_id: String, attr_name: String },

    /// Handshake reply listing the engine's protocol capabilities.
    ProtocolAck { capabilities: Vec<String> },

    /// `ok` reply to one of our commands.
    CommandAck { request_id: String, extra: Vec<String> },

    /// `error` reply to one of our commands.
    CommandError { request_id: String, message: String },

    /// A node was created.
    Insert { path: String, payload: String },

    Unrecognized,
}

impl ProtocolEvent {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ElementPlaying { .. } => "ElementPlaying",
            Self::CarouselActive { .. } => "CarouselActive",
            Self::AttributeChanged { .. } => "AttributeChanged",
            Self::ProtocolAck { .. } => "ProtocolAck",
            Self::CommandAck { .. } => "CommandAck",
            Self::CommandError { .. } => "CommandError",
            Self::Insert { .. } => "Insert",
            Self::Unrecognized => "Unrecognized",
        }
    }
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElementPlaying { path, element_id } => {
                write!(f, "playing {element_id} ({path})")
            }
            Self::CarouselActive {
                path,
                feed,
                element_id,
            } => write!(f, "carousel {path} feed {feed} -> {element_id:?}"),
            Self::AttributeChanged { node_id, attr_name } => {
                write!(f, "changed {node_id} {attr_name}")
            }
            Self::ProtocolAck { capabilities } => {
                write!(f, "protocol {}", capabilities.join(" "))
            }
            Self::CommandAck { request_id, .. } => write!(f, "ok #{request_id}"),
            Self::CommandError {
                request_id,
                message,
            } => write!(f, "error #{request_id}: {message}"),
            Self::Insert { path, .. } => write!(f, "insert {path}"),
            Self::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

// ── Interpreter ──────────────────────────────────────────────────

/// Turn a tokenized frame into a [`ProtocolEvent`].
pub fn interpret(msg: &Message) -> ProtocolEvent {
    match msg.kind.as_str() {
        "protocol" => ProtocolEvent::ProtocolAck {
            capabilities: msg.args.iter().map(|f| f.as_str().into_owned()).collect(),
        },
        "ok" => ProtocolEvent::CommandAck {
            request_id: msg.request_id.clone(),
            extra: msg.args.iter().map(|f| f.as_str().into_owned()).collect(),
        },
        "error" => ProtocolEvent::CommandError {
            request_id: msg.request_id.clone(),
            message: msg.rest(0),
        },
        "set" => interpret_set(msg),
        "node" => interpret_node(msg),
        "changed" => interpret_changed(msg),
        "insert" if !msg.args.is_empty() => ProtocolEvent::Insert {
            path: msg.arg(0).into_owned(),
            payload: msg.rest(1),
        },
        _ => ProtocolEvent::Unrecognized,
    }
}

/// `set <path> <attr> <value...>`
fn interpret_set(msg: &Message) -> ProtocolEvent {
    if msg.args.len() < 2 {
        return ProtocolEvent::Unrecognized;
    }
    let path = msg.arg(0);
    let attr = msg.arg(1);
    let value = msg.rest(2);

    if attr == CAROUSEL_STATUS {
        if value == STATUS_RUN {
            return ProtocolEvent::ElementPlaying {
                element_id: ElementPath::parse(&path).element_id,
                path: path.into_owned(),
            };
        }
        return ProtocolEvent::Unrecognized;
    }

    match attr.strip_prefix(ACTIVE_PREFIX) {
        Some(feed) if !feed.is_empty() => ProtocolEvent::CarouselActive {
            path: path.into_owned(),
            feed: feed.to_string(),
            element_id: value,
        },
        _ => ProtocolEvent::Unrecognized,
    }
}

/// `node <parent> <previous> <self> <next> <name> <type> [attr value]*`
fn interpret_node(msg: &Message) -> ProtocolEvent {
    const SELF: usize = 2;
    const NAME: usize = 4;
    const TYPE: usize = 5;
    const ATTRS: usize = 6;

    if msg.args.len() < ATTRS || msg.arg(TYPE) != "element" {
        return ProtocolEvent::Unrecognized;
    }

    let running = msg.args[ATTRS..]
        .chunks(2)
        .any(|pair| pair.len() == 2 && pair[0] == CAROUSEL_STATUS && pair[1] == STATUS_RUN);
    if !running {
        return ProtocolEvent::Unrecognized;
    }

    let path = msg.arg(SELF).into_owned();
    let name = msg.arg(NAME);
    let element_id = if name.is_empty() {
        ElementPath::parse(&path).element_id
    } else {
        name.into_owned()
    };
    ProtocolEvent::ElementPlaying { path, element_id }
}

/// `changed <node> <attr> [old...]`
fn interpret_changed(msg: &Message) -> ProtocolEvent {
    if msg.args.len() < 2 || msg.arg(1) != CAROUSEL_STATUS {
        return ProtocolEvent::Unrecognized;
    }
    ProtocolEvent::AttributeChanged {
        node_id: msg.arg(0).into_owned(),
        attr_name: msg.arg(1).into_owned(),
    }
}

// ── ElementPath ──────────────────────────────────────────────────

/// Show, playlist and element id recovered from a storage path such as
/// `/storage/shows/NewsAM/playlists/Main/elements/E1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPath {
    pub show_name: String,
    pub playlist_name: String,
    pub element_id: String,
}

impl ElementPath {
    pub fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let after = |marker: &str, last: bool| -> Option<String> {
            let mut hits = segments.iter().enumerate().filter(|(_, s)| **s == marker);
            let hit = if last { hits.last() } else { hits.next() };
            hit.and_then(|(i, _)| segments.get(i + 1))
                .map(|s| s.to_string())
        };

        let element_id = after("elements", true)
            .or_else(|| segments.last().map(|s| s.to_string()))
            .unwrap_or_else(|| path.to_string());

        Self {
            show_name: after("shows", false).unwrap_or_else(|| UNKNOWN.to_string()),
            playlist_name: after("playlists", false).unwrap_or_else(|| UNKNOWN.to_string()),
            element_id,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

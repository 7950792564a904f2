//! Wire encoding of the messages the core hands to the backend.
//!
//! Every backend message starts with a [`MessageHeader`] naming the protocol
//! version and [`MessageKind`]. Action fragments follow it with a
//! [`FragmentHeader`] and the raw fragment bytes; flow-control messages follow
//! it with an opaque body, usually an encoded [`FlowControlMessage`]; state
//! messages carry the sender's group identity and last ordered seqno while
//! members agree on where numbering resumes. Integers use fixed-width
//! little-endian encoding so header overhead is constant and packet-size
//! arithmetic can subtract it exactly.
//!
//! The layout of an action fragment is:
//! `[version u8][kind u32][FragmentHeader][fragment payload]`.

use std::num::NonZeroUsize;

use bincode::{
    Decode,
    Encode,
    config::{self, Config},
    decode_from_slice,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;

use crate::{
    action::ActionType,
    backend::View,
    flow_control::FlowControlMessage,
    fragment::{ActionId, FragmentHeader, FragmentIndex},
    seqno::{GroupId, MemberId, Seqno},
};

/// Version stamped into every message this crate emits.
pub const PROTOCOL_VERSION: u8 = 0;

/// Discriminates the body that follows a [`MessageHeader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub enum MessageKind {
    /// One fragment of an action.
    Fragment,
    /// Receive-pressure signal.
    FlowControl,
    /// Ordering state announced after a membership change.
    State,
}

/// Fixed prefix of every backend message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct MessageHeader {
    version: u8,
    kind: MessageKind,
}

impl MessageHeader {
    /// Header for the current protocol version.
    #[must_use]
    pub const fn new(kind: MessageKind) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
        }
    }

    /// Protocol version of the message.
    #[must_use]
    pub const fn version(&self) -> u8 { self.version }

    /// Kind of body that follows.
    #[must_use]
    pub const fn kind(&self) -> MessageKind { self.kind }
}

/// Decoded view of an inbound backend message.
#[derive(Debug, PartialEq, Eq)]
pub enum CoreMessage<'a> {
    /// One fragment of an action.
    Fragment {
        /// Fragment metadata.
        header: FragmentHeader,
        /// Fragment payload bytes.
        payload: &'a [u8],
    },
    /// Flow-control body, surfaced to the application as is.
    FlowControl {
        /// Opaque body bytes.
        body: &'a [u8],
    },
    /// A member's ordering state for the group it names.
    State {
        /// Group the sender believes it is announcing to.
        group: GroupId,
        /// Last seqno the sender ordered.
        last: Seqno,
    },
}

#[derive(Encode, Decode)]
struct ViewRecord {
    group: [u8; 16],
    primary: bool,
    members: Vec<MemberId>,
    last: Seqno,
}

#[derive(Encode, Decode)]
struct StateRecord {
    group: [u8; 16],
    last: Seqno,
}

fn wire_config() -> impl Config { config::standard().with_fixed_int_encoding() }

/// Bytes every fragment spends on headers, excluding the fragment payload.
///
/// # Panics
///
/// Panics if encoding a constant header fails, which would indicate a
/// programmer error in the header definitions.
#[must_use]
pub fn fragment_overhead() -> NonZeroUsize {
    let message = MessageHeader::new(MessageKind::Fragment);
    let fragment = FragmentHeader::new(
        ActionId::new(0),
        FragmentIndex::FIRST,
        false,
        0,
        ActionType::Replication,
    );
    let encoded = encode_to_vec(message, wire_config())
        .and_then(|head| Ok(head.len() + encode_to_vec(fragment, wire_config())?.len()))
        .unwrap_or_else(|err| panic!("header encoding must be infallible for constants: {err}"));
    NonZeroUsize::new(encoded)
        .unwrap_or_else(|| panic!("fragment overhead must be non-zero (computed {encoded})"))
}

/// Encode an action fragment for the backend.
///
/// # Errors
///
/// Returns an [`EncodeError`] if a header cannot be encoded.
pub fn encode_fragment(header: &FragmentHeader, payload: &[u8]) -> Result<Bytes, EncodeError> {
    let mut buf = encode_to_vec(MessageHeader::new(MessageKind::Fragment), wire_config())?;
    buf.extend_from_slice(&encode_to_vec(*header, wire_config())?);
    buf.extend_from_slice(payload);
    Ok(Bytes::from(buf))
}

/// Encode a flow-control message with an opaque `body` for the backend.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the header cannot be encoded.
pub fn encode_flow_control(body: &[u8]) -> Result<Bytes, EncodeError> {
    let mut buf = encode_to_vec(MessageHeader::new(MessageKind::FlowControl), wire_config())?;
    buf.extend_from_slice(body);
    Ok(Bytes::from(buf))
}

/// Encode a state message announcing `last` as the sender's final seqno
/// on entering `group`.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the message cannot be encoded.
pub fn encode_state(group: GroupId, last: Seqno) -> Result<Bytes, EncodeError> {
    let mut buf = encode_to_vec(MessageHeader::new(MessageKind::State), wire_config())?;
    let record = StateRecord {
        group: group.to_bytes(),
        last,
    };
    buf.extend_from_slice(&encode_to_vec(record, wire_config())?);
    Ok(Bytes::from(buf))
}

/// Decode an inbound backend message.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the message is truncated, carries an
/// unknown protocol version, or has a malformed header.
pub fn decode_message(bytes: &[u8]) -> Result<CoreMessage<'_>, DecodeError> {
    let (header, consumed) = decode_from_slice::<MessageHeader, _>(bytes, wire_config())?;
    if header.version() != PROTOCOL_VERSION {
        return Err(DecodeError::OtherString(format!(
            "unsupported protocol version {}",
            header.version()
        )));
    }
    let body = bytes.get(consumed..).unwrap_or_default();

    match header.kind() {
        MessageKind::Fragment => {
            let (header, used) = decode_from_slice::<FragmentHeader, _>(body, wire_config())?;
            Ok(CoreMessage::Fragment {
                header,
                payload: body.get(used..).unwrap_or_default(),
            })
        }
        MessageKind::FlowControl => Ok(CoreMessage::FlowControl { body }),
        MessageKind::State => {
            let (record, _) = decode_from_slice::<StateRecord, _>(body, wire_config())?;
            Ok(CoreMessage::State {
                group: GroupId::from_bytes(record.group),
                last: record.last,
            })
        }
    }
}

/// Encode the body of a flow-control action as surfaced to the application.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the message cannot be encoded.
pub fn encode_flow_control_body(message: &FlowControlMessage) -> Result<Bytes, EncodeError> {
    encode_to_vec(*message, wire_config()).map(Bytes::from)
}

/// Decode the body of a flow-control message.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the body is malformed.
pub fn decode_flow_control(body: &[u8]) -> Result<FlowControlMessage, DecodeError> {
    decode_from_slice::<FlowControlMessage, _>(body, wire_config()).map(|(message, _)| message)
}

/// Encode the seqno payload of a `LastApplied`, `Join` or `Sync` action.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the value cannot be encoded.
pub fn encode_seqno(seqno: Seqno) -> Result<Bytes, EncodeError> {
    encode_to_vec(seqno, wire_config()).map(Bytes::from)
}

/// Decode the seqno payload of a `LastApplied`, `Join` or `Sync` action.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the payload is malformed.
pub fn decode_seqno(payload: &[u8]) -> Result<Seqno, DecodeError> {
    decode_from_slice::<Seqno, _>(payload, wire_config()).map(|(seqno, _)| seqno)
}

/// Encode a membership view as the payload of a `Configuration` action,
/// together with the seqno of the last action ordered before it.
///
/// # Errors
///
/// Returns an [`EncodeError`] if the view cannot be encoded.
pub fn encode_configuration(view: &View, last: Seqno) -> Result<Bytes, EncodeError> {
    let record = ViewRecord {
        group: view.group().to_bytes(),
        primary: view.is_primary(),
        members: view.members().to_vec(),
        last,
    };
    encode_to_vec(record, wire_config()).map(Bytes::from)
}

/// Decode the payload of a `Configuration` action.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the payload is malformed.
pub fn decode_configuration(payload: &[u8]) -> Result<(View, Seqno), DecodeError> {
    let (record, _) = decode_from_slice::<ViewRecord, _>(payload, wire_config())?;
    let view = View::new(
        GroupId::from_bytes(record.group),
        record.primary,
        record.members,
    );
    Ok((view, record.last))
}

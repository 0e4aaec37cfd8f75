//! Binary codec for encoding and decoding tally handshake messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][payload:N]
//! ```
//! Total header size: 8 bytes.  All multi-byte integers are big-endian.
//! Strings are 2-byte length-prefixed UTF-8; optional fields carry a 1-byte
//! presence flag; address lists carry a 2-byte count.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::provision::ProvisionResult;
use crate::domain::reason::RejectReason;
use crate::domain::role::TallyRole;
use crate::protocol::messages::{
    ContactMessage, ContactResponseMessage, DatabaseResultMessage, MessageType, TallyMessage,
    HEADER_SIZE, MAX_PAYLOAD_LEN, PROTOCOL_VERSION,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`TallyMessage`] into a byte vector including the 8-byte header.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if the payload would exceed
/// [`MAX_PAYLOAD_LEN`].
pub fn encode_message(msg: &TallyMessage) -> Result<Vec<u8>, ProtocolError> {
    let payload = encode_payload(msg);
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "payload of {} bytes exceeds maximum of {MAX_PAYLOAD_LEN}",
            payload.len()
        )));
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    // Header: version (1) + msg_type (1) + reserved (2) + payload_len (4) = 8 bytes
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one [`TallyMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed.
pub fn decode_message(bytes: &[u8]) -> Result<(TallyMessage, usize), ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| ProtocolError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "declared payload of {payload_len} bytes exceeds maximum of {MAX_PAYLOAD_LEN}"
        )));
    }

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let msg = decode_payload(msg_type, payload)?;
    Ok((msg, total_needed))
}

/// Reads the declared payload length out of a raw 8-byte header.
///
/// Used by framed stream readers that fetch the header and payload in two
/// reads.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the header is short, the version is wrong,
/// or the declared length exceeds [`MAX_PAYLOAD_LEN`].
pub fn decode_header(bytes: &[u8]) -> Result<usize, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }
    if bytes[0] != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(bytes[0]));
    }
    MessageType::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownMessageType(bytes[1]))?;
    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::MalformedPayload(format!(
            "declared payload of {payload_len} bytes exceeds maximum of {MAX_PAYLOAD_LEN}"
        )));
    }
    Ok(payload_len)
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &TallyMessage) -> Vec<u8> {
    let mut buf = Vec::new();
    match msg {
        TallyMessage::Contact(m) => encode_contact(&mut buf, m),
        TallyMessage::ContactResponse(m) => encode_contact_response(&mut buf, m),
        TallyMessage::DatabaseResult(m) => encode_database_result(&mut buf, m),
    }
    buf
}

fn encode_contact(buf: &mut Vec<u8>, m: &ContactMessage) {
    write_length_prefixed_string(buf, &m.token);
    write_length_prefixed_string(buf, &m.party_id);
    write_optional_bytes(buf, m.identity_bundle.as_deref());
    write_string_list(buf, &m.cadre_peer_addrs);
    write_optional_string(buf, m.idempotency_key.as_deref());
}

fn encode_contact_response(buf: &mut Vec<u8>, m: &ContactResponseMessage) {
    buf.extend_from_slice(m.handshake_id.as_bytes());
    buf.push(if m.approved { 0x01 } else { 0x00 });
    write_optional_string(buf, m.reason.map(RejectReason::as_str));
    write_optional_string(buf, m.party_id.as_deref());
    match &m.cadre_peer_addrs {
        Some(addrs) => {
            buf.push(0x01);
            write_string_list(buf, addrs);
        }
        None => buf.push(0x00),
    }
    match &m.provision {
        Some(p) => {
            buf.push(0x01);
            encode_provision(buf, p);
        }
        None => buf.push(0x00),
    }
}

fn encode_database_result(buf: &mut Vec<u8>, m: &DatabaseResultMessage) {
    buf.extend_from_slice(m.handshake_id.as_bytes());
    encode_provision(buf, &m.provision);
}

fn encode_provision(buf: &mut Vec<u8>, p: &ProvisionResult) {
    write_length_prefixed_string(buf, &p.tally_id);
    buf.push(p.created_by as u8);
    write_length_prefixed_string(buf, &p.endpoint);
    write_length_prefixed_string(buf, &p.credentials_ref);
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<TallyMessage, ProtocolError> {
    match msg_type {
        MessageType::Contact => decode_contact(payload).map(TallyMessage::Contact),
        MessageType::ContactResponse => {
            decode_contact_response(payload).map(TallyMessage::ContactResponse)
        }
        MessageType::DatabaseResult => {
            decode_database_result(payload).map(TallyMessage::DatabaseResult)
        }
    }
}

fn decode_contact(p: &[u8]) -> Result<ContactMessage, ProtocolError> {
    let (token, off) = read_length_prefixed_string(p, 0)?;
    let (party_id, off) = read_length_prefixed_string(p, off)?;
    let (identity_bundle, off) = read_optional_bytes(p, off)?;
    let (cadre_peer_addrs, off) = read_string_list(p, off)?;
    let (idempotency_key, _) = read_optional_string(p, off)?;
    Ok(ContactMessage {
        token,
        party_id,
        identity_bundle,
        cadre_peer_addrs,
        idempotency_key,
    })
}

fn decode_contact_response(p: &[u8]) -> Result<ContactResponseMessage, ProtocolError> {
    let handshake_id = read_uuid(p, 0)?;
    require_len(p, 17, "ContactResponse.approved")?;
    let approved = p[16] != 0;
    let (reason_str, off) = read_optional_string(p, 17)?;
    let reason = reason_str.as_deref().map(RejectReason::from_wire);
    let (party_id, off) = read_optional_string(p, off)?;

    require_len(p, off + 1, "ContactResponse.cadre presence")?;
    let (cadre_peer_addrs, off) = if p[off] != 0 {
        let (addrs, next) = read_string_list(p, off + 1)?;
        (Some(addrs), next)
    } else {
        (None, off + 1)
    };

    require_len(p, off + 1, "ContactResponse.provision presence")?;
    let (provision, _) = if p[off] != 0 {
        let (prov, next) = decode_provision(p, off + 1)?;
        (Some(prov), next)
    } else {
        (None, off + 1)
    };

    Ok(ContactResponseMessage {
        handshake_id,
        approved,
        reason,
        party_id,
        cadre_peer_addrs,
        provision,
    })
}

fn decode_database_result(p: &[u8]) -> Result<DatabaseResultMessage, ProtocolError> {
    let handshake_id = read_uuid(p, 0)?;
    let (provision, _) = decode_provision(p, 16)?;
    Ok(DatabaseResultMessage {
        handshake_id,
        provision,
    })
}

fn decode_provision(p: &[u8], offset: usize) -> Result<(ProvisionResult, usize), ProtocolError> {
    let (tally_id, off) = read_length_prefixed_string(p, offset)?;
    require_len(p, off + 1, "ProvisionResult.created_by")?;
    let created_by = TallyRole::try_from(p[off])
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown tally role: {}", p[off])))?;
    let (endpoint, off) = read_length_prefixed_string(p, off + 1)?;
    let (credentials_ref, off) = read_length_prefixed_string(p, off)?;
    Ok((
        ProvisionResult {
            tally_id,
            created_by,
            endpoint,
            credentials_ref,
        },
        off,
    ))
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, ProtocolError> {
    if buf.len() < offset + 16 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    Ok(Uuid::from_bytes(
        buf[offset..offset + 16].try_into().expect("slice is 16 bytes"),
    ))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(
    buf: &[u8],
    offset: usize,
) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

/// Writes a 1-byte presence flag followed by a length-prefixed string.
fn write_optional_string(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.push(0x01);
            write_length_prefixed_string(buf, s);
        }
        None => buf.push(0x00),
    }
}

fn read_optional_string(
    buf: &[u8],
    offset: usize,
) -> Result<(Option<String>, usize), ProtocolError> {
    require_len(buf, offset + 1, "optional string presence flag")?;
    if buf[offset] == 0 {
        return Ok((None, offset + 1));
    }
    let (s, next) = read_length_prefixed_string(buf, offset + 1)?;
    Ok((Some(s), next))
}

/// Writes a 1-byte presence flag followed by a 4-byte length and the raw bytes.
fn write_optional_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => {
            buf.push(0x01);
            buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
            buf.extend_from_slice(b);
        }
        None => buf.push(0x00),
    }
}

fn read_optional_bytes(
    buf: &[u8],
    offset: usize,
) -> Result<(Option<Vec<u8>>, usize), ProtocolError> {
    require_len(buf, offset + 1, "optional bytes presence flag")?;
    if buf[offset] == 0 {
        return Ok((None, offset + 1));
    }
    let start = offset + 1;
    require_len(buf, start + 4, "optional bytes length")?;
    let len =
        u32::from_be_bytes([buf[start], buf[start + 1], buf[start + 2], buf[start + 3]]) as usize;
    let data_start = start + 4;
    require_len(buf, data_start + len, "optional bytes data")?;
    Ok((Some(buf[data_start..data_start + len].to_vec()), data_start + len))
}

/// Writes a 2-byte count followed by that many length-prefixed strings.
fn write_string_list(buf: &mut Vec<u8>, items: &[String]) {
    let count = items.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&count.to_be_bytes());
    for item in &items[..count as usize] {
        write_length_prefixed_string(buf, item);
    }
}

fn read_string_list(buf: &[u8], offset: usize) -> Result<(Vec<String>, usize), ProtocolError> {
    require_len(buf, offset + 2, "string list count")?;
    let count = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let mut items = Vec::with_capacity(count);
    let mut off = offset + 2;
    for _ in 0..count {
        let (s, next) = read_length_prefixed_string(buf, off)?;
        items.push(s);
        off = next;
    }
    Ok((items, off))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Decoder for the SSH_MSG_KEXINIT binary packet (RFC 4253, section 7.1).
//!
//! Layout of the buffer handed in:
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte      SSH_MSG_KEXINIT
//! byte[16]  cookie
//! string    kex_algorithms ... languages_server_to_client   (name-lists)
//! boolean   first_kex_packet_follows
//! uint32    0 (reserved)
//! byte[n]   padding
//! ```
//!
//! Every name-list is kept as `<declared length>-<text>`, so two lists that only differ in
//! how their text decodes still fingerprint differently.
use thiserror::Error;

/// SSH message number of KEXINIT.
pub const SSH_MSG_KEXINIT: u8 = 0x14;

/// Offset of the message type byte inside the binary packet.
pub const MESSAGE_CODE_OFFSET: usize = 5;

// packet_length + padding_length + message type + cookie
const HEADER_LEN: usize = 4 + 1 + 1 + 16;
// first_kex_packet_follows + reserved
const TRAILER_LEN: usize = 1 + 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KexDecodeError {
    #[error("KEXINIT buffer too short ({len} bytes)")]
    TooShort { len: usize },

    #[error("KEXINIT packet length {declared} does not match {actual} available bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("KEXINIT field length prefix truncated ({remaining} bytes left)")]
    TruncatedLength { remaining: usize },

    #[error("KEXINIT field declares {declared} bytes but only {remaining} remain")]
    TruncatedField { declared: usize, remaining: usize },
}

/// Decoded name-list fields of one KEXINIT, in wire order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KexInitFields(pub Vec<String>);

impl KexInitFields {
    /// Canonical `;`-joined rendering used for fingerprinting and output.
    pub fn canonical(&self) -> String {
        self.0.join(";")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Checks whether a segment payload starts a KEXINIT binary packet.
pub fn is_kexinit_start(payload: &[u8]) -> bool {
    payload.len() > MESSAGE_CODE_OFFSET && payload[MESSAGE_CODE_OFFSET] == SSH_MSG_KEXINIT
}

/// Declared total size (length prefix included) of the binary packet at the start of `buffer`.
pub fn declared_packet_size(buffer: &[u8]) -> Option<usize> {
    let prefix: [u8; 4] = buffer.get(0..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix) as usize + 4)
}

/// Parses a reassembled KEXINIT buffer into its name-list fields.
///
/// Either every field decodes or the whole buffer is rejected.
pub fn decode(buffer: &[u8]) -> Result<KexInitFields, KexDecodeError> {
    if buffer.len() < 5 {
        return Err(KexDecodeError::TooShort { len: buffer.len() });
    }

    let declared = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    let actual = buffer.len() - 4;
    if declared != actual {
        return Err(KexDecodeError::LengthMismatch { declared, actual });
    }

    let padding = buffer[4] as usize;
    let end = buffer
        .len()
        .checked_sub(padding + TRAILER_LEN)
        .filter(|end| *end >= HEADER_LEN)
        .ok_or(KexDecodeError::TooShort { len: buffer.len() })?;

    let mut rest = &buffer[HEADER_LEN..end];
    let mut fields = Vec::new();

    while !rest.is_empty() {
        let (field, tail) = parse_string(rest)?;
        fields.push(field);
        rest = tail;
    }

    Ok(KexInitFields(fields))
}

fn parse_string(data: &[u8]) -> Result<(String, &[u8]), KexDecodeError> {
    if data.len() < 4 {
        return Err(KexDecodeError::TruncatedLength { remaining: data.len() });
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    if body.len() < length {
        return Err(KexDecodeError::TruncatedField { declared: length, remaining: body.len() });
    }

    let text = String::from_utf8_lossy(&body[..length]);
    Ok((format!("{}-{}", length, text), &body[length..]))
}

/// Builds a well-formed KEXINIT binary packet carrying `fields`.
#[cfg(test)]
pub(crate) fn build_kexinit(fields: &[&str], padding: u8) -> Vec<u8> {
    let mut body = vec![SSH_MSG_KEXINIT];
    body.extend_from_slice(&[0xAB; 16]);
    for field in fields {
        body.extend_from_slice(&(field.len() as u32).to_be_bytes());
        body.extend_from_slice(field.as_bytes());
    }
    body.push(0);
    body.extend_from_slice(&[0; 4]);

    let mut packet = Vec::new();
    let length = 1 + body.len() + padding as usize;
    packet.extend_from_slice(&(length as u32).to_be_bytes());
    packet.push(padding);
    packet.extend_from_slice(&body);
    packet.extend(std::iter::repeat(0x5A).take(padding as usize));
    packet
}

//! Wire envelope.
//!
//! Every datagram is one protobuf `Msg`:
//!
//! ```text
//! Msg { bytes messageID = 1; bytes payload = 2; uint64 checkSum = 3; }
//! ```
//!
//! - **messageID**: correlates a reply with its request
//! - **payload**: an encoded `KVRequest` or `KVResponse`, opaque here
//! - **checkSum**: CRC-32 (IEEE) of `messageID ++ payload`
//!
//! Decoding never fails loudly. Bytes that are not an envelope at all come
//! back as `None`; an envelope whose checksum does not match comes back with
//! `checksum_ok == false` so the caller can drop it.

use prost::Message;

/// Length of the message IDs generated by the client.
pub const MESSAGE_ID_LEN: usize = 16;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Clone, PartialEq, Message)]
struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    message_id: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    check_sum: u64,
}

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: Vec<u8>,
    pub payload: Vec<u8>,
    /// Whether the carried checksum matches a fresh CRC-32 of `id ++ payload`.
    pub checksum_ok: bool,
}

/// CRC-32 over the concatenation of the given byte slices.
pub fn checksum(id: &[u8], payload: &[u8]) -> u64 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(id);
    hasher.update(payload);
    u64::from(hasher.finalize())
}

/// Wrap a payload with its ID and a correct checksum.
pub fn encode(id: &[u8], payload: &[u8]) -> Vec<u8> {
    encode_with_checksum(id, payload, checksum(id, payload))
}

/// Wrap a payload with an arbitrary checksum value.
///
/// Used to build deliberately corrupted frames.
pub fn encode_with_checksum(id: &[u8], payload: &[u8], check_sum: u64) -> Vec<u8> {
    Envelope {
        message_id: id.to_vec(),
        payload: payload.to_vec(),
        check_sum,
    }
    .encode_to_vec()
}

/// Unwrap a datagram. `None` means the bytes are not an envelope.
pub fn decode(bytes: &[u8]) -> Option<Frame> {
    let envelope = Envelope::decode(bytes).ok()?;
    let checksum_ok = checksum(&envelope.message_id, &envelope.payload) == envelope.check_sum;
    Some(Frame {
        id: envelope.message_id,
        payload: envelope.payload,
        checksum_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_frame_validates() {
        let bytes = encode(b"0123456789abcdef", b"payload");
        let frame = decode(&bytes).unwrap();
        assert_eq!(frame.id, b"0123456789abcdef");
        assert_eq!(frame.payload, b"payload");
        assert!(frame.checksum_ok);
    }

    #[test]
    fn checksum_covers_id_and_payload() {
        // CRC-32/ISO-HDLC check value for "123456789"
        assert_eq!(checksum(b"1234", b"56789"), 0xCBF4_3926);
        assert_eq!(checksum(b"", b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn wrong_checksum_is_flagged_not_rejected() {
        let id = b"bad message";
        let payload = b"\x08\x06";
        let bytes = encode_with_checksum(id, payload, checksum(id, payload) + 1);
        let frame = decode(&bytes).unwrap();
        assert!(!frame.checksum_ok);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let id = [7u8; MESSAGE_ID_LEN];
        let good = decode(&encode(&id, b"abc")).unwrap();
        let tampered = encode_with_checksum(&id, b"abd", checksum(&good.id, &good.payload));
        assert!(!decode(&tampered).unwrap().checksum_ok);
    }

    #[test]
    fn garbage_degrades_to_unrecognized() {
        // Field 15 with an invalid wire type.
        assert_eq!(decode(&[0x7f, 0xff, 0xff]), None);
        // Truncated length-delimited field.
        assert_eq!(decode(&[0x0a, 0x10, 0x01]), None);
    }

    #[test]
    fn empty_datagram_is_an_empty_envelope() {
        let frame = decode(&[]).unwrap();
        assert!(frame.id.is_empty());
        // CRC-32 of nothing is zero, which matches the defaulted field.
        assert!(frame.checksum_ok);
    }
}

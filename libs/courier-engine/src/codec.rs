//! Message ↔ topic payload. JSON, no versioning field.

use courier_api::Message;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload has no storage id")]
    MissingId,

    #[error("storage id {0} is out of range")]
    IdOutOfRange(u64),
}

/// Largest storage id a payload may carry. Ids stay within a signed 64-bit
/// column so every backend can hold them and still assign a successor.
pub const MAX_MESSAGE_ID: u64 = i64::MAX as u64;

/// Serialize a message into a topic payload.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse a topic payload back into a message.
///
/// Never panics on bad input. A payload without a storage id is rejected:
/// a message is always stored before it is published. So is an id above
/// [`MAX_MESSAGE_ID`].
pub fn decode(payload: &[u8]) -> Result<Message, CodecError> {
    let message: Message = serde_json::from_slice(payload)?;
    match message.id {
        0 => Err(CodecError::MissingId),
        id if id > MAX_MESSAGE_ID => Err(CodecError::IdOutOfRange(id)),
        _ => Ok(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: 42,
            content: "hello, мир \u{1F600} \"quoted\"\n".into(),
            processed: false,
            created_at: 1_700_000_000_123,
            updated_at: 1_700_000_000_456,
        }
    }

    #[test]
    fn encode_is_lossless() {
        let msg = sample();
        let back = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn wire_format_uses_plain_json_fields() {
        let value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        assert_eq!(value["id"], 42);
        assert_eq!(value["processed"], false);
        assert!(value.get("version").is_none());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let msg = decode(br#"{"id":7,"content":"x"}"#).unwrap();
        assert!(!msg.processed);
        assert_eq!(msg.created_at, 0);
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(matches!(decode(b"\xff\x00not json"), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(b""), Err(CodecError::Malformed(_))));
        assert!(matches!(decode(br#"{"id":"seven","content":1}"#), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn zero_id_is_rejected() {
        assert!(matches!(decode(br#"{"id":0,"content":"x"}"#), Err(CodecError::MissingId)));
    }

    #[test]
    fn id_past_the_signed_range_is_rejected() {
        let top = format!(r#"{{"id":{},"content":"x"}}"#, u64::MAX);
        assert!(matches!(decode(top.as_bytes()), Err(CodecError::IdOutOfRange(u64::MAX))));

        let edge = format!(r#"{{"id":{MAX_MESSAGE_ID},"content":"x"}}"#);
        assert_eq!(decode(edge.as_bytes()).unwrap().id, MAX_MESSAGE_ID);
    }
}

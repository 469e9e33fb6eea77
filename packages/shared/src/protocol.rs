//! Fixed-layout records exchanged over blather channels.
//!
//! Every record has a constant size so a reader always knows how many bytes
//! make up the next record, and every record fits within `PIPE_BUF` so a
//! single write on a FIFO is never interleaved with another writer's.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of a name field, including its terminating NUL.
pub const NAME_LEN: usize = 1024;
/// Size of a message body field, including its terminating NUL.
pub const BODY_LEN: usize = 1024;
/// Size of a channel path field, including its terminating NUL.
pub const PATH_LEN: usize = 1024;
/// Upper bound on simultaneously connected clients.
pub const MAX_CLIENTS: usize = 256;

/// Encoded size of a [`Message`].
pub const MESSAGE_LEN: usize = 4 + NAME_LEN + BODY_LEN;
/// Encoded size of a [`JoinRequest`].
pub const JOIN_LEN: usize = 3 * PATH_LEN;

/// Protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Kind code not defined by the protocol
    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    /// String does not fit its fixed-size field
    #[error("field '{field}' exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },

    /// Field bytes are not valid UTF-8
    #[error("field '{field}' is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// Required field is empty
    #[error("field '{field}' is empty")]
    EmptyField { field: &'static str },

    /// String contains a NUL, which would cut it short on the wire
    #[error("field '{field}' contains a NUL byte")]
    EmbeddedNul { field: &'static str },

    /// Fewer bytes than one record
    #[error("record too short: expected {expected} bytes, got {actual}")]
    ShortRecord { expected: usize, actual: usize },
}

/// The six message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// User-authored text
    Mesg,
    /// A client joined
    Joined,
    /// A client left on its own
    Departed,
    /// The server is going away; terminal for every recipient
    Shutdown,
    /// A client was evicted by the server
    Disconnected,
    /// Heartbeat probe and its echo
    Ping,
}

impl MessageKind {
    /// Wire code of this kind.
    pub fn code(self) -> u32 {
        match self {
            MessageKind::Mesg => 10,
            MessageKind::Joined => 20,
            MessageKind::Departed => 30,
            MessageKind::Shutdown => 40,
            MessageKind::Disconnected => 50,
            MessageKind::Ping => 60,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u32) -> Result<Self, ProtocolError> {
        match code {
            10 => Ok(MessageKind::Mesg),
            20 => Ok(MessageKind::Joined),
            30 => Ok(MessageKind::Departed),
            40 => Ok(MessageKind::Shutdown),
            50 => Ok(MessageKind::Disconnected),
            60 => Ok(MessageKind::Ping),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }

    /// Whether messages of this kind belong in the activity log.
    pub fn is_logged(self) -> bool {
        self != MessageKind::Ping
    }
}

/// One chat record: a kind, the sender's name, and a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub name: String,
    pub body: String,
}

impl Message {
    pub fn new(kind: MessageKind, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn mesg(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(MessageKind::Mesg, name, body)
    }

    pub fn joined(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Joined, name, "")
    }

    pub fn departed(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Departed, name, "")
    }

    pub fn disconnected(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Disconnected, name, "")
    }

    pub fn ping(name: impl Into<String>) -> Self {
        Self::new(MessageKind::Ping, name, "")
    }

    pub fn shutdown() -> Self {
        Self::new(MessageKind::Shutdown, "", "")
    }

    /// Encode into a [`MESSAGE_LEN`]-byte record.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(MESSAGE_LEN);
        buf.put_u32_le(self.kind.code());
        put_field(&mut buf, "name", &self.name, NAME_LEN)?;
        put_field(&mut buf, "body", &self.body, BODY_LEN)?;
        Ok(buf.freeze())
    }

    /// Decode one record. Trailing bytes beyond [`MESSAGE_LEN`] are ignored.
    pub fn decode(record: &[u8]) -> Result<Self, ProtocolError> {
        check_len(record, MESSAGE_LEN)?;
        let mut buf = record;
        let kind = MessageKind::from_code(buf.get_u32_le())?;
        let name = get_field(&mut buf, "name", NAME_LEN)?;
        let body = get_field(&mut buf, "body", BODY_LEN)?;
        Ok(Self { kind, name, body })
    }
}

/// Join handshake written by a client on the server's join channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub name: String,
    /// Path of the channel the server writes to
    pub to_client: String,
    /// Path of the channel the server reads from
    pub to_server: String,
}

impl JoinRequest {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(JOIN_LEN);
        put_field(&mut buf, "name", &self.name, PATH_LEN)?;
        put_field(&mut buf, "to_client", &self.to_client, PATH_LEN)?;
        put_field(&mut buf, "to_server", &self.to_server, PATH_LEN)?;
        Ok(buf.freeze())
    }

    pub fn decode(record: &[u8]) -> Result<Self, ProtocolError> {
        check_len(record, JOIN_LEN)?;
        let mut buf = record;
        Ok(Self {
            name: get_field(&mut buf, "name", PATH_LEN)?,
            to_client: get_field(&mut buf, "to_client", PATH_LEN)?,
            to_server: get_field(&mut buf, "to_server", PATH_LEN)?,
        })
    }
}

/// Longest prefix of `text` that fits a body field, cut on a char boundary.
pub fn truncate_body(text: &str) -> &str {
    truncate_to(text, BODY_LEN - 1)
}

/// Check that `name` is non-empty, NUL-free, and fits a name field.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::EmptyField { field: "name" });
    }
    if name.contains('\0') {
        return Err(ProtocolError::EmbeddedNul { field: "name" });
    }
    if name.len() >= NAME_LEN {
        return Err(ProtocolError::FieldTooLong {
            field: "name",
            max: NAME_LEN - 1,
        });
    }
    Ok(())
}

pub(crate) fn put_field(
    buf: &mut BytesMut,
    field: &'static str,
    value: &str,
    len: usize,
) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    if bytes.len() >= len {
        return Err(ProtocolError::FieldTooLong {
            field,
            max: len - 1,
        });
    }
    buf.put_slice(bytes);
    buf.put_bytes(0, len - bytes.len());
    Ok(())
}

pub(crate) fn get_field(
    buf: &mut &[u8],
    field: &'static str,
    len: usize,
) -> Result<String, ProtocolError> {
    let raw = buf.copy_to_bytes(len);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8(raw[..end].to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

pub(crate) fn check_len(record: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if record.len() < expected {
        return Err(ProtocolError::ShortRecord {
            expected,
            actual: record.len(),
        });
    }
    Ok(())
}

fn truncate_to(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_fit_within_pipe_buf() {
        // テスト項目: レコードサイズが PIPE_BUF (4096) 以下である
        // given (前提条件):
        let pipe_buf = 4096;

        // when (操作):
        let sizes = [MESSAGE_LEN, JOIN_LEN];

        // then (期待する結果):
        assert!(sizes.iter().all(|&size| size <= pipe_buf));
    }

    #[test]
    fn test_message_encodes_to_fixed_size() {
        // テスト項目: Message のエンコード結果は常に MESSAGE_LEN バイト
        // given (前提条件):
        let short = Message::ping("a");
        let long = Message::mesg("alice", "x".repeat(BODY_LEN - 1));

        // when (操作):
        let short_bytes = short.encode().unwrap();
        let long_bytes = long.encode().unwrap();

        // then (期待する結果):
        assert_eq!(short_bytes.len(), MESSAGE_LEN);
        assert_eq!(long_bytes.len(), MESSAGE_LEN);
    }

    #[test]
    fn test_message_decode_preserves_fields() {
        // テスト項目: エンコードしたメッセージをデコードすると同じ内容になる
        // given (前提条件):
        let message = Message::mesg("alice", "hello, world");

        // when (操作):
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();

        // then (期待する結果):
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_kind_codes_are_stable() {
        // テスト項目: 種別コードがワイヤ形式と一致する
        // given (前提条件):
        let kinds = [
            (MessageKind::Mesg, 10),
            (MessageKind::Joined, 20),
            (MessageKind::Departed, 30),
            (MessageKind::Shutdown, 40),
            (MessageKind::Disconnected, 50),
            (MessageKind::Ping, 60),
        ];

        // when (操作) / then (期待する結果):
        for (kind, code) in kinds {
            assert_eq!(kind.code(), code);
            assert_eq!(MessageKind::from_code(code), Ok(kind));
        }
    }

    #[test]
    fn test_decode_unknown_kind_is_rejected() {
        // テスト項目: 未知の種別コードはエラーになる
        // given (前提条件):
        let mut record = Message::joined("bob").encode().unwrap().to_vec();
        record[..4].copy_from_slice(&99u32.to_le_bytes());

        // when (操作):
        let result = Message::decode(&record);

        // then (期待する結果):
        assert_eq!(result, Err(ProtocolError::UnknownKind(99)));
    }

    #[test]
    fn test_decode_short_record_is_rejected() {
        // テスト項目: 1 レコードに満たないバイト列はエラーになる
        // given (前提条件):
        let record = [0u8; 16];

        // when (操作):
        let result = Message::decode(&record);

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ProtocolError::ShortRecord {
                expected: MESSAGE_LEN,
                actual: 16
            })
        );
    }

    #[test]
    fn test_decode_ignores_bytes_after_nul() {
        // テスト項目: NUL 以降のバイトは無視される
        // given (前提条件):
        let mut record = Message::mesg("carol", "hi").encode().unwrap().to_vec();
        record[4 + NAME_LEN + 3] = b'z';

        // when (操作):
        let decoded = Message::decode(&record).unwrap();

        // then (期待する結果):
        assert_eq!(decoded.body, "hi");
    }

    #[test]
    fn test_encode_rejects_oversized_name() {
        // テスト項目: 名前がフィールドに収まらない場合はエラーになる
        // given (前提条件):
        let message = Message::joined("n".repeat(NAME_LEN));

        // when (操作):
        let result = message.encode();

        // then (期待する結果):
        assert_eq!(
            result,
            Err(ProtocolError::FieldTooLong {
                field: "name",
                max: NAME_LEN - 1
            })
        );
    }

    #[test]
    fn test_join_request_decode_preserves_paths() {
        // テスト項目: JoinRequest のチャンネルパスがそのまま復元される
        // given (前提条件):
        let request = JoinRequest {
            name: "alice".to_string(),
            to_client: "4242.client.fifo".to_string(),
            to_server: "4242.server.fifo".to_string(),
        };

        // when (操作):
        let bytes = request.encode().unwrap();
        let decoded = JoinRequest::decode(&bytes).unwrap();

        // then (期待する結果):
        assert_eq!(bytes.len(), JOIN_LEN);
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        // テスト項目: 本文の切り詰めはマルチバイト文字の途中で切らない
        // given (前提条件):
        let text = format!("{}あ", "a".repeat(BODY_LEN - 2));

        // when (操作):
        let truncated = truncate_body(&text);

        // then (期待する結果):
        assert_eq!(truncated.len(), BODY_LEN - 2);
        assert!(Message::mesg("a", truncated).encode().is_ok());
    }

    #[test]
    fn test_validate_name() {
        // テスト項目: 空の名前と長すぎる名前は拒否される
        // given (前提条件):
        let too_long = "n".repeat(NAME_LEN);

        // when (操作) / then (期待する結果):
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&too_long).is_err());
    }

    #[test]
    fn test_validate_name_rejects_embedded_nul() {
        // テスト項目: NUL を含む名前は長さではなく NUL を理由に拒否される
        // given (前提条件):
        let name = "ali\0ce";

        // when (操作):
        let result = validate_name(name);

        // then (期待する結果):
        assert_eq!(result, Err(ProtocolError::EmbeddedNul { field: "name" }));
    }

    #[test]
    fn test_ping_is_not_logged() {
        // テスト項目: PING だけがログ対象外である
        // given (前提条件) / when (操作) / then (期待する結果):
        assert!(!MessageKind::Ping.is_logged());
        assert!(MessageKind::Mesg.is_logged());
        assert!(MessageKind::Shutdown.is_logged());
    }
}

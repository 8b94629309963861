//! Key-value application payload.
//!
//! ```text
//! KVRequest  { required uint32 command = 1; optional bytes key = 2;
//!              optional bytes value = 3; optional int32 version = 4; }
//! KVResponse { required uint32 errCode = 1; optional bytes value = 2;
//!              optional int32 pid = 3; optional int32 version = 4;
//!              optional int32 overloadWaitTime = 5;
//!              optional int32 membershipCount = 6; }
//! ```
//!
//! The codec is structural only. Length limits and command legality are the
//! server's business; the harness observes how the server enforces them.

use crate::codes::WireCodes;
use prost::Message;
use serde::Serialize;
use std::fmt;

/// Longest key a server must accept.
pub const MAX_KEY_LEN: usize = 32;
/// Longest value a server must accept.
pub const MAX_VALUE_LEN: usize = 10_000;

/// Client-visible commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Put,
    Get,
    Remove,
    Shutdown,
    Wipeout,
    IsAlive,
    GetPid,
    GetMembershipCount,
    /// A number no server recognizes.
    Invalid,
}

impl Command {
    /// Every command, in wire order.
    pub const ALL: [Command; 9] = [
        Command::Put,
        Command::Get,
        Command::Remove,
        Command::Shutdown,
        Command::Wipeout,
        Command::IsAlive,
        Command::GetPid,
        Command::GetMembershipCount,
        Command::Invalid,
    ];
}

/// Error codes carried in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Okay,
    NoKey,
    NoSpace,
    TempOverload,
    InternalFailure,
    BadCommand,
    BadKey,
    BadValue,
    /// A number outside the configured contract.
    Unknown(u32),
}

impl ErrorCode {
    /// Every code with a fixed meaning.
    pub const KNOWN: [ErrorCode; 8] = [
        ErrorCode::Okay,
        ErrorCode::NoKey,
        ErrorCode::NoSpace,
        ErrorCode::TempOverload,
        ErrorCode::InternalFailure,
        ErrorCode::BadCommand,
        ErrorCode::BadKey,
        ErrorCode::BadValue,
    ];
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Okay => f.write_str("OKAY"),
            ErrorCode::NoKey => f.write_str("NO_KEY"),
            ErrorCode::NoSpace => f.write_str("NO_SPACE"),
            ErrorCode::TempOverload => f.write_str("TEMP_OVERLOAD"),
            ErrorCode::InternalFailure => f.write_str("INTERNAL_FAILURE"),
            ErrorCode::BadCommand => f.write_str("BAD_COMMAND"),
            ErrorCode::BadKey => f.write_str("BAD_KEY"),
            ErrorCode::BadValue => f.write_str("BAD_VALUE"),
            ErrorCode::Unknown(raw) => write!(f, "UNKNOWN({raw:#x})"),
        }
    }
}

/// An application request.
///
/// The client forwards whatever fields are set, including ones the command
/// does not use, so over-supplied requests can be built on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub version: Option<i32>,
}

impl Request {
    /// Request with no key, value or version.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            key: None,
            value: None,
            version: None,
        }
    }

    /// Unversioned PUT.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Put).with_key(key).with_value(value)
    }

    pub fn get(key: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Get).with_key(key)
    }

    pub fn remove(key: impl Into<Vec<u8>>) -> Self {
        Self::new(Command::Remove).with_key(key)
    }

    /// Set the key, whatever the command.
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the value, even on commands that take none.
    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }
}

/// Optional response fields, used to check that a reply carries exactly the
/// fields its command calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResponseField {
    Value,
    Version,
    Pid,
    MembershipCount,
    OverloadWaitTime,
}

impl fmt::Display for ResponseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResponseField::Value => "value",
            ResponseField::Version => "version",
            ResponseField::Pid => "pid",
            ResponseField::MembershipCount => "membershipCount",
            ResponseField::OverloadWaitTime => "overloadWaitTime",
        };
        f.write_str(name)
    }
}

/// An application response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub error_code: ErrorCode,
    pub value: Option<Vec<u8>>,
    pub version: Option<i32>,
    pub pid: Option<i32>,
    pub membership_count: Option<i32>,
    pub overload_wait_time: Option<i32>,
}

impl Response {
    /// Response carrying only an error code.
    pub fn new(error_code: ErrorCode) -> Self {
        Self {
            error_code,
            value: None,
            version: None,
            pid: None,
            membership_count: None,
            overload_wait_time: None,
        }
    }

    pub fn is_okay(&self) -> bool {
        self.error_code == ErrorCode::Okay
    }

    /// Optional fields present in this response.
    pub fn fields(&self) -> Vec<ResponseField> {
        let mut present = Vec::new();
        if self.value.is_some() {
            present.push(ResponseField::Value);
        }
        if self.version.is_some() {
            present.push(ResponseField::Version);
        }
        if self.pid.is_some() {
            present.push(ResponseField::Pid);
        }
        if self.membership_count.is_some() {
            present.push(ResponseField::MembershipCount);
        }
        if self.overload_wait_time.is_some() {
            present.push(ResponseField::OverloadWaitTime);
        }
        present
    }

    /// Present fields outside `allowed`.
    pub fn unexpected_fields(&self, allowed: &[ResponseField]) -> Vec<ResponseField> {
        self.fields()
            .into_iter()
            .filter(|f| !allowed.contains(f))
            .collect()
    }

    /// Fields in `required` that are missing.
    pub fn missing_fields(&self, required: &[ResponseField]) -> Vec<ResponseField> {
        let present = self.fields();
        required
            .iter()
            .copied()
            .filter(|f| !present.contains(f))
            .collect()
    }
}

#[derive(Clone, PartialEq, Message)]
struct KvRequestMsg {
    #[prost(uint32, required, tag = "1")]
    command: u32,
    #[prost(bytes = "vec", optional, tag = "2")]
    key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    value: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    version: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
struct KvResponseMsg {
    #[prost(uint32, required, tag = "1")]
    err_code: u32,
    #[prost(bytes = "vec", optional, tag = "2")]
    value: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "3")]
    pid: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    version: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    overload_wait_time: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    membership_count: Option<i32>,
}

/// Payload could not be parsed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed key-value payload: {0}")]
pub struct CodecError(#[from] prost::DecodeError);

/// Converts between [`Request`]/[`Response`] and payload bytes under a given
/// wire numbering.
#[derive(Debug, Clone, Default)]
pub struct KeyValueCodec {
    codes: WireCodes,
}

impl KeyValueCodec {
    pub fn new(codes: WireCodes) -> Self {
        Self { codes }
    }

    /// Serialize a request payload for the envelope.
    pub fn encode_request(&self, request: &Request) -> Vec<u8> {
        KvRequestMsg {
            command: self.codes.command(request.command),
            key: request.key.clone(),
            value: request.value.clone(),
            version: request.version,
        }
        .encode_to_vec()
    }

    /// Parse a request payload. Unknown command numbers decode as `Command::Invalid`.
    pub fn decode_request(&self, bytes: &[u8]) -> Result<Request, CodecError> {
        let msg = KvRequestMsg::decode(bytes)?;
        Ok(Request {
            command: self.codes.command_from(msg.command),
            key: msg.key,
            value: msg.value,
            version: msg.version,
        })
    }

    pub fn encode_response(&self, response: &Response) -> Vec<u8> {
        KvResponseMsg {
            err_code: self.codes.error(response.error_code),
            value: response.value.clone(),
            pid: response.pid,
            version: response.version,
            overload_wait_time: response.overload_wait_time,
            membership_count: response.membership_count,
        }
        .encode_to_vec()
    }

    /// Parse a response payload. Unknown error numbers are kept as `ErrorCode::Unknown`.
    pub fn decode_response(&self, bytes: &[u8]) -> Result<Response, CodecError> {
        let msg = KvResponseMsg::decode(bytes)?;
        Ok(Response {
            error_code: self.codes.error_from(msg.err_code),
            value: msg.value,
            version: msg.version,
            pid: msg.pid,
            membership_count: msg.membership_count,
            overload_wait_time: msg.overload_wait_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_is_command_only() {
        let codec = KeyValueCodec::default();
        let bytes = codec.encode_request(&Request::new(Command::IsAlive));
        // field 1, varint 6
        assert_eq!(bytes, vec![0x08, 0x06]);
    }

    #[test]
    fn invalid_command_is_minus_one_on_the_wire() {
        let codec = KeyValueCodec::default();
        let bytes = codec.encode_request(&Request::new(Command::Invalid));
        assert_eq!(bytes, vec![0x08, 0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert_eq!(codec.decode_request(&bytes).unwrap().command, Command::Invalid);
    }

    #[test]
    fn over_supplied_request_keeps_every_field() {
        let codec = KeyValueCodec::default();
        let request = Request::get(b"war".to_vec())
            .with_value(b"peace".to_vec())
            .with_version(3);
        let decoded = codec.decode_request(&codec.encode_request(&request)).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn zero_version_is_still_present() {
        let codec = KeyValueCodec::default();
        let mut response = Response::new(ErrorCode::Okay);
        response.value = Some(Vec::new());
        response.version = Some(0);
        let decoded = codec.decode_response(&codec.encode_response(&response)).unwrap();
        assert_eq!(decoded.version, Some(0));
        assert_eq!(decoded.value, Some(Vec::new()));
        assert_eq!(
            decoded.fields(),
            vec![ResponseField::Value, ResponseField::Version]
        );
    }

    #[test]
    fn unexpected_and_missing_fields() {
        let mut response = Response::new(ErrorCode::Okay);
        response.pid = Some(4242);
        response.version = Some(1);
        assert_eq!(
            response.unexpected_fields(&[ResponseField::Pid]),
            vec![ResponseField::Version]
        );
        assert_eq!(
            response.missing_fields(&[ResponseField::Pid, ResponseField::MembershipCount]),
            vec![ResponseField::MembershipCount]
        );
    }

    #[test]
    fn custom_numbering_is_honoured() {
        let codec = KeyValueCodec::new(WireCodes {
            okay: 0x10,
            no_key: 0x11,
            ..WireCodes::default()
        });
        let bytes = codec.encode_response(&Response::new(ErrorCode::NoKey));
        assert_eq!(bytes, vec![0x08, 0x11]);
        let decoded = KeyValueCodec::default().decode_response(&bytes).unwrap();
        assert_eq!(decoded.error_code, ErrorCode::Unknown(0x11));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let codec = KeyValueCodec::default();
        assert!(codec.decode_response(&[0x12, 0x05, b'a']).is_err());
    }
}

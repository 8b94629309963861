//! Integer encodings of commands and error codes.
//!
//! These numbers belong to the server's wire contract, not to this crate.
//! The defaults match the common course-server assignment; a deployment with
//! different numbering overrides them from configuration.

use crate::kv::{Command, ErrorCode};
use serde::{Deserialize, Serialize};

/// Wire numbering shared with the server under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireCodes {
    pub put: u32,
    pub get: u32,
    pub remove: u32,
    pub shutdown: u32,
    pub wipeout: u32,
    pub is_alive: u32,
    pub get_pid: u32,
    pub get_membership_count: u32,
    /// Sent to probe unknown-command handling. Never produced by a server.
    pub invalid_command: u32,

    pub okay: u32,
    pub no_key: u32,
    pub no_space: u32,
    pub temp_overload: u32,
    pub internal_failure: u32,
    pub bad_command: u32,
    pub bad_key: u32,
    pub bad_value: u32,
}

impl Default for WireCodes {
    fn default() -> Self {
        Self {
            put: 0x01,
            get: 0x02,
            remove: 0x03,
            shutdown: 0x04,
            wipeout: 0x05,
            is_alive: 0x06,
            get_pid: 0x07,
            get_membership_count: 0x08,
            // -1 as a uint32 on the wire
            invalid_command: u32::MAX,

            okay: 0x00,
            no_key: 0x01,
            no_space: 0x02,
            temp_overload: 0x03,
            internal_failure: 0x04,
            bad_command: 0x05,
            bad_key: 0x06,
            bad_value: 0x07,
        }
    }
}

impl WireCodes {
    /// Wire value for `command`.
    pub fn command(&self, command: Command) -> u32 {
        match command {
            Command::Put => self.put,
            Command::Get => self.get,
            Command::Remove => self.remove,
            Command::Shutdown => self.shutdown,
            Command::Wipeout => self.wipeout,
            Command::IsAlive => self.is_alive,
            Command::GetPid => self.get_pid,
            Command::GetMembershipCount => self.get_membership_count,
            Command::Invalid => self.invalid_command,
        }
    }

    /// Map a raw command number back; anything unrecognized is `Invalid`.
    pub fn command_from(&self, raw: u32) -> Command {
        Command::ALL
            .into_iter()
            .find(|c| *c != Command::Invalid && self.command(*c) == raw)
            .unwrap_or(Command::Invalid)
    }

    /// Wire value for `code`. `Unknown` carries its own.
    pub fn error(&self, code: ErrorCode) -> u32 {
        match code {
            ErrorCode::Okay => self.okay,
            ErrorCode::NoKey => self.no_key,
            ErrorCode::NoSpace => self.no_space,
            ErrorCode::TempOverload => self.temp_overload,
            ErrorCode::InternalFailure => self.internal_failure,
            ErrorCode::BadCommand => self.bad_command,
            ErrorCode::BadKey => self.bad_key,
            ErrorCode::BadValue => self.bad_value,
            ErrorCode::Unknown(raw) => raw,
        }
    }

    /// Map a wire value back to a code, keeping unrecognized values as `Unknown`.
    pub fn error_from(&self, raw: u32) -> ErrorCode {
        ErrorCode::KNOWN
            .into_iter()
            .find(|c| self.error(*c) == raw)
            .unwrap_or(ErrorCode::Unknown(raw))
    }

    /// Reject numberings where two commands or two error codes collide.
    pub fn validate(&self) -> Result<(), CodesError> {
        let commands: Vec<u32> = Command::ALL.iter().map(|c| self.command(*c)).collect();
        if let Some(raw) = first_duplicate(&commands) {
            return Err(CodesError::DuplicateCommand(raw));
        }
        let errors: Vec<u32> = ErrorCode::KNOWN.iter().map(|c| self.error(*c)).collect();
        if let Some(raw) = first_duplicate(&errors) {
            return Err(CodesError::DuplicateErrorCode(raw));
        }
        Ok(())
    }
}

fn first_duplicate(values: &[u32]) -> Option<u32> {
    values
        .iter()
        .enumerate()
        .find(|(i, v)| values[..*i].contains(v))
        .map(|(_, v)| *v)
}

/// Inconsistent wire numbering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodesError {
    #[error("command code {0} is assigned to more than one command")]
    DuplicateCommand(u32),
    #[error("error code {0} is assigned to more than one error")]
    DuplicateErrorCode(u32),
}

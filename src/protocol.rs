//! Wire formats of the room devices.
//!
//! The projector speaks a line protocol: ASCII lines terminated by CR, a
//! banner on connect, `%1<CMD> <ARGS>` commands and `%1<CMD>=<RESULT>`
//! replies. The mixer speaks fixed 9-byte binary frames over a serial bridge.

use crate::error::{Result, RoomError};
use crate::types::PowerState;
use md5::{Digest, Md5};

// ========== Projector ==========

/// Line terminator of the projector protocol
pub const LINE_END: u8 = b'\r';

/// Class prefix of every command
pub const COMMAND_PREFIX: &str = "%1";

/// Greeting sent by the projector on connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub auth_required: bool,
    pub nonce: Option<String>,
}

impl Banner {
    /// Parse `<WORD> <0|1>[ <nonceHex>]`, e.g. `PJLINK 1 4a1b2c3d`
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || RoomError::Protocol(format!("malformed banner: {:?}", line));
        let mut tokens = line.split_whitespace();

        let word = tokens.next().ok_or_else(malformed)?;
        if !word.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(malformed());
        }

        let auth_required = match tokens.next() {
            Some("0") => false,
            Some("1") => true,
            _ => return Err(malformed()),
        };

        let nonce = match tokens.next() {
            Some(nonce) if nonce.bytes().all(|b| b.is_ascii_hexdigit()) => Some(nonce.to_string()),
            Some(_) => return Err(malformed()),
            None => None,
        };

        if tokens.next().is_some() || (auth_required && nonce.is_none()) {
            return Err(malformed());
        }

        Ok(Self {
            auth_required,
            nonce,
        })
    }
}

/// Lowercase hex MD5 of `nonce + password`
pub fn auth_digest(nonce: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// `%1<CMD> <ARGS>\r`
pub fn format_command(command: &str, args: &str) -> String {
    format!("{}{} {}\r", COMMAND_PREFIX, command, args)
}

/// Whether a reply acknowledges the command
pub fn reply_is_ok(reply: &str) -> bool {
    reply.contains("OK")
}

/// Extract the state from a `POWR=<digit>` reply
pub fn parse_power_reply(reply: &str) -> PowerState {
    reply
        .find("POWR=")
        .and_then(|pos| reply[pos + 5..].bytes().next())
        .filter(u8::is_ascii_digit)
        .map(|digit| PowerState::from_code(digit - b'0'))
        .unwrap_or(PowerState::Unknown)
}

// ========== Mixer ==========

/// First and last byte of a frame
pub const FRAME_START: u8 = 0x7B;

/// Second and second-to-last byte of a frame
pub const FRAME_START2: u8 = 0x7D;

/// Length of a command frame
pub const FRAME_LEN: usize = 9;

/// Mixer command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MixerCommand {
    Gain = 0x41,
    Mute = 0x42,
    LoadPreset = 0x43,
    InputVolume = 0x44,
    OutputVolume = 0x45,
    GetGain = 0x48,
    GetMute = 0x49,
    GetPreset = 0x4A,
}

impl MixerCommand {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Query commands are answered by the device
    pub fn expects_reply(self) -> bool {
        matches!(
            self,
            MixerCommand::GetGain | MixerCommand::GetMute | MixerCommand::GetPreset
        )
    }

    /// Number of reply bytes
    pub fn reply_len(self) -> usize {
        match self {
            MixerCommand::GetGain => 2,
            _ => 1,
        }
    }
}

/// One 9-byte mixer frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    pub fn new(address: u8, command: MixerCommand, d1: u8, d2: u8, d3: u8) -> Self {
        Self([
            FRAME_START,
            FRAME_START2,
            address,
            command.code(),
            d1,
            d2,
            d3,
            FRAME_START2,
            FRAME_START,
        ])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn address(&self) -> u8 {
        self.0[2]
    }

    pub fn command_code(&self) -> u8 {
        self.0[3]
    }

    pub fn data(&self) -> [u8; 3] {
        [self.0[4], self.0[5], self.0[6]]
    }

    /// Validate framing bytes of a frame read back from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: [u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| RoomError::Protocol(format!("frame of {} bytes", bytes.len())))?;

        if frame[0] != FRAME_START
            || frame[1] != FRAME_START2
            || frame[7] != FRAME_START2
            || frame[8] != FRAME_START
        {
            return Err(RoomError::Protocol(format!("bad framing: {:02X?}", frame)));
        }

        Ok(Self(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banner_without_auth() {
        let banner = Banner::parse("PJLINK 0").unwrap();
        assert!(!banner.auth_required);
        assert_eq!(banner.nonce, None);
    }

    #[test]
    fn banner_with_nonce() {
        let banner = Banner::parse("PROTO 1 ABCDEF01").unwrap();
        assert!(banner.auth_required);
        assert_eq!(banner.nonce.as_deref(), Some("ABCDEF01"));
    }

    #[test]
    fn malformed_banners() {
        for line in ["", "PJLINK", "PJLINK 2", "PJLINK 1", "PJLINK 1 xyz", "%1POWR=OK", "PJLINK 0 12 34"] {
            assert!(
                matches!(Banner::parse(line), Err(RoomError::Protocol(_))),
                "accepted {:?}",
                line
            );
        }
    }

    #[test]
    fn digest_of_nonce_and_password() {
        assert_eq!(auth_digest("ABCDEF01", "secret"), "87c6646a69637f16c2127a77fea7b6c8");
        assert_eq!(auth_digest("12345678", "abc"), "da8e4418bec3434e84b1a2a753dec25e");
    }

    #[test]
    fn command_format() {
        assert_eq!(format_command("POWR", "1"), "%1POWR 1\r");
        assert_eq!(format_command("INPT", "32"), "%1INPT 32\r");
    }

    #[test]
    fn power_replies() {
        assert_eq!(parse_power_reply("%1POWR=0"), PowerState::Standby);
        assert_eq!(parse_power_reply("%1POWR=1"), PowerState::On);
        assert_eq!(parse_power_reply("%1POWR=3"), PowerState::WarmUp);
        assert_eq!(parse_power_reply("%1POWR=ERR3"), PowerState::Unknown);
        assert_eq!(parse_power_reply("PJLINK ERRA"), PowerState::Unknown);
        assert_eq!(parse_power_reply("%1POWR="), PowerState::Unknown);
    }

    #[test]
    fn ok_replies() {
        assert!(reply_is_ok("%1POWR=OK"));
        assert!(!reply_is_ok("%1POWR=ERR2"));
    }

    #[test]
    fn frame_layout() {
        let frame = CommandFrame::new(3, MixerCommand::Mute, 1, 4, 1);
        assert_eq!(
            frame.as_bytes(),
            &[0x7B, 0x7D, 0x03, 0x42, 0x01, 0x04, 0x01, 0x7D, 0x7B]
        );
        assert_eq!(frame.address(), 3);
        assert_eq!(frame.command_code(), 0x42);
        assert_eq!(frame.data(), [1, 4, 1]);
        assert_eq!(CommandFrame::from_bytes(frame.as_bytes()).unwrap(), frame);
    }

    #[test]
    fn framing_is_validated() {
        let mut bytes = *CommandFrame::new(3, MixerCommand::GetGain, 0, 0, 0).as_bytes();
        bytes[7] = 0x00;
        assert!(CommandFrame::from_bytes(&bytes).is_err());
        assert!(CommandFrame::from_bytes(&bytes[..8]).is_err());
    }

    #[test]
    fn reply_table() {
        assert!(MixerCommand::GetGain.expects_reply());
        assert!(MixerCommand::GetMute.expects_reply());
        assert!(MixerCommand::GetPreset.expects_reply());
        assert!(!MixerCommand::Gain.expects_reply());
        assert!(!MixerCommand::OutputVolume.expects_reply());
        assert_eq!(MixerCommand::GetGain.reply_len(), 2);
        assert_eq!(MixerCommand::GetMute.reply_len(), 1);
    }
}

//! Packets of the Host Controller Interface
//!
//! This crate carries the byte-level boundary of the HCI: the opcodes, event codes, and error
//! codes defined for the packets the protocol engine exchanges with a Bluetooth controller, along
//! with the *builders* and *views* for those packets.
//!
//! # Builders and Views
//! A builder is an owned, write-once description of an outbound packet. Calling
//! [`build`](CommandBuilder::build) consumes the builder and serializes it into the framed bytes
//! sent over the interface. A view is the opposite direction, a read-only typed interpretation of
//! received bytes. Views are backed by a shared [`Bytes`] buffer, so re-interpreting a packet as a
//! more specific view (for example [`EventView`] → [`CommandCompleteView`]) never copies the
//! underlying buffer. Every narrowing conversion re-validates the structural constraints of the
//! more specific packet, so a specialized view is only obtainable when the parent view was valid
//! and the specialization's own fields check out.
//!
//! HCI packets are not self-labeling. The packet kind (command, event, ACL, SCO, or ISO) must be
//! known from the transport framing before any of the decoders here are used.
//!
//! [`Bytes`]: bytes::Bytes

mod codes;
mod command;
mod data;
mod event;

pub use codes::{ErrorCode, EventCode, OpCode, SubeventCode};
pub use command::{CommandBuilder, CommandView};
pub use data::{
    AclBroadcastFlag, AclBuilder, AclPacketBoundary, AclView, IsoBuilder, IsoPacketBoundary, IsoView, ScoView,
};
pub use event::{
    AddressType, CommandCompleteView, CommandStatusView, ConnectionCompleteView, EventBuilder, EventView,
    LeConnectionCompleteView, LeMetaEventView, LinkType, Role,
};

use core::fmt;

/// Error returned when bytes fail to decode as the requested packet view
///
/// Decoding failures are expected to be absorbed (logged and dropped) at the boundary where the
/// bytes enter the host, they are not part of any upper layer interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("packet requires at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("length field claims {claimed} bytes of payload, buffer holds {actual}")]
    LengthMismatch { claimed: usize, actual: usize },
    #[error("event code {actual:#04x} cannot be interpreted as {requested}")]
    UnexpectedEventCode { requested: &'static str, actual: u8 },
    #[error("subevent code {actual:#04x} cannot be interpreted as {requested}")]
    UnexpectedSubeventCode { requested: &'static str, actual: u8 },
    #[error("raw connection handle {0:#06x} is larger than the maximum (0x0EFF)")]
    InvalidConnectionHandle(u16),
    #[error("{field} carries the reserved value {value:#x}")]
    ReservedFlagValue { field: &'static str, value: u8 },
}

/// A Bluetooth device address (BD_ADDR)
///
/// The bytes are stored in the order they are transmitted over the interface (least significant
/// byte first). `Display` prints the conventional colon-separated form with the most significant
/// byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 6]);

impl Address {
    /// The all-zero address
    pub const ANY: Address = Address([0; 6]);

    pub const BYTE_LEN: usize = 6;

    /// Parse an address from the colon-separated form, e.g. `"A1:A2:A3:A4:A5:A6"`
    pub fn from_string(s: &str) -> Option<Address> {
        let mut bytes = [0u8; 6];
        let mut count = 0;

        for octet in s.split(':') {
            if count == 6 {
                return None;
            }

            // display order is the reverse of transmission order
            bytes[5 - count] = u8::from_str_radix(octet, 16).ok()?;

            count += 1;
        }

        (count == 6).then_some(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[5], self.0[4], self.0[3], self.0[2], self.0[1], self.0[0]
        )
    }
}

/// The connection handle
///
/// An identifier of a connection between this device and another device. It is assigned by the
/// controller when the connection is established and appears in the header of every data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle {
    handle: u16,
}

impl ConnectionHandle {
    pub const MAX: u16 = 0x0EFF;

    pub fn get_raw_handle(&self) -> u16 {
        self.handle
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}", self.handle)
    }
}

impl TryFrom<u16> for ConnectionHandle {
    type Error = DecodeError;

    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        if raw <= ConnectionHandle::MAX {
            Ok(ConnectionHandle { handle: raw })
        } else {
            Err(DecodeError::InvalidConnectionHandle(raw))
        }
    }
}

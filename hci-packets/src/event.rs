//! HCI event packets
//!
//! An event packet is the event code, a one byte parameter length, and the event parameter.
//! [`EventView`] is the entry point for decoding; the specialized views narrow it further, each
//! narrowing validating the structure the more specific event requires. *LE Meta* events nest one
//! level deeper, the first parameter byte selects the subevent and the rest of the parameter
//! belongs to it.
//!
//! [`EventBuilder`] is the controller-side counterpart. The host never sends events, but anything
//! emulating or testing against a controller needs to produce them.

use crate::{Address, ConnectionHandle, DecodeError, ErrorCode, EventCode, OpCode, SubeventCode};
use bytes::{BufMut, Bytes, BytesMut};

const EVENT_HEADER_LEN: usize = 2;

/// The role of this device within a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
    Raw(u8),
}

impl Role {
    pub fn from_raw(raw: u8) -> Role {
        match raw {
            0x00 => Role::Central,
            0x01 => Role::Peripheral,
            raw => Role::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            Role::Central => 0x00,
            Role::Peripheral => 0x01,
            Role::Raw(raw) => *raw,
        }
    }
}

/// The kind of device address accompanying a peer address field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    PublicDevice,
    RandomDevice,
    PublicIdentity,
    RandomIdentity,
    Raw(u8),
}

impl AddressType {
    pub fn from_raw(raw: u8) -> AddressType {
        match raw {
            0x00 => AddressType::PublicDevice,
            0x01 => AddressType::RandomDevice,
            0x02 => AddressType::PublicIdentity,
            0x03 => AddressType::RandomIdentity,
            raw => AddressType::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            AddressType::PublicDevice => 0x00,
            AddressType::RandomDevice => 0x01,
            AddressType::PublicIdentity => 0x02,
            AddressType::RandomIdentity => 0x03,
            AddressType::Raw(raw) => *raw,
        }
    }
}

/// The link type within a *Connection Complete* event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Sco,
    Acl,
    Raw(u8),
}

impl LinkType {
    pub fn from_raw(raw: u8) -> LinkType {
        match raw {
            0x00 => LinkType::Sco,
            0x01 => LinkType::Acl,
            raw => LinkType::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            LinkType::Sco => 0x00,
            LinkType::Acl => 0x01,
            LinkType::Raw(raw) => *raw,
        }
    }
}

/// View of an HCI event packet
#[derive(Debug, Clone)]
pub struct EventView {
    packet: Bytes,
}

impl EventView {
    pub fn decode(packet: Bytes) -> Result<EventView, DecodeError> {
        if packet.len() < EVENT_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: EVENT_HEADER_LEN,
                actual: packet.len(),
            });
        }

        let claimed = packet[1] as usize;

        if packet.len() != EVENT_HEADER_LEN + claimed {
            return Err(DecodeError::LengthMismatch {
                claimed,
                actual: packet.len() - EVENT_HEADER_LEN,
            });
        }

        Ok(EventView { packet })
    }

    pub fn event_code(&self) -> EventCode {
        EventCode::from_raw(self.packet[0])
    }

    /// The event parameter, shared with (not copied from) this view's buffer
    pub fn parameter(&self) -> Bytes {
        self.packet.slice(EVENT_HEADER_LEN..)
    }
}

/// View of a *Command Complete* event
///
/// Carries the credit allowance of the controller and, unless the opcode is [`OpCode::Nop`], the
/// result of a previously issued command.
#[derive(Debug, Clone)]
pub struct CommandCompleteView {
    event: EventView,
}

impl TryFrom<EventView> for CommandCompleteView {
    type Error = DecodeError;

    fn try_from(event: EventView) -> Result<Self, Self::Error> {
        if event.event_code() != EventCode::CommandComplete {
            return Err(DecodeError::UnexpectedEventCode {
                requested: "Command Complete",
                actual: event.packet[0],
            });
        }

        if event.parameter().len() < 3 {
            return Err(DecodeError::Truncated {
                expected: EVENT_HEADER_LEN + 3,
                actual: event.packet.len(),
            });
        }

        Ok(CommandCompleteView { event })
    }
}

impl CommandCompleteView {
    pub fn num_hci_command_packets(&self) -> u8 {
        self.event.parameter()[0]
    }

    pub fn command_opcode(&self) -> OpCode {
        let parameter = self.event.parameter();

        OpCode::from_raw(u16::from_le_bytes([parameter[1], parameter[2]]))
    }

    /// The command-specific return parameter
    pub fn return_parameter(&self) -> Bytes {
        self.event.parameter().slice(3..)
    }

    /// The status byte leading most return parameters, when present
    pub fn status(&self) -> Option<ErrorCode> {
        self.return_parameter().first().map(|raw| ErrorCode::from_raw(*raw))
    }

    pub fn event(&self) -> &EventView {
        &self.event
    }
}

/// View of a *Command Status* event
#[derive(Debug, Clone)]
pub struct CommandStatusView {
    event: EventView,
}

impl TryFrom<EventView> for CommandStatusView {
    type Error = DecodeError;

    fn try_from(event: EventView) -> Result<Self, Self::Error> {
        if event.event_code() != EventCode::CommandStatus {
            return Err(DecodeError::UnexpectedEventCode {
                requested: "Command Status",
                actual: event.packet[0],
            });
        }

        if event.parameter().len() < 4 {
            return Err(DecodeError::Truncated {
                expected: EVENT_HEADER_LEN + 4,
                actual: event.packet.len(),
            });
        }

        Ok(CommandStatusView { event })
    }
}

impl CommandStatusView {
    pub fn status(&self) -> ErrorCode {
        ErrorCode::from_raw(self.event.parameter()[0])
    }

    pub fn num_hci_command_packets(&self) -> u8 {
        self.event.parameter()[1]
    }

    pub fn command_opcode(&self) -> OpCode {
        let parameter = self.event.parameter();

        OpCode::from_raw(u16::from_le_bytes([parameter[2], parameter[3]]))
    }

    pub fn event(&self) -> &EventView {
        &self.event
    }
}

/// View of an *LE Meta* event
#[derive(Debug, Clone)]
pub struct LeMetaEventView {
    event: EventView,
}

impl TryFrom<EventView> for LeMetaEventView {
    type Error = DecodeError;

    fn try_from(event: EventView) -> Result<Self, Self::Error> {
        if event.event_code() != EventCode::LeMeta {
            return Err(DecodeError::UnexpectedEventCode {
                requested: "LE Meta",
                actual: event.packet[0],
            });
        }

        if event.parameter().is_empty() {
            return Err(DecodeError::Truncated {
                expected: EVENT_HEADER_LEN + 1,
                actual: event.packet.len(),
            });
        }

        Ok(LeMetaEventView { event })
    }
}

impl LeMetaEventView {
    pub fn subevent_code(&self) -> SubeventCode {
        SubeventCode::from_raw(self.event.parameter()[0])
    }

    /// The subevent parameter, everything past the subevent code
    pub fn subevent_parameter(&self) -> Bytes {
        self.event.parameter().slice(1..)
    }

    pub fn event(&self) -> &EventView {
        &self.event
    }
}

/// View of an *LE Connection Complete* subevent
#[derive(Debug, Clone)]
pub struct LeConnectionCompleteView {
    meta: LeMetaEventView,
}

impl TryFrom<LeMetaEventView> for LeConnectionCompleteView {
    type Error = DecodeError;

    fn try_from(meta: LeMetaEventView) -> Result<Self, Self::Error> {
        if meta.subevent_code() != SubeventCode::ConnectionComplete {
            return Err(DecodeError::UnexpectedSubeventCode {
                requested: "LE Connection Complete",
                actual: meta.event.parameter()[0],
            });
        }

        let parameter = meta.subevent_parameter();

        if parameter.len() != 18 {
            return Err(DecodeError::LengthMismatch {
                claimed: 18,
                actual: parameter.len(),
            });
        }

        // surface a bogus handle at decode time instead of from an accessor
        ConnectionHandle::try_from(u16::from_le_bytes([parameter[1], parameter[2]]))?;

        Ok(LeConnectionCompleteView { meta })
    }
}

impl LeConnectionCompleteView {
    pub fn status(&self) -> ErrorCode {
        ErrorCode::from_raw(self.meta.subevent_parameter()[0])
    }

    pub fn connection_handle(&self) -> ConnectionHandle {
        let parameter = self.meta.subevent_parameter();

        // validated when the view was created
        ConnectionHandle::try_from(u16::from_le_bytes([parameter[1], parameter[2]]))
            .unwrap_or_else(|_| unreachable!())
    }

    pub fn role(&self) -> Role {
        Role::from_raw(self.meta.subevent_parameter()[3])
    }

    pub fn peer_address_type(&self) -> AddressType {
        AddressType::from_raw(self.meta.subevent_parameter()[4])
    }

    pub fn peer_address(&self) -> Address {
        let parameter = self.meta.subevent_parameter();

        let mut address = [0u8; 6];
        address.copy_from_slice(&parameter[5..11]);

        Address(address)
    }

    pub fn connection_interval(&self) -> u16 {
        let parameter = self.meta.subevent_parameter();

        u16::from_le_bytes([parameter[11], parameter[12]])
    }

    pub fn connection_latency(&self) -> u16 {
        let parameter = self.meta.subevent_parameter();

        u16::from_le_bytes([parameter[13], parameter[14]])
    }

    pub fn supervision_timeout(&self) -> u16 {
        let parameter = self.meta.subevent_parameter();

        u16::from_le_bytes([parameter[15], parameter[16]])
    }

    /// The central clock accuracy field, as its raw encoding
    pub fn central_clock_accuracy(&self) -> u8 {
        self.meta.subevent_parameter()[17]
    }
}

/// View of a *Connection Complete* event
#[derive(Debug, Clone)]
pub struct ConnectionCompleteView {
    event: EventView,
}

impl TryFrom<EventView> for ConnectionCompleteView {
    type Error = DecodeError;

    fn try_from(event: EventView) -> Result<Self, Self::Error> {
        if event.event_code() != EventCode::ConnectionComplete {
            return Err(DecodeError::UnexpectedEventCode {
                requested: "Connection Complete",
                actual: event.packet[0],
            });
        }

        let parameter = event.parameter();

        if parameter.len() != 11 {
            return Err(DecodeError::LengthMismatch {
                claimed: 11,
                actual: parameter.len(),
            });
        }

        ConnectionHandle::try_from(u16::from_le_bytes([parameter[1], parameter[2]]))?;

        Ok(ConnectionCompleteView { event })
    }
}

impl ConnectionCompleteView {
    pub fn status(&self) -> ErrorCode {
        ErrorCode::from_raw(self.event.parameter()[0])
    }

    pub fn connection_handle(&self) -> ConnectionHandle {
        let parameter = self.event.parameter();

        ConnectionHandle::try_from(u16::from_le_bytes([parameter[1], parameter[2]]))
            .unwrap_or_else(|_| unreachable!())
    }

    pub fn bd_addr(&self) -> Address {
        let parameter = self.event.parameter();

        let mut address = [0u8; 6];
        address.copy_from_slice(&parameter[3..9]);

        Address(address)
    }

    pub fn link_type(&self) -> LinkType {
        LinkType::from_raw(self.event.parameter()[9])
    }

    pub fn encryption_enabled(&self) -> bool {
        self.event.parameter()[10] != 0
    }
}

/// Builder of an HCI event packet
#[derive(Debug)]
pub struct EventBuilder {
    code: EventCode,
    parameter: Bytes,
}

impl EventBuilder {
    pub fn new(code: EventCode, parameter: impl Into<Bytes>) -> EventBuilder {
        let parameter = parameter.into();

        assert!(
            parameter.len() <= u8::MAX as usize,
            "event parameter of {} bytes does not fit the length field",
            parameter.len(),
        );

        EventBuilder { code, parameter }
    }

    pub fn size(&self) -> usize {
        EVENT_HEADER_LEN + self.parameter.len()
    }

    pub fn build(self) -> Bytes {
        let mut packet = BytesMut::with_capacity(self.size());

        packet.put_u8(self.code.raw());
        packet.put_u8(self.parameter.len() as u8);
        packet.extend_from_slice(&self.parameter);

        packet.freeze()
    }

    pub fn command_complete(num_hci_command_packets: u8, opcode: OpCode, return_parameter: &[u8]) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(3 + return_parameter.len());

        parameter.put_u8(num_hci_command_packets);
        parameter.put_u16_le(opcode.raw());
        parameter.extend_from_slice(return_parameter);

        EventBuilder::new(EventCode::CommandComplete, parameter.freeze())
    }

    /// A *Command Complete* with the [`Nop`](OpCode::Nop) opcode, reporting credits without
    /// answering any command
    pub fn no_command_complete(num_hci_command_packets: u8) -> EventBuilder {
        EventBuilder::command_complete(num_hci_command_packets, OpCode::Nop, &[])
    }

    pub fn command_status(status: ErrorCode, num_hci_command_packets: u8, opcode: OpCode) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(4);

        parameter.put_u8(status.raw());
        parameter.put_u8(num_hci_command_packets);
        parameter.put_u16_le(opcode.raw());

        EventBuilder::new(EventCode::CommandStatus, parameter.freeze())
    }

    pub fn connection_complete(
        status: ErrorCode,
        handle: ConnectionHandle,
        bd_addr: Address,
        link_type: LinkType,
        encryption_enabled: bool,
    ) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(11);

        parameter.put_u8(status.raw());
        parameter.put_u16_le(handle.get_raw_handle());
        parameter.extend_from_slice(&bd_addr.0);
        parameter.put_u8(link_type.raw());
        parameter.put_u8(encryption_enabled as u8);

        EventBuilder::new(EventCode::ConnectionComplete, parameter.freeze())
    }

    pub fn encryption_change(status: ErrorCode, handle: ConnectionHandle, enabled: bool) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(4);

        parameter.put_u8(status.raw());
        parameter.put_u16_le(handle.get_raw_handle());
        parameter.put_u8(enabled as u8);

        EventBuilder::new(EventCode::EncryptionChange, parameter.freeze())
    }

    pub fn le_meta(subevent: SubeventCode, subevent_parameter: &[u8]) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(1 + subevent_parameter.len());

        parameter.put_u8(subevent.raw());
        parameter.extend_from_slice(subevent_parameter);

        EventBuilder::new(EventCode::LeMeta, parameter.freeze())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn le_connection_complete(
        status: ErrorCode,
        handle: ConnectionHandle,
        role: Role,
        peer_address_type: AddressType,
        peer_address: Address,
        connection_interval: u16,
        connection_latency: u16,
        supervision_timeout: u16,
        central_clock_accuracy: u8,
    ) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(18);

        parameter.put_u8(status.raw());
        parameter.put_u16_le(handle.get_raw_handle());
        parameter.put_u8(role.raw());
        parameter.put_u8(peer_address_type.raw());
        parameter.extend_from_slice(&peer_address.0);
        parameter.put_u16_le(connection_interval);
        parameter.put_u16_le(connection_latency);
        parameter.put_u16_le(supervision_timeout);
        parameter.put_u8(central_clock_accuracy);

        EventBuilder::le_meta(SubeventCode::ConnectionComplete, &parameter)
    }

    pub fn le_long_term_key_request(handle: ConnectionHandle, random_number: u64, ediv: u16) -> EventBuilder {
        let mut parameter = BytesMut::with_capacity(12);

        parameter.put_u16_le(handle.get_raw_handle());
        parameter.put_u64_le(random_number);
        parameter.put_u16_le(ediv);

        EventBuilder::le_meta(SubeventCode::LongTermKeyRequest, &parameter)
    }
}

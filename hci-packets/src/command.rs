//! HCI command packets
//!
//! A command packet is the opcode, a one byte parameter length, and the parameter bytes. The
//! typed constructors on [`CommandBuilder`] cover the commands used by the protocol engine and
//! its tests; anything else can be built through [`CommandBuilder::new`] with a raw parameter.

use crate::{Address, ConnectionHandle, DecodeError, ErrorCode, OpCode};
use bytes::{BufMut, Bytes, BytesMut};

const COMMAND_HEADER_LEN: usize = 3;

/// Builder of an HCI command packet
#[derive(Debug)]
pub struct CommandBuilder {
    opcode: OpCode,
    parameter: Bytes,
}

impl CommandBuilder {
    pub fn new(opcode: OpCode, parameter: impl Into<Bytes>) -> CommandBuilder {
        let parameter = parameter.into();

        assert!(
            parameter.len() <= u8::MAX as usize,
            "command parameter of {} bytes does not fit the length field",
            parameter.len(),
        );

        CommandBuilder { opcode, parameter }
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The size of the serialized packet in bytes
    pub fn size(&self) -> usize {
        COMMAND_HEADER_LEN + self.parameter.len()
    }

    /// Serialize the command into its framed byte form
    ///
    /// The builder is write-once, serializing consumes it.
    pub fn build(self) -> Bytes {
        let mut packet = BytesMut::with_capacity(self.size());

        packet.put_u16_le(self.opcode.raw());
        packet.put_u8(self.parameter.len() as u8);
        packet.extend_from_slice(&self.parameter);

        packet.freeze()
    }

    pub fn reset() -> CommandBuilder {
        CommandBuilder::new(OpCode::Reset, Bytes::new())
    }

    pub fn read_local_version_information() -> CommandBuilder {
        CommandBuilder::new(OpCode::ReadLocalVersionInformation, Bytes::new())
    }

    pub fn read_local_supported_commands() -> CommandBuilder {
        CommandBuilder::new(OpCode::ReadLocalSupportedCommands, Bytes::new())
    }

    pub fn read_local_supported_features() -> CommandBuilder {
        CommandBuilder::new(OpCode::ReadLocalSupportedFeatures, Bytes::new())
    }

    pub fn controller_debug_info() -> CommandBuilder {
        CommandBuilder::new(OpCode::ControllerDebugInfo, Bytes::new())
    }

    pub fn le_rand() -> CommandBuilder {
        CommandBuilder::new(OpCode::LeRand, Bytes::new())
    }

    pub fn write_simple_pairing_mode(enabled: bool) -> CommandBuilder {
        CommandBuilder::new(OpCode::WriteSimplePairingMode, Bytes::copy_from_slice(&[enabled as u8]))
    }

    pub fn create_connection(
        bd_addr: Address,
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: bool,
    ) -> CommandBuilder {
        let mut parameter = BytesMut::with_capacity(13);

        parameter.extend_from_slice(&bd_addr.0);
        parameter.put_u16_le(packet_type);
        parameter.put_u8(page_scan_repetition_mode);
        // reserved
        parameter.put_u8(0);
        parameter.put_u16_le(clock_offset);
        parameter.put_u8(allow_role_switch as u8);

        CommandBuilder::new(OpCode::CreateConnection, parameter.freeze())
    }

    pub fn disconnect(handle: ConnectionHandle, reason: ErrorCode) -> CommandBuilder {
        let mut parameter = BytesMut::with_capacity(3);

        parameter.put_u16_le(handle.get_raw_handle());
        parameter.put_u8(reason.raw());

        CommandBuilder::new(OpCode::Disconnect, parameter.freeze())
    }
}

/// View of an HCI command packet
///
/// Commands travel host to controller, so this view is only exercised by controller-side code
/// such as the test harness around the protocol engine.
#[derive(Debug, Clone)]
pub struct CommandView {
    packet: Bytes,
}

impl CommandView {
    pub fn decode(packet: Bytes) -> Result<CommandView, DecodeError> {
        if packet.len() < COMMAND_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: COMMAND_HEADER_LEN,
                actual: packet.len(),
            });
        }

        let claimed = packet[2] as usize;

        if packet.len() != COMMAND_HEADER_LEN + claimed {
            return Err(DecodeError::LengthMismatch {
                claimed,
                actual: packet.len() - COMMAND_HEADER_LEN,
            });
        }

        Ok(CommandView { packet })
    }

    pub fn opcode(&self) -> OpCode {
        OpCode::from_raw(u16::from_le_bytes([self.packet[0], self.packet[1]]))
    }

    pub fn parameter(&self) -> Bytes {
        self.packet.slice(COMMAND_HEADER_LEN..)
    }
}

//! Numeric discriminants of HCI packets
//!
//! The enumerations here cover the portion of the command, event, and error catalogs that the
//! protocol engine itself deals in. Everything else round-trips through the `Raw` variants, an
//! unknown code is not a decoding failure.

/// A command opcode
///
/// The opcode is the 16 bit value at the start of every command packet, a 6 bit *opcode group
/// field* combined with a 10 bit *opcode command field*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Opcode 0x0000, used by the controller in credit-only *Command Complete* events
    Nop,
    CreateConnection,
    Disconnect,
    Reset,
    WriteSimplePairingMode,
    ReadLocalVersionInformation,
    ReadLocalSupportedCommands,
    ReadLocalSupportedFeatures,
    LeRand,
    /// Vendor-specific command asking the controller to log its internal state
    ControllerDebugInfo,
    Raw(u16),
}

impl OpCode {
    pub fn from_raw(raw: u16) -> OpCode {
        match raw {
            0x0000 => OpCode::Nop,
            0x0405 => OpCode::CreateConnection,
            0x0406 => OpCode::Disconnect,
            0x0C03 => OpCode::Reset,
            0x0C56 => OpCode::WriteSimplePairingMode,
            0x1001 => OpCode::ReadLocalVersionInformation,
            0x1002 => OpCode::ReadLocalSupportedCommands,
            0x1003 => OpCode::ReadLocalSupportedFeatures,
            0x2018 => OpCode::LeRand,
            0xFC5A => OpCode::ControllerDebugInfo,
            raw => OpCode::Raw(raw),
        }
    }

    pub fn raw(&self) -> u16 {
        match self {
            OpCode::Nop => 0x0000,
            OpCode::CreateConnection => 0x0405,
            OpCode::Disconnect => 0x0406,
            OpCode::Reset => 0x0C03,
            OpCode::WriteSimplePairingMode => 0x0C56,
            OpCode::ReadLocalVersionInformation => 0x1001,
            OpCode::ReadLocalSupportedCommands => 0x1002,
            OpCode::ReadLocalSupportedFeatures => 0x1003,
            OpCode::LeRand => 0x2018,
            OpCode::ControllerDebugInfo => 0xFC5A,
            OpCode::Raw(raw) => *raw,
        }
    }

    /// Get the opcode group field
    pub fn group(&self) -> u8 {
        (self.raw() >> 10) as u8
    }
}

/// An event code
///
/// The event code is the first byte of every event packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    ConnectionComplete,
    DisconnectionComplete,
    EncryptionChange,
    CommandComplete,
    CommandStatus,
    LinkKeyNotification,
    /// The container code for LE events, see [`SubeventCode`]
    LeMeta,
    Raw(u8),
}

impl EventCode {
    pub fn from_raw(raw: u8) -> EventCode {
        match raw {
            0x03 => EventCode::ConnectionComplete,
            0x05 => EventCode::DisconnectionComplete,
            0x08 => EventCode::EncryptionChange,
            0x0E => EventCode::CommandComplete,
            0x0F => EventCode::CommandStatus,
            0x18 => EventCode::LinkKeyNotification,
            0x3E => EventCode::LeMeta,
            raw => EventCode::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            EventCode::ConnectionComplete => 0x03,
            EventCode::DisconnectionComplete => 0x05,
            EventCode::EncryptionChange => 0x08,
            EventCode::CommandComplete => 0x0E,
            EventCode::CommandStatus => 0x0F,
            EventCode::LinkKeyNotification => 0x18,
            EventCode::LeMeta => 0x3E,
            EventCode::Raw(raw) => *raw,
        }
    }
}

/// The subevent code within an *LE Meta* event
///
/// The subevent code is the first byte of the event parameter of every LE Meta event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubeventCode {
    ConnectionComplete,
    AdvertisingReport,
    LongTermKeyRequest,
    Raw(u8),
}

impl SubeventCode {
    pub fn from_raw(raw: u8) -> SubeventCode {
        match raw {
            0x01 => SubeventCode::ConnectionComplete,
            0x02 => SubeventCode::AdvertisingReport,
            0x05 => SubeventCode::LongTermKeyRequest,
            raw => SubeventCode::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            SubeventCode::ConnectionComplete => 0x01,
            SubeventCode::AdvertisingReport => 0x02,
            SubeventCode::LongTermKeyRequest => 0x05,
            SubeventCode::Raw(raw) => *raw,
        }
    }
}

/// A controller error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    UnknownHciCommand,
    UnknownConnectionIdentifier,
    HardwareFailure,
    PageTimeout,
    AuthenticationFailure,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    RemoteUserTerminatedConnection,
    Raw(u8),
}

impl ErrorCode {
    pub fn from_raw(raw: u8) -> ErrorCode {
        match raw {
            0x00 => ErrorCode::Success,
            0x01 => ErrorCode::UnknownHciCommand,
            0x02 => ErrorCode::UnknownConnectionIdentifier,
            0x03 => ErrorCode::HardwareFailure,
            0x04 => ErrorCode::PageTimeout,
            0x05 => ErrorCode::AuthenticationFailure,
            0x07 => ErrorCode::MemoryCapacityExceeded,
            0x08 => ErrorCode::ConnectionTimeout,
            0x13 => ErrorCode::RemoteUserTerminatedConnection,
            raw => ErrorCode::Raw(raw),
        }
    }

    pub fn raw(&self) -> u8 {
        match self {
            ErrorCode::Success => 0x00,
            ErrorCode::UnknownHciCommand => 0x01,
            ErrorCode::UnknownConnectionIdentifier => 0x02,
            ErrorCode::HardwareFailure => 0x03,
            ErrorCode::PageTimeout => 0x04,
            ErrorCode::AuthenticationFailure => 0x05,
            ErrorCode::MemoryCapacityExceeded => 0x07,
            ErrorCode::ConnectionTimeout => 0x08,
            ErrorCode::RemoteUserTerminatedConnection => 0x13,
            ErrorCode::Raw(raw) => *raw,
        }
    }
}

//! HCI data packets
//!
//! ACL, SCO, and ISO data packets all start with a 16 bit field packing the connection handle
//! into the low twelve bits and per-kind flags into the high four, followed by a payload length
//! and the payload itself.

use crate::{ConnectionHandle, DecodeError};
use bytes::{BufMut, Bytes, BytesMut};

const ACL_HEADER_LEN: usize = 4;
const ISO_HEADER_LEN: usize = 4;
const SCO_HEADER_LEN: usize = 3;

/// The packet boundary flag of an ACL data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPacketBoundary {
    FirstNonFlushable,
    ContinuingFragment,
    FirstAutoFlushable,
    CompleteL2capPdu,
}

impl AclPacketBoundary {
    /// Get the value shifted into the packet boundary position of the first header field
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclPacketBoundary::FirstNonFlushable => 0x0,
            AclPacketBoundary::ContinuingFragment => 0x1,
            AclPacketBoundary::FirstAutoFlushable => 0x2,
            AclPacketBoundary::CompleteL2capPdu => 0x3,
        }) << 12
    }

    /// Get the `AclPacketBoundary` from the first 16 bits of an ACL data packet header. The input
    /// does not need to be masked down to the packet boundary bits.
    fn from_shifted_val(val: u16) -> Self {
        match (val >> 12) & 3 {
            0x0 => AclPacketBoundary::FirstNonFlushable,
            0x1 => AclPacketBoundary::ContinuingFragment,
            0x2 => AclPacketBoundary::FirstAutoFlushable,
            _ => AclPacketBoundary::CompleteL2capPdu,
        }
    }
}

/// The broadcast flag of an ACL data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclBroadcastFlag {
    PointToPoint,
    BrEdrBroadcast,
}

impl AclBroadcastFlag {
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclBroadcastFlag::PointToPoint => 0x0,
            AclBroadcastFlag::BrEdrBroadcast => 0x1,
        }) << 14
    }

    fn from_shifted_val(val: u16) -> Result<Self, DecodeError> {
        match (val >> 14) & 3 {
            0x0 => Ok(AclBroadcastFlag::PointToPoint),
            0x1 => Ok(AclBroadcastFlag::BrEdrBroadcast),
            val => Err(DecodeError::ReservedFlagValue {
                field: "broadcast flag",
                value: val as u8,
            }),
        }
    }
}

/// Builder of an HCI ACL data packet
#[derive(Debug)]
pub struct AclBuilder {
    handle: ConnectionHandle,
    packet_boundary: AclPacketBoundary,
    broadcast: AclBroadcastFlag,
    payload: Bytes,
}

impl AclBuilder {
    pub fn new(
        handle: ConnectionHandle,
        packet_boundary: AclPacketBoundary,
        broadcast: AclBroadcastFlag,
        payload: impl Into<Bytes>,
    ) -> AclBuilder {
        let payload = payload.into();

        assert!(
            payload.len() <= u16::MAX as usize,
            "ACL payload of {} bytes does not fit the length field",
            payload.len(),
        );

        AclBuilder {
            handle,
            packet_boundary,
            broadcast,
            payload,
        }
    }

    pub fn size(&self) -> usize {
        ACL_HEADER_LEN + self.payload.len()
    }

    pub fn build(self) -> Bytes {
        let first = self.handle.get_raw_handle()
            | self.packet_boundary.get_shifted_val()
            | self.broadcast.get_shifted_val();

        let mut packet = BytesMut::with_capacity(self.size());

        packet.put_u16_le(first);
        packet.put_u16_le(self.payload.len() as u16);
        packet.extend_from_slice(&self.payload);

        packet.freeze()
    }
}

/// View of an HCI ACL data packet
#[derive(Debug, Clone)]
pub struct AclView {
    packet: Bytes,
}

impl AclView {
    pub fn decode(packet: Bytes) -> Result<AclView, DecodeError> {
        if packet.len() < ACL_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: ACL_HEADER_LEN,
                actual: packet.len(),
            });
        }

        let claimed = u16::from_le_bytes([packet[2], packet[3]]) as usize;

        if packet.len() != ACL_HEADER_LEN + claimed {
            return Err(DecodeError::LengthMismatch {
                claimed,
                actual: packet.len() - ACL_HEADER_LEN,
            });
        }

        let first = u16::from_le_bytes([packet[0], packet[1]]);

        ConnectionHandle::try_from(first & 0x0FFF)?;
        AclBroadcastFlag::from_shifted_val(first)?;

        Ok(AclView { packet })
    }

    fn first_field(&self) -> u16 {
        u16::from_le_bytes([self.packet[0], self.packet[1]])
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::try_from(self.first_field() & 0x0FFF).unwrap_or_else(|_| unreachable!())
    }

    pub fn packet_boundary(&self) -> AclPacketBoundary {
        AclPacketBoundary::from_shifted_val(self.first_field())
    }

    pub fn broadcast_flag(&self) -> AclBroadcastFlag {
        AclBroadcastFlag::from_shifted_val(self.first_field()).unwrap_or_else(|_| unreachable!())
    }

    pub fn payload(&self) -> Bytes {
        self.packet.slice(ACL_HEADER_LEN..)
    }
}

/// The packet boundary flag of an ISO data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoPacketBoundary {
    FirstFragment,
    ContinuationFragment,
    CompleteSdu,
    LastFragment,
}

impl IsoPacketBoundary {
    fn get_shifted_val(&self) -> u16 {
        (match self {
            IsoPacketBoundary::FirstFragment => 0x0,
            IsoPacketBoundary::ContinuationFragment => 0x1,
            IsoPacketBoundary::CompleteSdu => 0x2,
            IsoPacketBoundary::LastFragment => 0x3,
        }) << 12
    }

    fn from_shifted_val(val: u16) -> Self {
        match (val >> 12) & 3 {
            0x0 => IsoPacketBoundary::FirstFragment,
            0x1 => IsoPacketBoundary::ContinuationFragment,
            0x2 => IsoPacketBoundary::CompleteSdu,
            _ => IsoPacketBoundary::LastFragment,
        }
    }
}

/// Builder of an HCI ISO data packet
///
/// When a timestamp is given it is serialized ahead of the payload within the data load, with the
/// timestamp flag set in the header.
#[derive(Debug)]
pub struct IsoBuilder {
    handle: ConnectionHandle,
    packet_boundary: IsoPacketBoundary,
    timestamp: Option<u32>,
    payload: Bytes,
}

impl IsoBuilder {
    pub fn new(
        handle: ConnectionHandle,
        packet_boundary: IsoPacketBoundary,
        timestamp: Option<u32>,
        payload: impl Into<Bytes>,
    ) -> IsoBuilder {
        let payload = payload.into();
        let load_len = timestamp.map_or(0, |_| 4) + payload.len();

        // the length field is 14 bits
        assert!(load_len <= 0x3FFF, "ISO data load of {} bytes does not fit the length field", load_len);

        IsoBuilder {
            handle,
            packet_boundary,
            timestamp,
            payload,
        }
    }

    pub fn size(&self) -> usize {
        ISO_HEADER_LEN + self.timestamp.map_or(0, |_| 4) + self.payload.len()
    }

    pub fn build(self) -> Bytes {
        let ts_flag = if self.timestamp.is_some() { 1u16 << 14 } else { 0 };

        let first = self.handle.get_raw_handle() | self.packet_boundary.get_shifted_val() | ts_flag;

        let load_len = (self.timestamp.map_or(0, |_| 4) + self.payload.len()) as u16;

        let mut packet = BytesMut::with_capacity(ISO_HEADER_LEN + load_len as usize);

        packet.put_u16_le(first);
        packet.put_u16_le(load_len);

        if let Some(timestamp) = self.timestamp {
            packet.put_u32_le(timestamp);
        }

        packet.extend_from_slice(&self.payload);

        packet.freeze()
    }
}

/// View of an HCI ISO data packet
#[derive(Debug, Clone)]
pub struct IsoView {
    packet: Bytes,
}

impl IsoView {
    pub fn decode(packet: Bytes) -> Result<IsoView, DecodeError> {
        if packet.len() < ISO_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: ISO_HEADER_LEN,
                actual: packet.len(),
            });
        }

        let claimed = (u16::from_le_bytes([packet[2], packet[3]]) & 0x3FFF) as usize;

        if packet.len() != ISO_HEADER_LEN + claimed {
            return Err(DecodeError::LengthMismatch {
                claimed,
                actual: packet.len() - ISO_HEADER_LEN,
            });
        }

        ConnectionHandle::try_from(u16::from_le_bytes([packet[0], packet[1]]) & 0x0FFF)?;

        let view = IsoView { packet };

        if view.timestamp_present() && claimed < 4 {
            return Err(DecodeError::Truncated {
                expected: ISO_HEADER_LEN + 4,
                actual: view.packet.len(),
            });
        }

        Ok(view)
    }

    fn first_field(&self) -> u16 {
        u16::from_le_bytes([self.packet[0], self.packet[1]])
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::try_from(self.first_field() & 0x0FFF).unwrap_or_else(|_| unreachable!())
    }

    pub fn packet_boundary(&self) -> IsoPacketBoundary {
        IsoPacketBoundary::from_shifted_val(self.first_field())
    }

    fn timestamp_present(&self) -> bool {
        self.first_field() & (1 << 14) != 0
    }

    pub fn timestamp(&self) -> Option<u32> {
        self.timestamp_present().then(|| {
            u32::from_le_bytes([self.packet[4], self.packet[5], self.packet[6], self.packet[7]])
        })
    }

    /// The data load past the timestamp, when one is present
    pub fn payload(&self) -> Bytes {
        let offset = ISO_HEADER_LEN + if self.timestamp_present() { 4 } else { 0 };

        self.packet.slice(offset..)
    }
}

/// View of an HCI SCO data packet
///
/// SCO data is decoded for completeness of the boundary; the protocol engine has no synchronous
/// data path and drops these after logging.
#[derive(Debug, Clone)]
pub struct ScoView {
    packet: Bytes,
}

impl ScoView {
    pub fn decode(packet: Bytes) -> Result<ScoView, DecodeError> {
        if packet.len() < SCO_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: SCO_HEADER_LEN,
                actual: packet.len(),
            });
        }

        let claimed = packet[2] as usize;

        if packet.len() != SCO_HEADER_LEN + claimed {
            return Err(DecodeError::LengthMismatch {
                claimed,
                actual: packet.len() - SCO_HEADER_LEN,
            });
        }

        ConnectionHandle::try_from(u16::from_le_bytes([packet[0], packet[1]]) & 0x0FFF)?;

        Ok(ScoView { packet })
    }

    pub fn handle(&self) -> ConnectionHandle {
        let first = u16::from_le_bytes([self.packet[0], self.packet[1]]);

        ConnectionHandle::try_from(first & 0x0FFF).unwrap_or_else(|_| unreachable!())
    }

    pub fn payload(&self) -> Bytes {
        self.packet.slice(SCO_HEADER_LEN..)
    }
}

//! Big-endian readers and writers for the fixed parts of the export formats.
//!
//! Every function here is a pure transform over a byte slice: nothing is cached and
//! nothing is mutated besides the output buffer handed to the `encode_*` writers.

use num_traits::FromPrimitive;
use std::fmt;

use crate::error::DecodeError;
use crate::flow::{FieldSpec, FieldValue, Version};

#[inline]
pub(crate) fn be_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

#[inline]
pub(crate) fn be_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[inline]
pub(crate) fn be_u64(buf: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[0..8]);
    u64::from_be_bytes(raw)
}

#[inline]
pub(crate) fn ensure(buf: &[u8], need: usize, what: &'static str) -> Result<(), DecodeError> {
    if buf.len() < need {
        return Err(DecodeError::Truncated { what, need, have: buf.len() });
    }
    Ok(())
}

/******************************** MSG HEADER ********************************/

/// Common view over the v5, v9 and IPFIX message headers.
///
/// v5 (24 bytes): version, count, sys_uptime, unix_secs, unix_nsecs, flow_sequence,
/// engine_type, engine_id, sampling.
/// v9 (20 bytes): version, count, sys_uptime, unix_secs, package_sequence, source_id.
/// IPFIX (16 bytes): version, length, export_time, sequence, observation_domain_id.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PacketHeader {
    pub version: Version,
    pub length: u16,       // Record count for v5/v9, total message length in octets for IPFIX
    pub sys_uptime: u32,   // Milliseconds since the exporter booted, 0 for IPFIX
    pub export_time: u32,  // Seconds since the UNIX epoch
    pub export_nanos: u32, // Residual nanoseconds, v5 only
    pub sequence: u32,     // Flow (v5), packet (v9) or data record (IPFIX) sequence counter
    pub domain_id: u32,    // Source id (v9), observation domain (IPFIX), engine type/id (v5)
    pub sampling: u16,     // v5 sampling mode (2 bits) and interval (14 bits)
}

impl PacketHeader {
    pub const NETFLOW5_SIZE: usize = 24;
    pub const NETFLOW9_SIZE: usize = 20;
    pub const IPFIX_SIZE: usize = 16;

    pub fn size_of(version: Version) -> usize {
        match version {
            Version::NetflowV5 => Self::NETFLOW5_SIZE,
            Version::NetflowV9 => Self::NETFLOW9_SIZE,
            Version::Ipfix => Self::IPFIX_SIZE,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        Self::size_of(self.version)
    }

    #[inline]
    pub fn sampling_mode(&self) -> u16 {
        self.sampling >> 14
    }

    #[inline]
    pub fn sampling_interval(&self) -> u16 {
        self.sampling & 0b0011_1111_1111_1111
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "version: {}, length: {}, export_time: {}s, sequence: {}, domain_id: {}",
            self.version, self.length, self.export_time, self.sequence, self.domain_id
        )
    }
}

/// Reads the message header at the start of a datagram.
pub fn decode_header(buf: &[u8]) -> Result<PacketHeader, DecodeError> {
    ensure(buf, 2, "export version")?;

    let code = be_u16(buf);
    let version: Version = FromPrimitive::from_u16(code).ok_or(DecodeError::UnsupportedVersion(code))?;
    ensure(buf, PacketHeader::size_of(version), "export header")?;

    Ok(match version {
        Version::NetflowV5 => PacketHeader {
            version,
            length: be_u16(&buf[2..4]),
            sys_uptime: be_u32(&buf[4..8]),
            export_time: be_u32(&buf[8..12]),
            export_nanos: be_u32(&buf[12..16]),
            sequence: be_u32(&buf[16..20]),
            domain_id: ((buf[20] as u32) << 8) | buf[21] as u32,
            sampling: be_u16(&buf[22..24]),
        },
        Version::NetflowV9 => PacketHeader {
            version,
            length: be_u16(&buf[2..4]),
            sys_uptime: be_u32(&buf[4..8]),
            export_time: be_u32(&buf[8..12]),
            export_nanos: 0,
            sequence: be_u32(&buf[12..16]),
            domain_id: be_u32(&buf[16..20]),
            sampling: 0,
        },
        Version::Ipfix => PacketHeader {
            version,
            length: be_u16(&buf[2..4]),
            sys_uptime: 0,
            export_time: be_u32(&buf[4..8]),
            export_nanos: 0,
            sequence: be_u32(&buf[8..12]),
            domain_id: be_u32(&buf[12..16]),
            sampling: 0,
        },
    })
}

/// Writes `header` in the layout of its version.
pub fn encode_header(header: &PacketHeader, out: &mut Vec<u8>) {
    out.extend_from_slice(&header.version.code().to_be_bytes());
    out.extend_from_slice(&header.length.to_be_bytes());

    match header.version {
        Version::NetflowV5 => {
            out.extend_from_slice(&header.sys_uptime.to_be_bytes());
            out.extend_from_slice(&header.export_time.to_be_bytes());
            out.extend_from_slice(&header.export_nanos.to_be_bytes());
            out.extend_from_slice(&header.sequence.to_be_bytes());
            out.push((header.domain_id >> 8) as u8);
            out.push(header.domain_id as u8);
            out.extend_from_slice(&header.sampling.to_be_bytes());
        }
        Version::NetflowV9 => {
            out.extend_from_slice(&header.sys_uptime.to_be_bytes());
            out.extend_from_slice(&header.export_time.to_be_bytes());
            out.extend_from_slice(&header.sequence.to_be_bytes());
            out.extend_from_slice(&header.domain_id.to_be_bytes());
        }
        Version::Ipfix => {
            out.extend_from_slice(&header.export_time.to_be_bytes());
            out.extend_from_slice(&header.sequence.to_be_bytes());
            out.extend_from_slice(&header.domain_id.to_be_bytes());
        }
    }
}

/******************************** SET HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |          Set ID               |          Length               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
/// NetFlow v9 calls it a FlowSet header, the layout is the same.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SetHeader {
    pub id: u16,     // Identifies the Set.
    pub length: u16, // Total length of the Set, in octets, including the Set Header, all records, and the optional padding
}

impl SetHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "set header")?;

        Ok(SetHeader {
            id: be_u16(&buf[0..2]),
            length: be_u16(&buf[2..4]),
        })
    }

    #[inline]
    pub fn content_size(&self) -> usize {
        (self.length as usize).saturating_sub(Self::SIZE)
    }
}

pub fn encode_set_header(id: u16, length: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
}

/******************************** FIELD SPECIFIER ********************************/

/// Writes a field specifier; the enterprise bit is set when the specifier carries one.
pub fn encode_field_spec(spec: &FieldSpec, out: &mut Vec<u8>) {
    match spec.enterprise {
        Some(pen) => {
            out.extend_from_slice(&(spec.type_code | 0x8000).to_be_bytes());
            out.extend_from_slice(&spec.length.to_be_bytes());
            out.extend_from_slice(&pen.to_be_bytes());
        }
        None => {
            out.extend_from_slice(&spec.type_code.to_be_bytes());
            out.extend_from_slice(&spec.length.to_be_bytes());
        }
    }
}

/******************************** FIELD VALUE ********************************/

/// Reads the length prefix of a variable-length value.
///
/// Returns the value length and the size of the prefix: one byte below 255,
/// otherwise the 255 marker followed by a two-byte length.
pub fn read_variable_length(buf: &[u8]) -> Result<(usize, usize), DecodeError> {
    ensure(buf, 1, "variable length prefix")?;

    if buf[0] < 255 {
        return Ok((buf[0] as usize, 1));
    }

    ensure(buf, 3, "variable length prefix")?;
    Ok((be_u16(&buf[1..3]) as usize, 3))
}

pub fn encode_variable_length(length: usize, out: &mut Vec<u8>) {
    if length < 255 {
        out.push(length as u8);
    } else {
        out.push(255);
        out.extend_from_slice(&(length as u16).to_be_bytes());
    }
}

/// Decodes the value described by `spec` from the start of `buf`.
///
/// Returns the value and the number of bytes consumed, length prefix included.
pub fn decode_field_value(buf: &[u8], spec: &FieldSpec) -> Result<(FieldValue, usize), DecodeError> {
    let (length, prefix) = if spec.is_variable() {
        read_variable_length(buf)?
    } else {
        (spec.length as usize, 0)
    };

    let remaining = buf.len() - prefix;
    if length > remaining {
        return Err(DecodeError::FieldOverrun { type_code: spec.type_code, length, remaining });
    }

    let raw = &buf[prefix..prefix + length];
    let value = if spec.is_variable() {
        FieldValue::Octets(raw.to_vec())
    } else {
        match length {
            1 => FieldValue::U8(raw[0]),
            2 => FieldValue::U16(be_u16(raw)),
            4 => FieldValue::U32(be_u32(raw)),
            8 => FieldValue::U64(be_u64(raw)),
            _ => FieldValue::Octets(raw.to_vec()),
        }
    };

    Ok((value, prefix + length))
}

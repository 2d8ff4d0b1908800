use num_derive::FromPrimitive;
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

pub mod codec;
pub mod field;
pub mod flowset;
pub mod ipfix;
pub mod netflow5;
pub mod netflow9;
pub mod record;

/// Export protocol versions understood by the collector.
#[derive(FromPrimitive, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone)]
#[repr(u16)]
pub enum Version {
    NetflowV5 = 5,
    NetflowV9 = 9,
    Ipfix = 10,
}

impl Version {
    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::NetflowV5 => write!(f, "netflow-v5"),
            Version::NetflowV9 => write!(f, "netflow-v9"),
            Version::Ipfix => write!(f, "ipfix"),
        }
    }
}

/// Identity of one exporting process: the sender address plus its observation domain
/// (source id for v9, engine type/id for v5).
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone)]
pub struct ExporterId {
    pub addr: SocketAddr,
    pub domain_id: u32,
}

impl ExporterId {
    pub fn new(addr: SocketAddr, domain_id: u32) -> Self {
        ExporterId { addr, domain_id }
    }
}

impl fmt::Display for ExporterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.domain_id)
    }
}

/// from https://tools.ietf.org/html/rfc7011#section-3.2
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |E|  Information Element ident. |        Field Length           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Enterprise Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone)]
pub struct FieldSpec {
    pub type_code: u16,          // Information element identifier, enterprise bit stripped
    pub length: u16,             // Length in octets, VARIABLE_LENGTH for length-prefixed values
    pub enterprise: Option<u32>, // Private enterprise number for vendor fields
}

impl FieldSpec {
    pub const VARIABLE_LENGTH: u16 = 0xffff;

    pub fn new(type_code: u16, length: u16) -> Self {
        FieldSpec { type_code, length, enterprise: None }
    }

    pub fn with_enterprise(type_code: u16, length: u16, enterprise: u32) -> Self {
        FieldSpec { type_code, length, enterprise: Some(enterprise) }
    }

    #[inline]
    pub fn is_variable(&self) -> bool {
        self.length == Self::VARIABLE_LENGTH
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.enterprise {
            Some(pen) => write!(f, "{}:{}", pen, self.type_code)?,
            None => write!(f, "{}", self.type_code)?,
        }

        if self.is_variable() {
            write!(f, " (variable)")
        } else {
            write!(f, " ({} bytes)", self.length)
        }
    }
}

/// A decoded field value tagged with its semantic type.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Mac([u8; 6]),
    Octets(Vec<u8>),
    String(String),
}

impl FieldValue {
    /// The value as it was laid out on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::U8(v) => vec![*v],
            FieldValue::U16(v) => v.to_be_bytes().to_vec(),
            FieldValue::U32(v) => v.to_be_bytes().to_vec(),
            FieldValue::U64(v) => v.to_be_bytes().to_vec(),
            FieldValue::Ipv4(v) => v.octets().to_vec(),
            FieldValue::Ipv6(v) => v.octets().to_vec(),
            FieldValue::Mac(v) => v.to_vec(),
            FieldValue::Octets(v) => v.clone(),
            FieldValue::String(v) => v.as_bytes().to_vec(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::U8(v) => v.fmt(f),
            FieldValue::U16(v) => v.fmt(f),
            FieldValue::U32(v) => v.fmt(f),
            FieldValue::U64(v) => v.fmt(f),
            FieldValue::Ipv4(v) => v.fmt(f),
            FieldValue::Ipv6(v) => v.fmt(f),
            FieldValue::Mac(v) => write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", v[0], v[1], v[2], v[3], v[4], v[5]),
            FieldValue::Octets(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            FieldValue::String(v) => v.fmt(f),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::U8(v) => serializer.serialize_u8(*v),
            FieldValue::U16(v) => serializer.serialize_u16(*v),
            FieldValue::U32(v) => serializer.serialize_u32(*v),
            FieldValue::U64(v) => serializer.serialize_u64(*v),
            FieldValue::String(v) => serializer.serialize_str(v),
            _ => serializer.collect_str(self),
        }
    }
}

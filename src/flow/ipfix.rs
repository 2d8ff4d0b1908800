use crate::error::DecodeError;
use crate::flow::codec::{be_u16, be_u32, ensure};
use crate::flow::FieldSpec;
use crate::template::{Template, TemplateKind};

pub const TEMPLATE_SET_ID: u16 = 2;
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 3;

/******************************** TEMPLATE HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Template ID (> 255)      |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct TemplateHeader {
    pub id: u16,          // Each Template Record is given a unique Template ID in the range 256 to 65535
    pub field_count: u16, // Number of fields in this Template Record, 0 for a withdrawal
}

impl TemplateHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "IPFIX template header")?;

        Ok(TemplateHeader {
            id: be_u16(&buf[0..2]),
            field_count: be_u16(&buf[2..4]),
        })
    }
}

/********************************  OPTION TEMPLATE HEADER ********************************/

/// from https://tools.ietf.org/html/rfc7011
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Template ID (> 255)   |         Field Count           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Scope Field Count        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct OptionTemplateHeader {
    pub id: u16,                // Options Template id in the range 256 to 65535
    pub field_count: u16,       // Number of all fields in this Options Template Record, including the Scope Fields
    pub scope_field_count: u16, // Number of scope fields in this Options Template Record
}

impl OptionTemplateHeader {
    pub const SIZE: usize = 6;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "IPFIX options template header")?;

        Ok(OptionTemplateHeader {
            id: be_u16(&buf[0..2]),
            field_count: be_u16(&buf[2..4]),
            scope_field_count: be_u16(&buf[4..6]),
        })
    }
}

/********************************  TEMPLATE RECORD FIELD ********************************/

/// Reads one field specifier, returning it with the number of bytes it took (4 or 8).
pub fn read_field_spec(buf: &[u8]) -> Result<(FieldSpec, usize), DecodeError> {
    ensure(buf, 4, "IPFIX field specifier")?;

    let raw_id = be_u16(&buf[0..2]);
    let length = be_u16(&buf[2..4]);

    if raw_id & 0x8000 == 0 {
        return Ok((FieldSpec::new(raw_id, length), 4));
    }

    ensure(buf, 8, "IPFIX enterprise field specifier")?;
    Ok((FieldSpec::with_enterprise(raw_id & 0x7fff, length, be_u32(&buf[4..8])), 8))
}

/******************************** TEMPLATE RECORDS ********************************/

/// from https://tools.ietf.org/html/rfc7011#section-8.1
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Withdrawal {
    Template(u16),
    AllTemplates,
    AllOptionsTemplates,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TemplateRecord {
    Define(Template),
    Withdraw(Withdrawal),
}

fn read_specs(buf: &[u8], count: u16) -> Result<(Vec<FieldSpec>, usize), DecodeError> {
    let mut fields = Vec::with_capacity(count as usize);
    let mut offset = 0;

    for _ in 0..count {
        let (spec, used) = read_field_spec(&buf[offset..])?;
        fields.push(spec);
        offset += used;
    }

    Ok((fields, offset))
}

fn is_padding(rest: &[u8]) -> bool {
    rest.len() < TemplateHeader::SIZE || rest.iter().all(|b| *b == 0)
}

/// Reads every record of a template set (set id 2) or options template set (set id 3).
pub fn read_template_set(content: &[u8], options: bool) -> Result<Vec<TemplateRecord>, DecodeError> {
    let mut records = vec![];
    let mut offset = 0;

    while !is_padding(&content[offset..]) {
        let rest = &content[offset..];

        let (id, field_count, scope_field_count, header_size) = if options {
            let header = TemplateHeader::read(rest)?;
            if header.field_count == 0 {
                // withdrawals carry no scope count
                (header.id, 0, 0, TemplateHeader::SIZE)
            } else {
                let header = OptionTemplateHeader::read(rest)?;
                (header.id, header.field_count, header.scope_field_count, OptionTemplateHeader::SIZE)
            }
        } else {
            let header = TemplateHeader::read(rest)?;
            (header.id, header.field_count, 0, TemplateHeader::SIZE)
        };

        if field_count == 0 {
            records.push(TemplateRecord::Withdraw(match id {
                TEMPLATE_SET_ID if !options => Withdrawal::AllTemplates,
                OPTIONS_TEMPLATE_SET_ID if options => Withdrawal::AllOptionsTemplates,
                id if id >= 256 => Withdrawal::Template(id),
                id => return Err(DecodeError::InvalidTemplate { template_id: id, reason: "withdrawal of a reserved id" }),
            }));
            offset += header_size;
            continue;
        }

        if id < 256 {
            return Err(DecodeError::InvalidTemplate { template_id: id, reason: "template id below 256" });
        }
        if options && (scope_field_count == 0 || scope_field_count > field_count) {
            return Err(DecodeError::InvalidTemplate { template_id: id, reason: "bad scope field count" });
        }

        let (fields, used) = read_specs(&rest[header_size..], field_count)?;
        let kind = if options { TemplateKind::Options { scope_field_count } } else { TemplateKind::Data };

        let template = Template { id, kind, fields };
        if template.min_record_length() == 0 {
            return Err(DecodeError::InvalidTemplate { template_id: id, reason: "zero length record" });
        }

        records.push(TemplateRecord::Define(template));
        offset += header_size + used;
    }

    Ok(records)
}

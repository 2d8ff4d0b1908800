use crate::error::DecodeError;
use crate::flow::codec::{be_u16, ensure};
use crate::flow::FieldSpec;
use crate::template::{Template, TemplateKind};

pub const TEMPLATE_FLOWSET_ID: u16 = 0;
pub const OPTIONS_TEMPLATE_FLOWSET_ID: u16 = 1;

/// Scope field types of v9 options templates, they overlap the regular element ids.
pub fn scope_name(type_code: u16) -> Option<&'static str> {
    match type_code {
        1 => Some("scope_system"),
        2 => Some("scope_interface"),
        3 => Some("scope_line_card"),
        4 => Some("scope_cache"),
        5 => Some("scope_template"),
        _ => None,
    }
}

/******************************** TEMPLATE FLOWSET ********************************/

/// from https://www.ietf.org/rfc/rfc3954.txt
/// ```text
/// +--------------------------------+--------------------------------+
/// |       Template ID 256          |         Field Count            |
/// +--------------------------------+--------------------------------+
/// |        Field Type 1            |         Field Length 1         |
/// +--------------------------------+--------------------------------+
/// |             ...                |              ...               |
/// +--------------------------------+--------------------------------+
/// ```
#[derive(Debug)]
pub struct TemplateHeader {
    pub id: u16,          // Template ID, 256 and above
    pub field_count: u16, // Number of fields in this template record
}

impl TemplateHeader {
    pub const SIZE: usize = 4;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "NetFlow v9 template header")?;

        Ok(TemplateHeader {
            id: be_u16(&buf[0..2]),
            field_count: be_u16(&buf[2..4]),
        })
    }
}

/******************************** OPTIONS TEMPLATE FLOWSET ********************************/

/// from https://www.ietf.org/rfc/rfc3954.txt
/// ```text
/// +--------------------------------+--------------------------------+
/// |         Template ID            |      Option Scope Length       |
/// +--------------------------------+--------------------------------+
/// |        Option Length           |       Scope 1 Field Type       |
/// +--------------------------------+--------------------------------+
/// |     Scope 1 Field Length       |               ...              |
/// +--------------------------------+--------------------------------+
/// ```
#[derive(Debug)]
pub struct OptionTemplateHeader {
    pub id: u16,           // Template ID, 256 and above
    pub scope_length: u16, // Length in bytes of the scope field specifiers
    pub option_length: u16, // Length in bytes of the option field specifiers
}

impl OptionTemplateHeader {
    pub const SIZE: usize = 6;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "NetFlow v9 options template header")?;

        Ok(OptionTemplateHeader {
            id: be_u16(&buf[0..2]),
            scope_length: be_u16(&buf[2..4]),
            option_length: be_u16(&buf[4..6]),
        })
    }
}

fn read_specs(buf: &[u8], count: usize) -> Result<Vec<FieldSpec>, DecodeError> {
    ensure(buf, count * 4, "NetFlow v9 field specifiers")?;

    Ok(buf[..count * 4]
        .chunks_exact(4)
        .map(|chunk| FieldSpec::new(be_u16(&chunk[0..2]), be_u16(&chunk[2..4])))
        .collect())
}

fn validate(template: Template) -> Result<Template, DecodeError> {
    if template.id < 256 {
        return Err(DecodeError::InvalidTemplate { template_id: template.id, reason: "template id below 256" });
    }
    if template.min_record_length() == 0 {
        return Err(DecodeError::InvalidTemplate { template_id: template.id, reason: "zero length record" });
    }
    Ok(template)
}

fn is_padding(rest: &[u8]) -> bool {
    rest.len() < TemplateHeader::SIZE || rest.iter().all(|b| *b == 0)
}

/// Reads every template record of a template flowset (flowset id 0).
pub fn read_template_set(content: &[u8]) -> Result<Vec<Template>, DecodeError> {
    let mut templates = vec![];
    let mut offset = 0;

    while !is_padding(&content[offset..]) {
        let header = TemplateHeader::read(&content[offset..])?;
        offset += TemplateHeader::SIZE;

        let fields = read_specs(&content[offset..], header.field_count as usize)?;
        offset += header.field_count as usize * 4;

        templates.push(validate(Template { id: header.id, kind: TemplateKind::Data, fields })?);
    }

    Ok(templates)
}

/// Reads the options template records of an options template flowset (flowset id 1).
pub fn read_options_template_set(content: &[u8]) -> Result<Vec<Template>, DecodeError> {
    let mut templates = vec![];
    let mut offset = 0;

    while !is_padding(&content[offset..]) {
        let header = OptionTemplateHeader::read(&content[offset..])?;
        offset += OptionTemplateHeader::SIZE;

        if header.scope_length == 0 || header.scope_length % 4 != 0 || header.option_length % 4 != 0 {
            return Err(DecodeError::InvalidTemplate { template_id: header.id, reason: "bad options template lengths" });
        }

        let scope_count = header.scope_length as usize / 4;
        let count = scope_count + header.option_length as usize / 4;
        let fields = read_specs(&content[offset..], count)?;
        offset += count * 4;

        let kind = TemplateKind::Options { scope_field_count: scope_count as u16 };
        templates.push(validate(Template { id: header.id, kind, fields })?);
    }

    Ok(templates)
}

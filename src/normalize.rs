//! Maps decoded fields onto the canonical field schema.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::flow::codec::PacketHeader;
use crate::flow::field::{canonical, ValueKind};
use crate::flow::record::{DecodedField, DecodedRecord};
use crate::flow::{netflow9, ExporterId, FieldSpec, FieldValue, Version};
use crate::template::Template;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecordKind {
    Flow,
    Options,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Flow => "flow",
            RecordKind::Options => "options",
        }
    }
}

/// A normalized record, ready for the sink.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FlowRecord {
    pub exporter: ExporterId,
    pub version: Version,
    pub export_time: u32,                            // Seconds since the UNIX epoch, from the message header
    pub sequence: u32,                               // Sequence number of the message header
    pub template_id: Option<u16>,                    // None for v5
    pub kind: RecordKind,                            // Options for records of an options template
    pub fields: Vec<(Cow<'static, str>, FieldValue)>, // Canonical fields, in record order
    pub raw: Vec<(String, FieldValue)>,              // Fields outside the canonical schema, kept verbatim
}

impl FlowRecord {
    /// First value named `name`, canonical fields first.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .or_else(|| self.raw.iter().find(|(n, _)| n == name).map(|(_, v)| v))
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} seq: {}", self.exporter, self.version, self.sequence)?;
        if let Some(id) = self.template_id {
            write!(f, " template: {}", id)?;
        }
        if self.kind == RecordKind::Options {
            write!(f, " (options)")?;
        }
        for (name, value) in &self.fields {
            write!(f, " {}={}", name, value)?;
        }
        for (name, value) in &self.raw {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

/// One JSON object per record: header metadata first, then every field by name.
impl Serialize for FlowRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("exporter", &self.exporter.addr.to_string())?;
        map.serialize_entry("domain_id", &self.exporter.domain_id)?;
        map.serialize_entry("version", &self.version.code())?;
        map.serialize_entry("export_time", &self.export_time)?;
        map.serialize_entry("sequence", &self.sequence)?;
        if let Some(id) = self.template_id {
            map.serialize_entry("template_id", &id)?;
        }
        map.serialize_entry("kind", self.kind.as_str())?;
        for (name, value) in &self.fields {
            map.serialize_entry(name.as_ref(), value)?;
        }
        for (name, value) in &self.raw {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Pushes a raw field, numbering repeats so every JSON key stays unique.
fn push_raw(raw: &mut Vec<(String, FieldValue)>, spec: &FieldSpec, value: FieldValue) {
    let base = raw_name(spec);
    let mut name = base.clone();
    let mut repeat = 1;
    while raw.iter().any(|(n, _)| *n == name) {
        repeat += 1;
        name = format!("{}_{}", base, repeat);
    }
    raw.push((name, value));
}

fn raw_name(spec: &FieldSpec) -> String {
    match spec.enterprise {
        Some(pen) => format!("raw_{}_{}", pen, spec.type_code),
        None => format!("raw_{}", spec.type_code),
    }
}

/// Converts a decoded value to the semantic type of its canonical field.
/// The value comes back untouched in `Err` when it does not fit.
pub fn coerce(value: FieldValue, kind: ValueKind) -> Result<FieldValue, FieldValue> {
    match (kind, value) {
        (ValueKind::Unsigned, v @ FieldValue::U8(_))
        | (ValueKind::Unsigned, v @ FieldValue::U16(_))
        | (ValueKind::Unsigned, v @ FieldValue::U32(_))
        | (ValueKind::Unsigned, v @ FieldValue::U64(_)) => Ok(v),
        // reduced-size encoding, e.g. a 3 byte counter
        (ValueKind::Unsigned, FieldValue::Octets(bytes)) if !bytes.is_empty() && bytes.len() <= 8 => {
            Ok(FieldValue::U64(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)))
        }
        (ValueKind::Ipv4, FieldValue::U32(v)) => Ok(FieldValue::Ipv4(Ipv4Addr::from(v))),
        (ValueKind::Ipv6, FieldValue::Octets(bytes)) if bytes.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes);
            Ok(FieldValue::Ipv6(Ipv6Addr::from(octets)))
        }
        (ValueKind::Mac, FieldValue::Octets(bytes)) if bytes.len() == 6 => {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&bytes);
            Ok(FieldValue::Mac(mac))
        }
        (ValueKind::String, v @ FieldValue::String(_)) => Ok(v),
        (ValueKind::String, v) => {
            let bytes = v.to_bytes();
            let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            Ok(FieldValue::String(String::from_utf8_lossy(&bytes[..end]).into_owned()))
        }
        (ValueKind::Octets, v @ FieldValue::Octets(_)) => Ok(v),
        (ValueKind::Octets, v) => Ok(FieldValue::Octets(v.to_bytes())),
        (_, v) => Err(v),
    }
}

/// Builds the `FlowRecord` of one decoded record.
///
/// `template` is `None` for v5 records, whose fields already carry IANA element ids.
pub fn normalize(exporter: ExporterId, header: &PacketHeader, template: Option<&Template>, record: DecodedRecord) -> FlowRecord {
    let scope_count = template.map_or(0, Template::scope_field_count);
    let v9_scope = header.version == Version::NetflowV9 && scope_count > 0;

    let mut fields: Vec<(Cow<'static, str>, FieldValue)> = Vec::with_capacity(record.len());
    let mut raw = vec![];

    for (index, DecodedField { spec, value }) in record.into_iter().enumerate() {
        if v9_scope && index < scope_count {
            if let Some(name) = netflow9::scope_name(spec.type_code) {
                if fields.iter().any(|(n, _)| n == name) {
                    push_raw(&mut raw, &spec, value);
                } else {
                    fields.push((Cow::Borrowed(name), value));
                }
                continue;
            }
        }

        match canonical(spec.type_code, spec.enterprise) {
            // a name keeps its first value, ipv4 and ipv6 variants share one
            Some((name, _)) if fields.iter().any(|(n, _)| *n == name) => push_raw(&mut raw, &spec, value),
            Some((name, kind)) => match coerce(value, kind) {
                Ok(value) => fields.push((name, value)),
                Err(value) => push_raw(&mut raw, &spec, value),
            },
            None => push_raw(&mut raw, &spec, value),
        }
    }

    FlowRecord {
        exporter,
        version: header.version,
        export_time: header.export_time,
        sequence: header.sequence,
        template_id: template.map(|t| t.id),
        kind: if template.map_or(false, Template::is_options) { RecordKind::Options } else { RecordKind::Flow },
        fields,
        raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateKind;
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;

    fn exporter() -> ExporterId {
        ExporterId::new(SocketAddr::from(([192, 0, 2, 10], 4739)), 1)
    }

    fn header(version: Version) -> PacketHeader {
        PacketHeader { version, length: 0, sys_uptime: 0, export_time: 1_600_000_000, export_nanos: 0, sequence: 42, domain_id: 1, sampling: 0 }
    }

    fn field(type_code: u16, length: u16, value: FieldValue) -> DecodedField {
        DecodedField { spec: FieldSpec::new(type_code, length), value }
    }

    #[test]
    fn coerce_values() {
        assert_eq!(coerce(FieldValue::U32(0x0a000001), ValueKind::Ipv4), Ok(FieldValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(coerce(FieldValue::Octets(vec![0, 1, 2]), ValueKind::Unsigned), Ok(FieldValue::U64(258)));
        assert_eq!(coerce(FieldValue::Octets(vec![b'e', b't', b'h', b'0', 0, 0]), ValueKind::String), Ok(FieldValue::String("eth0".into())));
        assert_eq!(coerce(FieldValue::Octets(vec![1; 6]), ValueKind::Mac), Ok(FieldValue::Mac([1; 6])));
        assert_eq!(coerce(FieldValue::U16(7), ValueKind::Ipv4), Err(FieldValue::U16(7)));
        assert_eq!(coerce(FieldValue::Octets(vec![1; 9]), ValueKind::Unsigned), Err(FieldValue::Octets(vec![1; 9])));
    }

    #[test]
    fn normalize_flow_record() {
        let template = Template { id: 256, kind: TemplateKind::Data, fields: vec![] };
        let record = vec![
            field(8, 4, FieldValue::U32(0xc0a80001)),
            field(28, 16, FieldValue::Octets(Ipv6Addr::LOCALHOST.octets().to_vec())),
            field(1, 8, FieldValue::U64(1500)),
            field(999, 2, FieldValue::U16(3)),
            DecodedField { spec: FieldSpec::with_enterprise(1, 8, 29305), value: FieldValue::U64(900) },
            DecodedField { spec: FieldSpec::with_enterprise(5, 1, 9), value: FieldValue::U8(1) },
        ];

        let flow = normalize(exporter(), &header(Version::Ipfix), Some(&template), record);

        assert_eq!(flow.template_id, Some(256));
        assert_eq!(flow.kind, RecordKind::Flow);
        assert_eq!(flow.get("src_addr"), Some(&FieldValue::Ipv4(Ipv4Addr::new(192, 168, 0, 1))));
        assert_eq!(flow.get("dst_addr"), Some(&FieldValue::Ipv6(Ipv6Addr::LOCALHOST)));
        assert_eq!(flow.get("bytes"), Some(&FieldValue::U64(1500)));
        assert_eq!(flow.get("reverse_bytes"), Some(&FieldValue::U64(900)));
        assert_eq!(flow.get("raw_999"), Some(&FieldValue::U16(3)));
        assert_eq!(flow.get("raw_9_5"), Some(&FieldValue::U8(1)));
        assert_eq!(flow.raw.len(), 2);
    }

    #[test]
    fn uncoercible_value_is_kept_raw() {
        // a 2 byte source address
        let flow = normalize(exporter(), &header(Version::NetflowV9), None, vec![field(8, 2, FieldValue::U16(1))]);

        assert_eq!(flow.get("src_addr"), None);
        assert_eq!(flow.get("raw_8"), Some(&FieldValue::U16(1)));
    }

    #[test]
    fn v9_scope_fields() {
        let template = Template { id: 258, kind: TemplateKind::Options { scope_field_count: 1 }, fields: vec![] };
        let record = vec![field(1, 4, FieldValue::U32(3)), field(34, 4, FieldValue::U32(100))];

        let flow = normalize(exporter(), &header(Version::NetflowV9), Some(&template), record);

        assert_eq!(flow.kind, RecordKind::Options);
        assert_eq!(flow.get("scope_system"), Some(&FieldValue::U32(3)));
        assert_eq!(flow.get("sampling_interval"), Some(&FieldValue::U32(100)));
        assert_eq!(flow.get("bytes"), None);
    }

    #[test]
    fn repeated_names_are_kept_raw() {
        let template = Template { id: 256, kind: TemplateKind::Data, fields: vec![] };
        let record = vec![
            field(8, 4, FieldValue::U32(0x0a000001)),
            field(27, 16, FieldValue::Octets(Ipv6Addr::LOCALHOST.octets().to_vec())),
            field(4, 1, FieldValue::U8(6)),
            field(4, 1, FieldValue::U8(17)),
            field(4, 1, FieldValue::U8(1)),
        ];

        let flow = normalize(exporter(), &header(Version::Ipfix), Some(&template), record);

        assert_eq!(flow.get("src_addr"), Some(&FieldValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(flow.get("raw_27"), Some(&FieldValue::Octets(Ipv6Addr::LOCALHOST.octets().to_vec())));
        assert_eq!(flow.get("protocol"), Some(&FieldValue::U8(6)));
        assert_eq!(flow.get("raw_4"), Some(&FieldValue::U8(17)));
        assert_eq!(flow.get("raw_4_2"), Some(&FieldValue::U8(1)));

        let line = serde_json::to_string(&flow).unwrap();
        assert_eq!(line.matches("\"src_addr\"").count(), 1);
        assert_eq!(line.matches("\"protocol\"").count(), 1);
    }

    #[test]
    fn serialize_record() {
        let template = Template { id: 256, kind: TemplateKind::Data, fields: vec![] };
        let record = vec![field(8, 4, FieldValue::U32(0x0a000001)), field(4, 1, FieldValue::U8(6))];
        let flow = normalize(exporter(), &header(Version::Ipfix), Some(&template), record);

        let json = serde_json::to_value(&flow).unwrap();
        assert_eq!(json["exporter"], "192.0.2.10:4739");
        assert_eq!(json["version"], 10);
        assert_eq!(json["template_id"], 256);
        assert_eq!(json["kind"], "flow");
        assert_eq!(json["src_addr"], "10.0.0.1");
        assert_eq!(json["protocol"], 6);

        assert_eq!(flow.to_string(), "192.0.2.10:4739/1 ipfix seq: 42 template: 256 src_addr=10.0.0.1 protocol=6");
    }
}

use log::trace;

use crate::error::DecodeError;
use crate::flow::codec::decode_field_value;
use crate::flow::{FieldSpec, FieldValue};
use crate::template::Template;

/// One value of a data record together with the specifier it was read with.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DecodedField {
    pub spec: FieldSpec,
    pub value: FieldValue,
}

pub type DecodedRecord = Vec<DecodedField>;

/// Outcome of decoding one data set: the records read before any error, and the error.
#[derive(Debug, Default, PartialEq)]
pub struct DataSetDecode {
    pub records: Vec<DecodedRecord>,
    pub error: Option<DecodeError>,
}

/// Set padding is at most 3 zero octets.
fn is_padding(rest: &[u8]) -> bool {
    rest.len() < 4 && rest.iter().all(|b| *b == 0)
}

fn read_record(template: &Template, buf: &[u8]) -> Result<(DecodedRecord, usize), DecodeError> {
    let mut record = Vec::with_capacity(template.fields.len());
    let mut offset = 0;

    for spec in &template.fields {
        let (value, used) = decode_field_value(&buf[offset..], spec)?;
        record.push(DecodedField { spec: *spec, value });
        offset += used;
    }

    Ok((record, offset))
}

/// Decodes the records of a data set payload (set header excluded) with `template`.
pub fn decode_data_set(template: &Template, payload: &[u8]) -> DataSetDecode {
    let mut result = DataSetDecode::default();
    let min_size = template.min_record_length();

    if min_size == 0 {
        result.error = Some(DecodeError::InvalidTemplate { template_id: template.id, reason: "zero length record" });
        return result;
    }

    let mut offset = 0;
    while offset < payload.len() {
        let rest = &payload[offset..];

        if rest.len() < min_size && is_padding(rest) {
            trace!("skipping {} padding bytes after template {} records", rest.len(), template.id);
            break;
        }

        match read_record(template, rest) {
            Ok((record, used)) => {
                result.records.push(record);
                offset += used;
            }
            Err(_) => {
                result.error = Some(DecodeError::TrailingPartialRecord { template_id: template.id, leftover: rest.len() });
                break;
            }
        }
    }

    result
}

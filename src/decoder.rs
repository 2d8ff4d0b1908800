//! Turns datagrams into flow records.
//!
//! A `Decoder` owns a `TemplateStore` and is driven by a single worker, one datagram at a
//! time, so template mutations and the data sets depending on them are applied in
//! arrival order.

use log::{debug, info};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::DecodeError;
use crate::flow::codec::{decode_header, PacketHeader};
use crate::flow::flowset::{self, FlowSet};
use crate::flow::ipfix::Withdrawal;
use crate::flow::record::decode_data_set;
use crate::flow::{netflow5, ExporterId, Version};
use crate::normalize::{normalize, FlowRecord};
use crate::template::{PendingDataSet, Template, TemplateStore, UpsertStatus};

/// Counters produced by one `Decoder::process` call.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct DecodeStats {
    pub records: u64,
    pub decode_errors: u64,
    pub unknown_template_drops: u64,
    pub pending_buffered: u64,
    pub sequence_gaps: u64,
    pub templates_defined: u64,
    pub templates_withdrawn: u64,
}

#[derive(Debug)]
pub struct PacketReport {
    pub exporter: ExporterId,
    pub header: PacketHeader,
    pub records: Vec<FlowRecord>,
    pub stats: DecodeStats,
    pub errors: Vec<DecodeError>, // Set and record level errors, the rest of the packet was still processed
}

impl PacketReport {
    fn new(exporter: ExporterId, header: PacketHeader) -> Self {
        PacketReport { exporter, header, records: vec![], stats: DecodeStats::default(), errors: vec![] }
    }

    fn error(&mut self, e: DecodeError) {
        debug!("{}: {}", self.exporter, e);
        self.stats.decode_errors += 1;
        self.errors.push(e);
    }

    fn decode(&mut self, template: &Template, header: &PacketHeader, payload: &[u8]) {
        let result = decode_data_set(template, payload);

        for record in result.records {
            self.records.push(normalize(self.exporter, header, Some(template), record));
        }

        if let Some(e) = result.error {
            self.error(e);
        }
    }
}

pub struct Decoder {
    store: TemplateStore,
}

impl Decoder {
    pub fn new(pending_bound: usize) -> Self {
        Decoder { store: TemplateStore::new(pending_bound) }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn evict_idle(&mut self, now: Instant, threshold: Duration) -> Vec<ExporterId> {
        self.store.evict_idle(now, threshold)
    }

    /// Decodes one datagram received from `from`.
    ///
    /// An `Err` means the packet could not be framed at all (bad header or length) and
    /// nothing in it was applied.
    pub fn process(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) -> Result<PacketReport, DecodeError> {
        let header = decode_header(datagram)?;
        let exporter = ExporterId::new(from, header.domain_id);
        let body = &datagram[header.size()..];
        let mut report = PacketReport::new(exporter, header);

        match header.version {
            Version::NetflowV5 => {
                let records = netflow5::read_records(&header, body)?;
                self.observe_sequence(&mut report, now);

                let extra = netflow5::header_fields(&header);
                for record in records {
                    let mut fields = record.fields();
                    fields.extend(extra.iter().cloned());
                    report.records.push(normalize(exporter, &header, None, fields));
                }
            }
            Version::Ipfix if header.length as usize != datagram.len() => {
                return Err(DecodeError::LengthMismatch {
                    what: "IPFIX message",
                    declared: header.length as usize,
                    actual: datagram.len(),
                });
            }
            Version::NetflowV9 | Version::Ipfix => {
                self.observe_sequence(&mut report, now);
                self.process_sets(&mut report, body, now);
            }
        }

        report.stats.records = report.records.len() as u64;
        Ok(report)
    }

    fn observe_sequence(&mut self, report: &mut PacketReport, now: Instant) {
        if self.store.observe_sequence(report.exporter, &report.header, now) {
            debug!("{}: sequence gap, got {}", report.exporter, report.header.sequence);
            report.stats.sequence_gaps += 1;
        }
    }

    fn process_sets(&mut self, report: &mut PacketReport, body: &[u8], now: Instant) {
        let exporter = report.exporter;
        let header = report.header;

        for set in flowset::split(header.version, body) {
            match set {
                Err(e) => report.error(e),
                Ok(FlowSet::Template(templates)) | Ok(FlowSet::OptionsTemplate(templates)) => {
                    for template in templates {
                        self.define(report, template, now);
                    }
                }
                Ok(FlowSet::TemplateWithdraw(withdrawals)) => {
                    for withdrawal in withdrawals {
                        let count = match withdrawal {
                            Withdrawal::Template(id) => self.store.withdraw_template(exporter, id, now) as usize,
                            Withdrawal::AllTemplates => self.store.withdraw_all(exporter, false, now),
                            Withdrawal::AllOptionsTemplates => self.store.withdraw_all(exporter, true, now),
                        };
                        report.stats.templates_withdrawn += count as u64;
                    }
                }
                Ok(FlowSet::Data { template_id, payload }) => match self.store.lookup(&exporter, template_id) {
                    Some(template) => report.decode(template, &header, payload),
                    None => {
                        debug!("{}: buffering data set for unknown template {}", exporter, template_id);
                        report.stats.pending_buffered += 1;

                        let pending = PendingDataSet { template_id, header, payload: payload.to_vec() };
                        if let Some(dropped) = self.store.buffer_pending(exporter, pending, now) {
                            debug!("{}: dropped data set for template {}, buffer full", exporter, dropped.template_id);
                            report.stats.unknown_template_drops += 1;
                        }
                    }
                },
            }
        }
    }

    fn define(&mut self, report: &mut PacketReport, template: Template, now: Instant) {
        let exporter = report.exporter;
        let id = template.id;
        let upsert = self.store.upsert_template(exporter, template, now);

        match upsert.status {
            UpsertStatus::Created => {
                info!("{}: template {} defined", exporter, id);
                report.stats.templates_defined += 1;
            }
            UpsertStatus::Replaced => report.stats.templates_defined += 1,
            UpsertStatus::Unchanged => {}
        }

        if upsert.discarded > 0 {
            debug!("{}: discarded {} data sets framed for a previous template {}", exporter, upsert.discarded, id);
            report.stats.unknown_template_drops += upsert.discarded as u64;
        }

        if let Some(template) = self.store.lookup(&exporter, id) {
            for pending in upsert.replay {
                report.decode(template, &pending.header, &pending.payload);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::codec::{encode_field_spec, encode_header, encode_set_header, encode_variable_length};
    use crate::flow::{FieldSpec, FieldValue};
    use hex_literal::hex;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, last], 40000))
    }

    fn packet(version: Version, sequence: u32, domain_id: u32, sets: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = sets.concat();
        let size = PacketHeader::size_of(version);
        let length = match version {
            Version::Ipfix => (size + body.len()) as u16,
            _ => sets.len() as u16,
        };
        let header = PacketHeader { version, length, sys_uptime: 0, export_time: 1_600_000_000, export_nanos: 0, sequence, domain_id, sampling: 0 };

        let mut out = vec![];
        encode_header(&header, &mut out);
        out.extend_from_slice(&body);
        out
    }

    fn set(id: u16, content: &[u8]) -> Vec<u8> {
        let mut out = vec![];
        encode_set_header(id, (content.len() + 4) as u16, &mut out);
        out.extend_from_slice(content);
        out
    }

    fn template_set(set_id: u16, id: u16, specs: &[FieldSpec]) -> Vec<u8> {
        let mut content = vec![];
        content.extend_from_slice(&id.to_be_bytes());
        content.extend_from_slice(&(specs.len() as u16).to_be_bytes());
        for spec in specs {
            encode_field_spec(spec, &mut content);
        }
        set(set_id, &content)
    }

    // src addr, dst port, protocol
    fn specs() -> Vec<FieldSpec> {
        vec![FieldSpec::new(8, 4), FieldSpec::new(11, 2), FieldSpec::new(4, 1)]
    }

    const TWO_RECORDS: [u8; 14] = hex!("0a 00 00 01 00 50 06 0a 00 00 02 00 35 11");

    #[test]
    fn v9_template_and_data_in_one_packet() {
        let mut decoder = Decoder::new(8);
        let datagram = packet(Version::NetflowV9, 1, 7, &[template_set(0, 256, &specs()), set(256, &TWO_RECORDS)]);

        let report = decoder.process(&datagram, addr(1), Instant::now()).unwrap();

        assert_eq!(report.stats.records, 2);
        assert_eq!(report.stats.templates_defined, 1);
        assert_eq!(report.exporter, ExporterId::new(addr(1), 7));
        assert_eq!(report.records[0].get("src_addr"), Some(&FieldValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1))));
        assert_eq!(report.records[1].get("dst_port"), Some(&FieldValue::U16(53)));
        assert_eq!(report.records[1].get("protocol"), Some(&FieldValue::U8(17)));
        assert!(report.errors.is_empty());
    }

    #[test]
    fn data_before_template_is_replayed() {
        let mut decoder = Decoder::new(8);
        let now = Instant::now();

        let first = decoder.process(&packet(Version::NetflowV9, 1, 0, &[set(256, &TWO_RECORDS)]), addr(1), now).unwrap();
        assert_eq!(first.stats.records, 0);
        assert_eq!(first.stats.pending_buffered, 1);

        let second = decoder.process(&packet(Version::NetflowV9, 2, 0, &[template_set(0, 256, &specs())]), addr(1), now).unwrap();
        assert_eq!(second.stats.records, 2);
        assert_eq!(second.records[0].sequence, 1);
        assert_eq!(second.stats.unknown_template_drops, 0);
        assert_eq!(decoder.store().stats(&second.exporter).map_or(0, |s| s.pending), 0);
    }

    #[test]
    fn pending_overflow_is_counted() {
        let mut decoder = Decoder::new(2);
        let now = Instant::now();
        let mut drops = 0;

        for sequence in 0..3 {
            let report = decoder.process(&packet(Version::NetflowV9, sequence, 0, &[set(256, &TWO_RECORDS)]), addr(1), now).unwrap();
            drops += report.stats.unknown_template_drops;
        }
        assert_eq!(drops, 1);

        let report = decoder.process(&packet(Version::NetflowV9, 3, 0, &[template_set(0, 256, &specs())]), addr(1), now).unwrap();
        assert_eq!(report.stats.records, 4);
        assert_eq!(report.records[0].sequence, 1);
    }

    #[test]
    fn redefinition_after_withdrawal_is_idempotent() {
        let mut decoder = Decoder::new(8);
        let now = Instant::now();

        let before = decoder
            .process(&packet(Version::Ipfix, 0, 1, &[template_set(2, 300, &specs()), set(300, &TWO_RECORDS)]), addr(1), now)
            .unwrap();

        let withdraw = packet(Version::Ipfix, 2, 1, &[set(2, &hex!("01 2c 00 00"))]);
        let report = decoder.process(&withdraw, addr(1), now).unwrap();
        assert_eq!(report.stats.templates_withdrawn, 1);
        assert_eq!(decoder.store().stats(&report.exporter).map_or(0, |s| s.templates_active), 0);

        let after = decoder
            .process(&packet(Version::Ipfix, 2, 1, &[template_set(2, 300, &specs()), set(300, &TWO_RECORDS)]), addr(1), now)
            .unwrap();

        assert_eq!(after.stats.records, 2);
        assert_eq!(before.records[0].fields, after.records[0].fields);
        assert_eq!(before.records[1].fields, after.records[1].fields);
    }

    #[test]
    fn data_buffered_across_a_redefinition_is_discarded() {
        let mut decoder = Decoder::new(8);
        let now = Instant::now();

        decoder.process(&packet(Version::Ipfix, 0, 1, &[template_set(2, 300, &specs())]), addr(1), now).unwrap();
        decoder.process(&packet(Version::Ipfix, 0, 1, &[set(2, &hex!("01 2c 00 00"))]), addr(1), now).unwrap();
        decoder.process(&packet(Version::Ipfix, 0, 1, &[set(300, &TWO_RECORDS)]), addr(1), now).unwrap();

        let report = decoder.process(&packet(Version::Ipfix, 0, 1, &[template_set(2, 300, &specs())]), addr(1), now).unwrap();
        assert_eq!(report.stats.records, 0);
        assert_eq!(report.stats.unknown_template_drops, 1);
    }

    #[test]
    fn exporters_do_not_share_templates() {
        let mut decoder = Decoder::new(8);
        let now = Instant::now();

        decoder.process(&packet(Version::NetflowV9, 0, 0, &[template_set(0, 256, &specs())]), addr(1), now).unwrap();
        decoder
            .process(&packet(Version::NetflowV9, 0, 0, &[template_set(0, 256, &[FieldSpec::new(2, 4)])]), addr(2), now)
            .unwrap();

        let a = decoder.process(&packet(Version::NetflowV9, 1, 0, &[set(256, &TWO_RECORDS[0..7])]), addr(1), now).unwrap();
        let b = decoder.process(&packet(Version::NetflowV9, 1, 0, &[set(256, &hex!("00 00 00 2a"))]), addr(2), now).unwrap();

        assert_eq!(a.records[0].get("dst_port"), Some(&FieldValue::U16(80)));
        assert_eq!(b.records[0].get("packets"), Some(&FieldValue::U32(42)));
        assert_eq!(b.records[0].get("dst_port"), None);

        // same address, other source id
        let c = decoder.process(&packet(Version::NetflowV9, 0, 9, &[set(256, &TWO_RECORDS)]), addr(1), now).unwrap();
        assert_eq!(c.stats.records, 0);
        assert_eq!(c.stats.pending_buffered, 1);
    }

    #[test]
    fn v5_packet_decodes_every_record() {
        let record = hex!(
            "70 0a 14 0a ac 1e be 0a ac c7 0f 01 00 00 00 00
             00 00 03 1b 00 00 01 03 00 00 02 36 00 00 03 a8
             00 28 00 50 00 00 06 00 c3 0d 35 bd 15 1a 00 00"
        );
        let mut datagram = hex!("00 05 00 03 00 00 04 b2 60 80 b8 9c 1a 47 ff 30 00 00 00 02 01 02 00 00").to_vec();
        for _ in 0..3 {
            datagram.extend_from_slice(&record);
        }

        let mut decoder = Decoder::new(8);
        let report = decoder.process(&datagram, addr(5), Instant::now()).unwrap();

        assert_eq!(report.exporter.domain_id, 0x0102);
        assert_eq!(report.stats.records, 3);
        let flow = &report.records[2];
        assert_eq!(flow.template_id, None);
        assert_eq!(flow.get("src_addr"), Some(&FieldValue::Ipv4(Ipv4Addr::new(112, 10, 20, 10))));
        assert_eq!(flow.get("packets"), Some(&FieldValue::U32(795)));
        assert_eq!(flow.get("src_as"), Some(&FieldValue::U16(49933)));
        assert_eq!(flow.get("engine_id"), Some(&FieldValue::U8(2)));

        datagram.pop();
        assert!(matches!(decoder.process(&datagram, addr(5), Instant::now()), Err(DecodeError::LengthMismatch { .. })));
    }

    #[test]
    fn v5_sequence_gap() {
        let mut decoder = Decoder::new(8);
        let now = Instant::now();
        let empty = |sequence: u32| packet(Version::NetflowV5, sequence, 0, &[]);

        assert_eq!(decoder.process(&empty(10), addr(1), now).unwrap().stats.sequence_gaps, 0);
        assert_eq!(decoder.process(&empty(10), addr(1), now).unwrap().stats.sequence_gaps, 0);
        assert_eq!(decoder.process(&empty(12), addr(1), now).unwrap().stats.sequence_gaps, 1);
    }

    #[test]
    fn ipfix_length_must_match_datagram() {
        let mut datagram = packet(Version::Ipfix, 0, 1, &[template_set(2, 300, &specs())]);
        datagram.push(0);

        let mut decoder = Decoder::new(8);
        assert!(matches!(
            decoder.process(&datagram, addr(1), Instant::now()),
            Err(DecodeError::LengthMismatch { what: "IPFIX message", .. })
        ));
        assert!(decoder.store().is_empty());
    }

    #[test]
    fn ipfix_variable_length_fields() {
        let specs = vec![FieldSpec::new(82, FieldSpec::VARIABLE_LENGTH), FieldSpec::new(4, 1)];
        let mut data = vec![];
        for length in [254usize, 255, 1000].iter() {
            encode_variable_length(*length, &mut data);
            data.extend(std::iter::repeat(b'a').take(*length));
            data.push(6);
        }

        let datagram = packet(Version::Ipfix, 0, 1, &[template_set(2, 400, &specs), set(400, &data)]);
        let report = Decoder::new(8).process(&datagram, addr(1), Instant::now()).unwrap();

        assert_eq!(report.stats.records, 3);
        for (flow, length) in report.records.iter().zip([254usize, 255, 1000].iter()) {
            assert_eq!(flow.get("interface_name"), Some(&FieldValue::String("a".repeat(*length))));
            assert_eq!(flow.get("protocol"), Some(&FieldValue::U8(6)));
        }
    }

    #[test]
    fn bad_set_length_keeps_earlier_sets() {
        let mut datagram = packet(Version::NetflowV9, 0, 0, &[template_set(0, 256, &specs()), set(256, &TWO_RECORDS)]);
        datagram.extend_from_slice(&hex!("01 00 00 00"));

        let report = Decoder::new(8).process(&datagram, addr(1), Instant::now()).unwrap();
        assert_eq!(report.stats.records, 2);
        assert_eq!(report.stats.decode_errors, 1);
        assert!(matches!(report.errors[0], DecodeError::InvalidSetLength { set_id: 256, length: 0, .. }));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let datagram = hex!("00 07 00 00 00 00 00 00");
        assert_eq!(Decoder::new(8).process(&datagram, addr(1), Instant::now()).unwrap_err(), DecodeError::UnsupportedVersion(7));
    }
}

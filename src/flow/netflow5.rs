use std::fmt;
use std::net::Ipv4Addr;

use crate::error::DecodeError;
use crate::flow::codec::{be_u16, be_u32, ensure, PacketHeader};
use crate::flow::field::FieldType;
use crate::flow::record::DecodedField;
use crate::flow::{FieldSpec, FieldValue};

/******************************** DATA ********************************/

/// from https://www.cisco.com/c/en/us/td/docs/net_mgmt/netflow_collection_engine/3-6/user/guide/format.html#wp1006186
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataSet {
    pub src_addr: u32,   // Source IP address
    pub dst_addr: u32,   // Destination IP address
    pub next_hop: u32,   // IP address of next hop router
    pub input_int: u16,  // SNMP index of input interface
    pub output_int: u16, // SNMP index of output interface
    pub packets: u32,    // Packets in the flow
    pub octets: u32,     // Total number of Layer 3 bytes in the packets of the flow
    pub start_time: u32, // SysUptime at start of flow
    pub end_time: u32,   // SysUptime at the time the last packet of the flow was received
    pub src_port: u16,   // TCP/UDP source port number or equivalent
    pub dst_port: u16,   // TCP/UDP destination port number or equivalent
    pub tcp_flag: u8,    // Cumulative OR of TCP flags
    pub protocol: u8,    // IP protocol type (for example, TCP = 6; UDP = 17)
    pub tos: u8,         // IP type of service (ToS)
    pub src_as: u16,     // Autonomous system number of the source, either origin or peer
    pub dst_as: u16,     // Autonomous system number of the destination, either origin or peer
    pub src_mask: u8,    // Source address prefix mask bits
    pub dst_mask: u8,    // Destination address prefix mask bits
}

impl fmt::Display for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "from: {}/{}:{}, to: {}/{}:{}, octets: {}, packets: {}, protocol: {}, duration: {}ms, src_as: {}, dst_as: {}, tos: {}",
            Ipv4Addr::from(self.src_addr),
            self.src_mask,
            self.src_port,
            Ipv4Addr::from(self.dst_addr),
            self.dst_mask,
            self.dst_port,
            self.octets,
            self.packets,
            self.protocol,
            self.duration(),
            self.src_as,
            self.dst_as,
            self.tos
        )
    }
}

impl DataSet {
    pub const SIZE: usize = 48;

    pub fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        ensure(buf, Self::SIZE, "NetFlow v5 record")?;

        Ok(DataSet {
            src_addr: be_u32(&buf[0..4]),
            dst_addr: be_u32(&buf[4..8]),
            next_hop: be_u32(&buf[8..12]),
            input_int: be_u16(&buf[12..14]),
            output_int: be_u16(&buf[14..16]),
            packets: be_u32(&buf[16..20]),
            octets: be_u32(&buf[20..24]),
            start_time: be_u32(&buf[24..28]),
            end_time: be_u32(&buf[28..32]),
            src_port: be_u16(&buf[32..34]),
            dst_port: be_u16(&buf[34..36]),
            tcp_flag: buf[37],
            protocol: buf[38],
            tos: buf[39],
            src_as: be_u16(&buf[40..42]),
            dst_as: be_u16(&buf[42..44]),
            src_mask: buf[44],
            dst_mask: buf[45],
        })
    }

    /// Uptime counters wrap after ~49 days.
    #[inline]
    pub fn duration(&self) -> u32 {
        self.end_time.wrapping_sub(self.start_time)
    }

    /// The fixed layout expressed as information elements, in wire order.
    pub fn fields(&self) -> Vec<DecodedField> {
        fn field(ft: FieldType, length: u16, value: FieldValue) -> DecodedField {
            DecodedField { spec: FieldSpec::new(ft as u16, length), value }
        }

        vec![
            field(FieldType::SourceIPv4Address, 4, FieldValue::U32(self.src_addr)),
            field(FieldType::DestinationIPv4Address, 4, FieldValue::U32(self.dst_addr)),
            field(FieldType::IpNextHopIPv4Address, 4, FieldValue::U32(self.next_hop)),
            field(FieldType::IngressInterface, 2, FieldValue::U16(self.input_int)),
            field(FieldType::EgressInterface, 2, FieldValue::U16(self.output_int)),
            field(FieldType::PacketDeltaCount, 4, FieldValue::U32(self.packets)),
            field(FieldType::OctetDeltaCount, 4, FieldValue::U32(self.octets)),
            field(FieldType::FlowStartSysUpTime, 4, FieldValue::U32(self.start_time)),
            field(FieldType::FlowEndSysUpTime, 4, FieldValue::U32(self.end_time)),
            field(FieldType::SourceTransportPort, 2, FieldValue::U16(self.src_port)),
            field(FieldType::DestinationTransportPort, 2, FieldValue::U16(self.dst_port)),
            field(FieldType::TcpControlBits, 1, FieldValue::U8(self.tcp_flag)),
            field(FieldType::ProtocolIdentifier, 1, FieldValue::U8(self.protocol)),
            field(FieldType::IPClassOfService, 1, FieldValue::U8(self.tos)),
            field(FieldType::BgpSourceAsNumber, 2, FieldValue::U16(self.src_as)),
            field(FieldType::BgpDestinationAsNumber, 2, FieldValue::U16(self.dst_as)),
            field(FieldType::SourceIPv4PrefixLength, 1, FieldValue::U8(self.src_mask)),
            field(FieldType::DestinationIPv4PrefixLength, 1, FieldValue::U8(self.dst_mask)),
        ]
    }
}

/// Header values carried on every record of the packet, passed through untouched.
pub fn header_fields(header: &PacketHeader) -> Vec<DecodedField> {
    let mut fields = vec![
        DecodedField { spec: FieldSpec::new(FieldType::EngineType as u16, 1), value: FieldValue::U8((header.domain_id >> 8) as u8) },
        DecodedField { spec: FieldSpec::new(FieldType::EngineId as u16, 1), value: FieldValue::U8(header.domain_id as u8) },
    ];

    if header.sampling_interval() > 0 {
        fields.push(DecodedField {
            spec: FieldSpec::new(FieldType::SamplingAlgorithm as u16, 1),
            value: FieldValue::U8(header.sampling_mode() as u8),
        });
        fields.push(DecodedField {
            spec: FieldSpec::new(FieldType::SamplingInterval as u16, 2),
            value: FieldValue::U16(header.sampling_interval()),
        });
    }

    fields
}

/// Decodes the record array following a v5 header.
///
/// The declared record count and the body size must agree exactly.
pub fn read_records(header: &PacketHeader, body: &[u8]) -> Result<Vec<DataSet>, DecodeError> {
    let declared = header.length as usize * DataSet::SIZE;
    if declared != body.len() {
        return Err(DecodeError::LengthMismatch { what: "NetFlow v5 record array", declared, actual: body.len() });
    }

    body.chunks_exact(DataSet::SIZE).map(DataSet::read).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::codec::decode_header;
    use hex_literal::hex;
    use pretty_assertions::assert_eq;

    const HEADER_PAYLOD: [u8; PacketHeader::NETFLOW5_SIZE] = hex!(
        "00 05 00 02 00 00 04 b2 60 80 b8 9c 1a 47 ff 30
         00 00 00 02 01 00 00 00"
    );

    const DATA_SET_PAYLOD: [u8; DataSet::SIZE] = hex!(
        "70 0a 14 0a ac 1e be 0a ac c7 0f 01 00 00 00 00
         00 00 03 1b 00 00 01 03 00 00 02 36 00 00 03 a8
         00 28 00 50 00 00 06 00 c3 0d 35 bd 15 1a 00 00"
    );

    #[test]
    fn read_valid_data_msg() {
        let msg = DataSet::read(&DATA_SET_PAYLOD).unwrap();

        assert_eq!(msg.src_addr, u32::from(Ipv4Addr::new(112, 10, 20, 10)));
        assert_eq!(msg.dst_addr, u32::from(Ipv4Addr::new(172, 30, 190, 10)));
        assert_eq!(msg.next_hop, u32::from(Ipv4Addr::new(172, 199, 15, 1)));
        assert_eq!(msg.input_int, 0);
        assert_eq!(msg.output_int, 0);
        assert_eq!(msg.packets, 795);
        assert_eq!(msg.octets, 259);
        assert_eq!(msg.start_time, 566);
        assert_eq!(msg.end_time, 936);
        assert_eq!(msg.duration(), 370);
        assert_eq!(msg.src_port, 40);
        assert_eq!(msg.dst_port, 80);
        assert_eq!(msg.tcp_flag, 0);
        assert_eq!(msg.protocol, 6);
        assert_eq!(msg.tos, 0);
        assert_eq!(msg.src_as, 49933);
        assert_eq!(msg.dst_as, 13757);
        assert_eq!(msg.src_mask, 21);
        assert_eq!(msg.dst_mask, 26);
    }

    #[test]
    fn read_invalid_data_msg() {
        assert!(DataSet::read(&DATA_SET_PAYLOD[0..DataSet::SIZE - 1]).is_err());
    }

    #[test]
    fn fields_keep_wire_values() {
        let msg = DataSet::read(&DATA_SET_PAYLOD).unwrap();
        let fields = msg.fields();

        assert_eq!(fields.len(), 18);
        assert_eq!(fields[0].spec, FieldSpec::new(8, 4));
        assert_eq!(fields[0].value.to_bytes(), DATA_SET_PAYLOD[0..4].to_vec());
        assert_eq!(fields[5].value, FieldValue::U32(795));
        assert_eq!(fields[16].value, FieldValue::U8(21));
    }

    #[test]
    fn read_record_array() {
        let header = decode_header(&HEADER_PAYLOD).unwrap();
        let mut body = DATA_SET_PAYLOD.to_vec();
        body.extend_from_slice(&DATA_SET_PAYLOD);

        let records = read_records(&header, &body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], records[1]);
    }

    #[test]
    fn count_and_body_must_agree() {
        let header = decode_header(&HEADER_PAYLOD).unwrap();

        assert_eq!(
            read_records(&header, &DATA_SET_PAYLOD),
            Err(DecodeError::LengthMismatch { what: "NetFlow v5 record array", declared: 96, actual: 48 })
        );

        let mut body = DATA_SET_PAYLOD.to_vec();
        body.extend_from_slice(&DATA_SET_PAYLOD);
        body.push(0);
        assert!(read_records(&header, &body).is_err());
    }

    #[test]
    fn header_fields_pass_sampling_through() {
        let mut header = decode_header(&HEADER_PAYLOD).unwrap();
        assert_eq!(header_fields(&header).len(), 2);

        header.sampling = (1 << 14) | 100;
        let fields = header_fields(&header);
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].value, FieldValue::U16(100));
        assert_eq!(fields[0].value, FieldValue::U8(1));
    }
}

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::borrow::Cow;

/// Private enterprise number of the RFC 5103 reverse information elements.
pub const REVERSE_PEN: u32 = 29305;

/// Semantic type a canonical field is coerced to.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum ValueKind {
    Unsigned,
    Ipv4,
    Ipv6,
    Mac,
    String,
    Octets,
}

/// from http://www.iana.org/assignments/ipfix/ipfix.xml
///
/// Only the elements the canonical schema names are listed. Codes 1 to 127 are shared
/// with NetFlow v9, so one table serves both.
#[derive(FromPrimitive, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Copy, Clone)]
#[repr(u16)]
pub enum FieldType {
    OctetDeltaCount = 1,
    PacketDeltaCount = 2,
    DeltaFlowCount = 3,
    ProtocolIdentifier = 4,
    IPClassOfService = 5,
    TcpControlBits = 6,
    SourceTransportPort = 7,
    SourceIPv4Address = 8,
    SourceIPv4PrefixLength = 9,
    IngressInterface = 10,
    DestinationTransportPort = 11,
    DestinationIPv4Address = 12,
    DestinationIPv4PrefixLength = 13,
    EgressInterface = 14,
    IpNextHopIPv4Address = 15,
    BgpSourceAsNumber = 16,
    BgpDestinationAsNumber = 17,
    BgpNextHopIPv4Address = 18,
    PostMCastPacketDeltaCount = 19,
    PostMCastOctetDeltaCount = 20,
    FlowEndSysUpTime = 21,
    FlowStartSysUpTime = 22,
    PostOctetDeltaCount = 23,
    PostPacketDeltaCount = 24,
    MinimumIpTotalLength = 25,
    MaximumIpTotalLength = 26,
    SourceIPv6Address = 27,
    DestinationIPv6Address = 28,
    SourceIPv6PrefixLength = 29,
    DestinationIPv6PrefixLength = 30,
    FlowLabelIPv6 = 31,
    IcmpTypeCodeIPv4 = 32,
    IgmpType = 33,
    SamplingInterval = 34,
    SamplingAlgorithm = 35,
    FlowActiveTimeout = 36,
    FlowIdleTimeout = 37,
    EngineType = 38,
    EngineId = 39,
    ExportedOctetTotalCount = 40,
    ExportedMessageTotalCount = 41,
    ExportedFlowRecordTotalCount = 42,
    SourceIPv4Prefix = 44,
    DestinationIPv4Prefix = 45,
    SamplerId = 48,
    SamplerMode = 49,
    SamplerRandomInterval = 50,
    MinimumTTL = 52,
    MaximumTTL = 53,
    FragmentIdentification = 54,
    PostIpClassOfService = 55,
    SourceMacAddress = 56,
    PostDestinationMacAddress = 57,
    VlanId = 58,
    PostVlanId = 59,
    IPVersion = 60,
    FlowDirection = 61,
    IpNextHopIPv6Address = 62,
    BgpNextHopIPv6Address = 63,
    DestinationMacAddress = 80,
    PostSourceMacAddress = 81,
    InterfaceName = 82,
    InterfaceDescription = 83,
    SamplerName = 84,
    OctetTotalCount = 85,
    PacketTotalCount = 86,
    FragmentOffset = 88,
    ForwardingStatus = 89,
    ApplicationId = 95,
    ApplicationName = 96,
    ExporterIPv4Address = 130,
    ExporterIPv6Address = 131,
    FlowEndReason = 136,
    FlowId = 148,
    FlowStartSeconds = 150,
    FlowEndSeconds = 151,
    FlowStartMilliseconds = 152,
    FlowEndMilliseconds = 153,
    FlowStartMicroseconds = 154,
    FlowEndMicroseconds = 155,
    FlowStartNanoseconds = 156,
    FlowEndNanoseconds = 157,
    SystemInitTimeMilliseconds = 160,
    FlowDurationMilliseconds = 161,
    IcmpTypeIPv4 = 176,
    IcmpCodeIPv4 = 177,
    IcmpTypeIPv6 = 178,
    IcmpCodeIPv6 = 179,
    IpTTL = 192,
    PostNATSourceIPv4Address = 225,
    PostNATDestinationIPv4Address = 226,
    PostNAPTSourceTransportPort = 227,
    PostNAPTDestinationTransportPort = 228,
    FirewallEvent = 233,
    IngressVRFID = 234,
    EgressVRFID = 235,
    VRFname = 236,
    BiflowDirection = 239,
    Dot1qVlanId = 243,
    PostNATSourceIPv6Address = 281,
    PostNATDestinationIPv6Address = 282,
}

impl FieldType {
    pub fn from_code(code: u16) -> Option<Self> {
        FromPrimitive::from_u16(code)
    }

    pub fn canonical_name(self) -> &'static str {
        use FieldType::*;

        match self {
            OctetDeltaCount => "bytes",
            PacketDeltaCount => "packets",
            DeltaFlowCount => "flows",
            ProtocolIdentifier => "protocol",
            IPClassOfService => "tos",
            TcpControlBits => "tcp_flags",
            SourceTransportPort => "src_port",
            SourceIPv4Address | SourceIPv6Address => "src_addr",
            SourceIPv4PrefixLength | SourceIPv6PrefixLength => "src_mask",
            IngressInterface => "in_if",
            DestinationTransportPort => "dst_port",
            DestinationIPv4Address | DestinationIPv6Address => "dst_addr",
            DestinationIPv4PrefixLength | DestinationIPv6PrefixLength => "dst_mask",
            EgressInterface => "out_if",
            IpNextHopIPv4Address | IpNextHopIPv6Address => "next_hop",
            BgpSourceAsNumber => "src_as",
            BgpDestinationAsNumber => "dst_as",
            BgpNextHopIPv4Address | BgpNextHopIPv6Address => "bgp_next_hop",
            PostMCastPacketDeltaCount => "mcast_packets",
            PostMCastOctetDeltaCount => "mcast_bytes",
            FlowEndSysUpTime => "flow_end_uptime_ms",
            FlowStartSysUpTime => "flow_start_uptime_ms",
            PostOctetDeltaCount => "post_bytes",
            PostPacketDeltaCount => "post_packets",
            MinimumIpTotalLength => "min_ip_length",
            MaximumIpTotalLength => "max_ip_length",
            FlowLabelIPv6 => "ipv6_flow_label",
            IcmpTypeCodeIPv4 => "icmp_type_code",
            IgmpType => "igmp_type",
            SamplingInterval => "sampling_interval",
            SamplingAlgorithm => "sampling_algorithm",
            FlowActiveTimeout => "flow_active_timeout",
            FlowIdleTimeout => "flow_idle_timeout",
            EngineType => "engine_type",
            EngineId => "engine_id",
            ExportedOctetTotalCount => "exported_bytes",
            ExportedMessageTotalCount => "exported_messages",
            ExportedFlowRecordTotalCount => "exported_flows",
            SourceIPv4Prefix => "src_prefix",
            DestinationIPv4Prefix => "dst_prefix",
            SamplerId => "sampler_id",
            SamplerMode => "sampler_mode",
            SamplerRandomInterval => "sampler_random_interval",
            MinimumTTL => "min_ttl",
            MaximumTTL => "max_ttl",
            FragmentIdentification => "ip_fragment_id",
            PostIpClassOfService => "post_tos",
            SourceMacAddress => "src_mac",
            PostDestinationMacAddress => "post_dst_mac",
            VlanId => "src_vlan",
            PostVlanId => "dst_vlan",
            IPVersion => "ip_version",
            FlowDirection => "direction",
            DestinationMacAddress => "dst_mac",
            PostSourceMacAddress => "post_src_mac",
            InterfaceName => "interface_name",
            InterfaceDescription => "interface_description",
            SamplerName => "sampler_name",
            OctetTotalCount => "bytes_total",
            PacketTotalCount => "packets_total",
            FragmentOffset => "ip_fragment_offset",
            ForwardingStatus => "forwarding_status",
            ApplicationId => "application_id",
            ApplicationName => "application_name",
            ExporterIPv4Address | ExporterIPv6Address => "exporter_addr",
            FlowEndReason => "flow_end_reason",
            FlowId => "flow_id",
            FlowStartSeconds => "flow_start_secs",
            FlowEndSeconds => "flow_end_secs",
            FlowStartMilliseconds => "flow_start_ms",
            FlowEndMilliseconds => "flow_end_ms",
            FlowStartMicroseconds => "flow_start_us",
            FlowEndMicroseconds => "flow_end_us",
            FlowStartNanoseconds => "flow_start_ns",
            FlowEndNanoseconds => "flow_end_ns",
            SystemInitTimeMilliseconds => "system_init_ms",
            FlowDurationMilliseconds => "flow_duration_ms",
            IcmpTypeIPv4 | IcmpTypeIPv6 => "icmp_type",
            IcmpCodeIPv4 | IcmpCodeIPv6 => "icmp_code",
            IpTTL => "ip_ttl",
            PostNATSourceIPv4Address | PostNATSourceIPv6Address => "src_addr_nat",
            PostNATDestinationIPv4Address | PostNATDestinationIPv6Address => "dst_addr_nat",
            PostNAPTSourceTransportPort => "src_port_nat",
            PostNAPTDestinationTransportPort => "dst_port_nat",
            FirewallEvent => "firewall_event",
            IngressVRFID => "ingress_vrf",
            EgressVRFID => "egress_vrf",
            VRFname => "vrf_name",
            BiflowDirection => "biflow_direction",
            Dot1qVlanId => "dot1q_vlan",
        }
    }

    pub fn kind(self) -> ValueKind {
        use FieldType::*;

        match self {
            SourceIPv4Address | DestinationIPv4Address | IpNextHopIPv4Address | BgpNextHopIPv4Address | SourceIPv4Prefix
            | DestinationIPv4Prefix | ExporterIPv4Address | PostNATSourceIPv4Address | PostNATDestinationIPv4Address => ValueKind::Ipv4,
            SourceIPv6Address | DestinationIPv6Address | IpNextHopIPv6Address | BgpNextHopIPv6Address | ExporterIPv6Address
            | PostNATSourceIPv6Address | PostNATDestinationIPv6Address => ValueKind::Ipv6,
            SourceMacAddress | PostDestinationMacAddress | DestinationMacAddress | PostSourceMacAddress => ValueKind::Mac,
            InterfaceName | InterfaceDescription | SamplerName | ApplicationName | VRFname => ValueKind::String,
            ApplicationId => ValueKind::Octets,
            _ => ValueKind::Unsigned,
        }
    }
}

/// Canonical name and semantic kind for a (type code, enterprise) pair, `None` when the
/// pair is not part of the canonical schema.
pub fn canonical(type_code: u16, enterprise: Option<u32>) -> Option<(Cow<'static, str>, ValueKind)> {
    match enterprise {
        None => FieldType::from_code(type_code).map(|ft| (Cow::Borrowed(ft.canonical_name()), ft.kind())),
        Some(REVERSE_PEN) => FieldType::from_code(type_code).map(|ft| (Cow::Owned(format!("reverse_{}", ft.canonical_name())), ft.kind())),
        Some(_) => None,
    }
}

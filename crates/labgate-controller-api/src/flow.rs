//! Forwarding rule descriptors

use labgate_util::Handler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const IP_PROTO_TCP: u8 = 0x06;

/// Where an address is currently reachable, as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentPoint {
    /// Switch datapath id, e.g. `00:00:00:00:00:00:00:01`
    pub switch_id: String,
    pub port: u32,
}

impl AttachmentPoint {
    pub fn new(switch_id: impl Into<String>, port: u32) -> Self {
        Self {
            switch_id: switch_id.into(),
            port,
        }
    }
}

impl fmt::Display for AttachmentPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.switch_id, self.port)
    }
}

/// The four rules of a session, in install order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Forward,
    Backward,
    ArpForward,
    ArpBackward,
}

impl FlowKind {
    pub const ALL: [FlowKind; 4] = [
        FlowKind::Forward,
        FlowKind::Backward,
        FlowKind::ArpForward,
        FlowKind::ArpBackward,
    ];

    /// Rule name suffix after the handler
    pub fn suffix(self) -> &'static str {
        match self {
            FlowKind::Forward => "fw",
            FlowKind::Backward => "bw",
            FlowKind::ArpForward => "arp_fw",
            FlowKind::ArpBackward => "arp_bw",
        }
    }

    pub fn rule_name(self, handler: &Handler) -> String {
        format!("{}_{}", handler, self.suffix())
    }

    /// Kind of a rule given its name (`{handler}_{suffix}`)
    pub fn from_rule_name(name: &str) -> Option<FlowKind> {
        let (_, suffix) = name.split_once('_')?;
        Self::ALL.into_iter().find(|k| k.suffix() == suffix)
    }
}

/// All four rule names owned by a handler, in install order
pub fn rule_names(handler: &Handler) -> [String; 4] {
    FlowKind::ALL.map(|kind| kind.rule_name(handler))
}

/// Header fields a rule matches on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowMatch {
    /// IPv4 + TCP destination port
    Ipv4Tcp {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        tcp_dst: u16,
    },
    /// ARP by sender/target protocol address
    Arp { spa: Ipv4Addr, tpa: Ipv4Addr },
}

/// A named match-action rule for a single switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRule {
    pub name: String,
    pub kind: FlowKind,
    pub switch_id: String,
    pub flow_match: FlowMatch,
    pub out_port: u32,
    pub priority: u16,
    pub active: bool,
}

impl FlowRule {
    /// Render as a static-flow-pusher entry
    pub fn to_static_flow(&self) -> StaticFlow {
        let mut flow = StaticFlow {
            switch: self.switch_id.clone(),
            name: self.name.clone(),
            priority: self.priority.to_string(),
            eth_type: String::new(),
            ipv4_src: None,
            ipv4_dst: None,
            ip_proto: None,
            tcp_dst: None,
            arp_spa: None,
            arp_tpa: None,
            active: self.active.to_string(),
            actions: format!("output={}", self.out_port),
        };

        match &self.flow_match {
            FlowMatch::Ipv4Tcp { src, dst, tcp_dst } => {
                flow.eth_type = format!("{:#06x}", ETH_TYPE_IPV4);
                flow.ipv4_src = Some(src.to_string());
                flow.ipv4_dst = Some(dst.to_string());
                flow.ip_proto = Some(format!("{:#04x}", IP_PROTO_TCP));
                flow.tcp_dst = Some(tcp_dst.to_string());
            }
            FlowMatch::Arp { spa, tpa } => {
                flow.eth_type = format!("{:#06x}", ETH_TYPE_ARP);
                flow.arp_spa = Some(spa.to_string());
                flow.arp_tpa = Some(tpa.to_string());
            }
        }

        flow
    }
}

/// Floodlight static-flow-pusher body.
///
/// Field order is fixed so the JSON rendering is byte-for-byte stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticFlow {
    pub switch: String,
    pub name: String,
    pub priority: String,
    pub eth_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4_dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arp_spa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arp_tpa: Option<String>,
    pub active: String,
    pub actions: String,
}

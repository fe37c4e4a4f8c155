//! Flow building for a session

use labgate_controller_api::{AttachmentPoint, FlowKind, FlowMatch, FlowRule};
use labgate_util::{Handler, MacAddress};
use std::net::Ipv4Addr;

/// Switch port leading back towards the student side
pub const CONTROLLER_INGRESS_PORT: u32 = 1;

pub const IP_FLOW_PRIORITY: u16 = 32768;

/// ARP rules sit just above IP rules
pub const ARP_FLOW_PRIORITY: u16 = 32769;

/// Everything needed to build the rules of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRequest {
    pub handler: Handler,
    pub attachment: AttachmentPoint,
    pub student_mac: MacAddress,
    pub server_address: Ipv4Addr,
    pub service_port: u16,
}

/// Build the four rules of a session, in install order: fw, bw, arp_fw, arp_bw.
///
/// Both IP rules match the server address as source and destination with
/// TCP as the protocol, whatever the service protocol is. The student MAC
/// is carried but not matched on.
pub fn build_flows(request: &FlowRequest) -> [FlowRule; 4] {
    FlowKind::ALL.map(|kind| build_flow(request, kind))
}

fn build_flow(request: &FlowRequest, kind: FlowKind) -> FlowRule {
    let out_port = match kind {
        FlowKind::Forward | FlowKind::ArpForward => request.attachment.port,
        FlowKind::Backward | FlowKind::ArpBackward => CONTROLLER_INGRESS_PORT,
    };

    let (flow_match, priority) = match kind {
        FlowKind::Forward | FlowKind::Backward => (
            FlowMatch::Ipv4Tcp {
                src: request.server_address,
                dst: request.server_address,
                tcp_dst: request.service_port,
            },
            IP_FLOW_PRIORITY,
        ),
        FlowKind::ArpForward | FlowKind::ArpBackward => (
            FlowMatch::Arp {
                spa: request.server_address,
                tpa: request.server_address,
            },
            ARP_FLOW_PRIORITY,
        ),
    };

    FlowRule {
        name: kind.rule_name(&request.handler),
        kind,
        switch_id: request.attachment.switch_id.clone(),
        flow_match,
        out_port,
        priority,
        active: true,
    }
}

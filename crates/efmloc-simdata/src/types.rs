//! Identifiers and plain data carried by a simulation run.

identifier!(NodeId, u32);
identifier!(FlowId, u32);
identifier!(PathId, u32);
identifier!(ConnId, u32);

/// Identifier of one simulation run, taken from the trace document's `title`.
pub type SimId = String;

/// A directed link between two nodes. Uniqueness in a topology is by the
/// ordered pair.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    derive_new::new,
)]
pub struct Link {
    pub src: NodeId,
    pub dst: NodeId,
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.src, self.dst)
    }
}

/// The 5-tuple of a flow or host connection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct FiveTuple {
    pub source_node_id: NodeId,
    pub dest_node_id: NodeId,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u8,
}

impl FiveTuple {
    /// The same connection seen from the other side: endpoints and ports
    /// swapped, protocol unchanged.
    pub fn reversed(&self) -> Self {
        Self {
            source_node_id: self.dest_node_id,
            dest_node_id: self.source_node_id,
            source_port: self.dest_port,
            dest_port: self.source_port,
            protocol: self.protocol,
        }
    }

    /// Stable string form used as a JSON map key in the output document.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.source_node_id, self.source_port, self.dest_node_id, self.dest_port, self.protocol
        )
    }
}

/// A multi-endpoint logical path announced in the trace summary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathInfo {
    pub source_net: String,
    pub dest_net: String,
    pub source_node_ids: Vec<NodeId>,
    pub dest_node_ids: Vec<NodeId>,
}

impl PathInfo {
    /// Stable string form used as a JSON map key in the output document.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source_net, self.dest_net)
    }
}

/// Packet counters an observer reported for one flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStats {
    pub total_packets: u32,
    pub total_efm_packets: u32,
}

/// A link the simulation configured to fail, with its injected loss rate and
/// extra delay.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedLink {
    pub source_node_id: NodeId,
    pub dest_node_id: NodeId,
    pub loss_rate: f64,
    pub delay_ms: u32,
}

impl FailedLink {
    pub fn link(&self) -> Link {
        Link::new(self.source_node_id, self.dest_node_id)
    }
}

/// A backbone link whose propagation delay was overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    pub source_node_id: NodeId,
    pub dest_node_id: NodeId,
    pub delay_mus: u32,
}

impl LinkConfig {
    pub fn link(&self) -> Link {
        Link::new(self.source_node_id, self.dest_node_id)
    }
}

/// Ground-truth per-link statistics from the simulation. Delay percentiles
/// are in microseconds and only present when the simulation recorded them.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub lost_packets: u32,
    pub received_packets: u32,
    pub delay_avg_mus: Option<f64>,
    pub delay_std_mus: Option<f64>,
    pub delay_med_mus: Option<f64>,
    #[serde(rename = "delay99thMus")]
    pub delay_99th_mus: Option<f64>,
    pub delay_min_mus: Option<u32>,
    pub delay_max_mus: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_tuple_reversal_is_involutive() {
        let ft = FiveTuple {
            source_node_id: NodeId::new(1),
            dest_node_id: NodeId::new(2),
            source_port: 1000,
            dest_port: 443,
            protocol: 17,
        };
        let rev = ft.reversed();
        assert_eq!(rev.source_node_id, NodeId::new(2));
        assert_eq!(rev.source_port, 443);
        assert_eq!(rev.reversed(), ft);
    }

    #[test]
    fn five_tuple_key_is_stable() {
        let ft = FiveTuple {
            source_node_id: NodeId::new(1),
            dest_node_id: NodeId::new(2),
            source_port: 1000,
            dest_port: 443,
            protocol: 17,
        };
        assert_eq!(ft.key(), "1:1000:2:443:17");
    }

    #[test]
    fn link_serialization_shape() {
        let link = Link::new(NodeId::new(1), NodeId::new(2));
        insta::assert_yaml_snapshot!(link, @r###"
        ---
        src: 1
        dst: 2
        "###);
    }
}

//! Error types for the simulation data model.

use crate::events::EventKind;
use crate::types::{FlowId, NodeId};

/// Errors raised while assembling or querying a result set. All of these are
/// hard errors: they indicate a malformed trace or an inconsistent query and
/// abort the run.
#[derive(Debug, thiserror::Error)]
pub enum SimDataError {
    /// A flow has no flow-begin event at an observer that recorded it.
    #[error("flow {0} has no flow-begin event")]
    MissingFlowBegin(FlowId),

    /// A flow has more than one flow-begin event at one observer.
    #[error("flow {0} has multiple flow-begin events")]
    MultipleFlowBegin(FlowId),

    /// Two observers reported the identical begin time for one flow, so the
    /// observer chain cannot be ordered.
    #[error("duplicate begin time {time} for flow {flow}")]
    DuplicateFlowBegin { flow: FlowId, time: f64 },

    /// A flow-begin time was not a number.
    #[error("flow {0} has a non-finite begin time")]
    InvalidFlowBegin(FlowId),

    /// A flow id without a 5-tuple in the observer flow info.
    #[error("flow {0} has no 5-tuple")]
    UnknownFlow(FlowId),

    /// No flow in the observer flow info matches the reversed 5-tuple.
    #[error("no reverse flow for flow {0}")]
    NoReverseFlow(FlowId),

    /// A vantage point id that the result set does not know.
    #[error("no vantage point with node id {0}")]
    UnknownVantagePoint(NodeId),

    /// An observer does not carry the requested flow.
    #[error("flow {flow} not recorded at observer {observer}")]
    FlowNotAtObserver { observer: NodeId, flow: FlowId },

    /// The summary carries no flow stats for an (observer, flow) pair the
    /// traces reference.
    #[error("no flow stats for flow {flow} at observer {observer}")]
    MissingFlowStats { observer: NodeId, flow: FlowId },

    /// No ping route between the two nodes.
    #[error("no ping route from {src} to {dst}")]
    MissingPingPath { src: NodeId, dst: NodeId },

    /// An event of the wrong kind was routed to a path aggregate.
    #[error("event kind {0} is not a path event")]
    NotAPathEvent(EventKind),

    /// An event of the wrong kind was routed to a ping pair.
    #[error("event kind {0} does not match the ping pair kind")]
    MismatchedPingEvent(EventKind),
}

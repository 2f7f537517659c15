#![warn(unreachable_pub, missing_debug_implementations)]

//! Data model for EFM simulation traces: events recorded at client, server,
//! and in-network vantage points, the aggregates deriving loss and delay
//! metrics from them, and the per-run [`ResultSet`] that owns everything.

#[macro_use]
mod ident;

mod errors;

pub mod events;
pub mod filter;
pub mod flow;
pub mod path;
pub mod ping;
pub mod result_set;
pub mod types;
pub mod vantage;

pub mod testing;

pub use errors::SimDataError;
pub use events::{Event, EventData, EventKind, EventStore, TBitClientPhase, TBitObserverPhase};
pub use filter::TraceFilter;
pub use flow::{HostFlow, ObserverFlow, EFM_Q_BLOCK_SIZE};
pub use path::PathMeasurements;
pub use ping::{PingPair, PingPairKind};
pub use result_set::ResultSet;
pub use types::{
    ConnId, FailedLink, FiveTuple, FlowId, FlowStats, Link, LinkConfig, LinkStats, NodeId, PathId,
    PathInfo, SimId,
};
pub use vantage::{HostVantagePoint, ObserverVantagePoint, VantagePointKind};

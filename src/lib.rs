#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde;

#[macro_use]
pub mod log;
pub mod construct;
pub mod error;
pub mod exporter;
pub mod graph;
pub mod node;
pub mod sta;

pub use construct::{construct_graph, IdToName, Netlist, Placement, Routes, Segment};
pub use error::{StaError, StaResult};
pub use graph::RoutingResultGraph;
pub use node::{Node, NodeId, RouteKind, RouteNode, TileNode, TileType};
pub use sta::{sta, DelayTable, PathComponents, StaReport};

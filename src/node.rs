/* Copyright (C) 2022 Antmicro
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The node model: a tagged variant distinguishing logical compute tiles
//! from physical routing resources, plus the identity scheme the graph
//! uses to deduplicate them.

use std::collections::HashMap;

/// Stable handle to a node within one [`crate::graph::RoutingResultGraph`].
///
/// Adjacency indices and every cross-reference into the graph are keyed by
/// this handle rather than by the node's identity string, so that cloning
/// or hashing a node is never required on the hot path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_raw(idx: u32) -> Self {
        Self(idx)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Logical block kind, derived from the first character of `tile_id`.
///
/// This mapping is authoritative; nothing else in the design should be
/// consulted to classify a tile.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TileType {
    PE,
    MEM,
    POND,
    REG,
    IO16,
    IO1,
}

impl TileType {
    /// Classifies a `tile_id` by its leading character, per the encoding
    /// contract in the spec (`p/m/M/r/I/i`).
    pub fn from_tile_id(tile_id: &str) -> Self {
        match tile_id.chars().next() {
            Some('p') => TileType::PE,
            Some('m') => TileType::MEM,
            Some('M') => TileType::POND,
            Some('r') => TileType::REG,
            Some('I') => TileType::IO16,
            Some('i') => TileType::IO1,
            other => panic!(
                "tile_id {:?} does not start with a recognized tile-type discriminator \
                 (p/m/M/r/I/i), got {:?}",
                tile_id, other
            ),
        }
    }
}

/// A logical block placed on the grid.
#[derive(Clone, Debug)]
pub struct TileNode {
    pub x: i32,
    pub y: i32,
    pub tile_id: String,
    pub tile_type: TileType,
    pub kernel: Option<String>,
    pub input_port_latencies: HashMap<String, i64>,
    pub input_port_break_path: HashMap<String, bool>,
}

impl TileNode {
    pub fn new(x: i32, y: i32, tile_id: String, kernel: Option<String>) -> Self {
        let tile_type = TileType::from_tile_id(&tile_id);
        Self {
            x,
            y,
            tile_id,
            tile_type,
            kernel,
            input_port_latencies: HashMap::new(),
            input_port_break_path: HashMap::new(),
        }
    }

    /// The node's identity string, which for a tile is simply its `tile_id`.
    pub fn identity(&self) -> String {
        self.tile_id.clone()
    }
}

/// The variant-specific payload of a physical routing resource.
///
/// SB and RMUX are purely fabric-internal; PORT and REG are the only
/// variants that sit adjacent to a tile boundary.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteKind {
    /// Switchbox. `side` is a compass direction in `0..=3`; `io` is `0`
    /// for an incoming connection, `1` for outgoing.
    Sb { track: i32, side: i32, io: i32 },
    /// Routing node adjacent to a tile's I/O pin.
    Port { port: String },
    /// Pipeline register node inside the fabric.
    Reg { reg_name: String, track: i32 },
    /// Routing multiplexer: a candidate register insertion site.
    Rmux { rmux_name: String },
}

impl RouteKind {
    fn tag(&self) -> &'static str {
        match self {
            RouteKind::Sb { .. } => "SB",
            RouteKind::Port { .. } => "PORT",
            RouteKind::Reg { .. } => "REG",
            RouteKind::Rmux { .. } => "RMUX",
        }
    }
}

/// A physical routing resource: a switchbox, a routing mux, a port, or a
/// register, as placed by the router.
#[derive(Clone, Debug)]
pub struct RouteNode {
    pub x: i32,
    pub y: i32,
    pub bit_width: i32,
    pub net_id: i64,
    pub kernel: Option<String>,
    pub kind: RouteKind,
}

impl RouteNode {
    pub fn new(x: i32, y: i32, bit_width: i32, net_id: i64, kind: RouteKind) -> Self {
        Self { x, y, bit_width, net_id, kernel: None, kind }
    }

    /// True when this node is a PORT.
    pub fn port_name(&self) -> Option<&str> {
        match &self.kind {
            RouteKind::Port { port } => Some(port.as_str()),
            _ => None,
        }
    }

    pub fn is_reg(&self) -> bool {
        matches!(self.kind, RouteKind::Reg { .. })
    }

    pub fn is_port(&self) -> bool {
        matches!(self.kind, RouteKind::Port { .. })
    }

    /// The identity string: `(route_type, x, y, track, side, io, bit_width,
    /// port, net_id, reg_name, rmux_name, reg_flag)` with `0` substituted
    /// for every field the variant does not carry, in that fixed order.
    ///
    /// `reg_flag` mirrors a field the original implementation threaded
    /// through but never set to anything but its default; it is kept in
    /// the tuple purely so the identity scheme matches field-for-field.
    pub fn identity(&self) -> String {
        let (track, side, io, port, reg_name, rmux_name): (
            String,
            String,
            String,
            String,
            String,
            String,
        ) = match &self.kind {
            RouteKind::Sb { track, side, io } => (
                track.to_string(),
                side.to_string(),
                io.to_string(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
            ),
            RouteKind::Port { port } => (
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                port.clone(),
                "0".to_string(),
                "0".to_string(),
            ),
            RouteKind::Reg { reg_name, track } => (
                track.to_string(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                reg_name.clone(),
                "0".to_string(),
            ),
            RouteKind::Rmux { rmux_name } => (
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                "0".to_string(),
                rmux_name.clone(),
            ),
        };

        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            self.kind.tag(),
            self.x,
            self.y,
            track,
            side,
            io,
            self.bit_width,
            port,
            self.net_id,
            reg_name,
            rmux_name,
            false,
        )
    }
}

/// The tagged sum type downstream code must stay polymorphic over: either
/// a logical tile or a physical routing resource. Neither variant ever
/// owns the other — ownership belongs exclusively to the graph.
#[derive(Clone, Debug)]
pub enum Node {
    Tile(TileNode),
    Route(RouteNode),
}

impl Node {
    pub fn identity(&self) -> String {
        match self {
            Node::Tile(t) => t.identity(),
            Node::Route(r) => r.identity(),
        }
    }

    pub fn as_tile(&self) -> Option<&TileNode> {
        match self {
            Node::Tile(t) => Some(t),
            Node::Route(_) => None,
        }
    }

    pub fn as_tile_mut(&mut self) -> Option<&mut TileNode> {
        match self {
            Node::Tile(t) => Some(t),
            Node::Route(_) => None,
        }
    }

    pub fn as_route(&self) -> Option<&RouteNode> {
        match self {
            Node::Route(r) => Some(r),
            Node::Tile(_) => None,
        }
    }

    pub fn as_route_mut(&mut self) -> Option<&mut RouteNode> {
        match self {
            Node::Route(r) => Some(r),
            Node::Tile(_) => None,
        }
    }

    pub fn is_tile(&self) -> bool {
        matches!(self, Node::Tile(_))
    }

    pub fn kernel(&self) -> Option<&str> {
        match self {
            Node::Tile(t) => t.kernel.as_deref(),
            Node::Route(r) => r.kernel.as_deref(),
        }
    }

    pub fn set_kernel(&mut self, kernel: Option<String>) {
        match self {
            Node::Tile(t) => t.kernel = kernel,
            Node::Route(r) => r.kernel = kernel,
        }
    }
}

impl From<TileNode> for Node {
    fn from(t: TileNode) -> Self {
        Node::Tile(t)
    }
}

impl From<RouteNode> for Node {
    fn from(r: RouteNode) -> Self {
        Node::Route(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_type_from_first_char() {
        assert_eq!(TileType::from_tile_id("p12"), TileType::PE);
        assert_eq!(TileType::from_tile_id("m3"), TileType::MEM);
        assert_eq!(TileType::from_tile_id("M7"), TileType::POND);
        assert_eq!(TileType::from_tile_id("r0"), TileType::REG);
        assert_eq!(TileType::from_tile_id("I1"), TileType::IO16);
        assert_eq!(TileType::from_tile_id("i2"), TileType::IO1);
    }

    #[test]
    fn route_node_identity_is_deterministic() {
        let a = RouteNode::new(1, 2, 16, 3, RouteKind::Sb { track: 4, side: 1, io: 0 });
        let b = RouteNode::new(1, 2, 16, 3, RouteKind::Sb { track: 4, side: 1, io: 0 });
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn route_node_identity_distinguishes_variants() {
        let port = RouteNode::new(0, 0, 1, 0, RouteKind::Port { port: "data0".into() });
        let sb = RouteNode::new(0, 0, 1, 0, RouteKind::Sb { track: 0, side: 0, io: 0 });
        assert_ne!(port.identity(), sb.identity());
    }

    #[test]
    fn tile_identity_is_tile_id() {
        let t = TileNode::new(0, 0, "p17".to_string(), Some("foo".to_string()));
        assert_eq!(t.identity(), "p17");
    }
}

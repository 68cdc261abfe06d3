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

//! Graph construction: fuses placement, routing, and netlist data into a
//! populated [`RoutingResultGraph`].
//!
//! The input types here (`Placement`, `Netlist`, `Routes`, `IdToName`) are
//! the decoded shape this crate expects from its callers; actually reading
//! `design.place`/`design.packed`/`design.route` off disk is an external
//! collaborator's job, out of scope for this crate.

use std::collections::{BTreeMap, HashMap};

use serde::de::{Deserialize, Deserializer, Error as DeError};

use crate::error::{StaError, StaResult};
use crate::graph::RoutingResultGraph;
use crate::log::*;
use crate::node::{RouteKind, RouteNode, TileNode};

pub type BlkId = String;
pub type NetId = i64;

/// `blk_id -> (x, y)`.
///
/// A `BTreeMap`, not a `HashMap`: construction iterates this map directly
/// (tile instantiation order, in turn node insertion order), and insertion
/// order must be reproducible run-to-run for identical input, per the
/// determinism requirement on node/edge iteration order.
pub type Placement = BTreeMap<BlkId, (i32, i32)>;

/// `blk_id -> display name`; kernel is the substring before the first `$`.
pub type IdToName = BTreeMap<BlkId, String>;

/// `net_id -> ordered list of (blk_id, port_name)`, entry 0 is the driver.
///
/// `BTreeMap` for the same reason as [`Placement`]: `netlist.values()` is
/// iterated directly to populate `id_to_ports` and the per-tile input-port
/// table, and `net_id` ordering feeds into segment/edge insertion order.
pub type Netlist = BTreeMap<NetId, Vec<(BlkId, String)>>;

/// `net_id -> list of paths`, each path an ordered list of segments.
pub type Routes = BTreeMap<NetId, Vec<Vec<Segment>>>;

/// One hop of a routed path. Mirrors the four wire shapes the router can
/// emit; the tagged-tuple JSON representation (`["SB", track, x, y, side,
/// io, bit_width]`, etc.) is decoded by the manual `Deserialize` impl below.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Sb { track: i32, x: i32, y: i32, side: i32, io: i32, bit_width: i32 },
    Port { port: String, x: i32, y: i32, bit_width: i32 },
    Reg { reg_name: String, track: i32, x: i32, y: i32, bit_width: i32 },
    Rmux { rmux_name: String, x: i32, y: i32, bit_width: i32 },
    /// A segment whose leading kind tag was not one of `SB`/`PORT`/`REG`/
    /// `RMUX`. Deserialization itself never fails on this case — it would
    /// otherwise surface as a bare JSON-parse panic, bypassing the
    /// `StaResult` pipeline — so the tag is carried through and
    /// `construct_graph` rejects it as `StaError::MalformedSegment`.
    Unknown(String),
}

impl Segment {
    fn xy(&self) -> (i32, i32) {
        match self {
            Segment::Sb { x, y, .. } => (*x, *y),
            Segment::Port { x, y, .. } => (*x, *y),
            Segment::Reg { x, y, .. } => (*x, *y),
            Segment::Rmux { x, y, .. } => (*x, *y),
            Segment::Unknown(tag) => {
                unreachable!("malformed segment tag {:?} should have been rejected before this point", tag)
            }
        }
    }

    fn bit_width(&self) -> i32 {
        match self {
            Segment::Sb { bit_width, .. } => *bit_width,
            Segment::Port { bit_width, .. } => *bit_width,
            Segment::Reg { bit_width, .. } => *bit_width,
            Segment::Rmux { bit_width, .. } => *bit_width,
            Segment::Unknown(tag) => {
                unreachable!("malformed segment tag {:?} should have been rejected before this point", tag)
            }
        }
    }

    fn into_route_node(self, net_id: NetId) -> RouteNode {
        let (x, y) = self.xy();
        let bit_width = self.bit_width();
        let kind = match self {
            Segment::Sb { track, side, io, .. } => RouteKind::Sb { track, side, io },
            Segment::Port { port, .. } => RouteKind::Port { port },
            Segment::Reg { reg_name, track, .. } => RouteKind::Reg { reg_name, track },
            Segment::Rmux { rmux_name, .. } => RouteKind::Rmux { rmux_name },
            Segment::Unknown(tag) => {
                unreachable!("malformed segment tag {:?} should have been rejected before this point", tag)
            }
        };
        RouteNode::new(x, y, bit_width, net_id, kind)
    }
}

fn json_i32(v: &serde_json::Value, idx: usize) -> Result<i32, String> {
    v.get(idx)
        .and_then(|v| v.as_i64())
        .map(|n| n as i32)
        .ok_or_else(|| format!("segment element {} is not an integer", idx))
}

fn json_str(v: &serde_json::Value, idx: usize) -> Result<String, String> {
    v.get(idx)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("segment element {} is not a string", idx))
}

impl<'de> Deserialize<'de> for Segment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let arr = value
            .as_array()
            .ok_or_else(|| DeError::custom("routing segment must be encoded as a JSON array"))?;
        let tag = arr
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| DeError::custom("routing segment is missing its leading kind tag"))?;

        // Fields are offset by the leading tag, which occupies index 0.
        let wrapped = serde_json::Value::Array(arr.clone());
        let f = |i: usize| wrapped.get(i).cloned().unwrap_or(serde_json::Value::Null);
        let arr_from = serde_json::Value::Array((1..arr.len()).map(f).collect());

        let result = match tag {
            "SB" => (|| {
                Ok::<_, String>(Segment::Sb {
                    track: json_i32(&arr_from, 0)?,
                    x: json_i32(&arr_from, 1)?,
                    y: json_i32(&arr_from, 2)?,
                    side: json_i32(&arr_from, 3)?,
                    io: json_i32(&arr_from, 4)?,
                    bit_width: json_i32(&arr_from, 5)?,
                })
            })(),
            "PORT" => (|| {
                Ok::<_, String>(Segment::Port {
                    port: json_str(&arr_from, 0)?,
                    x: json_i32(&arr_from, 1)?,
                    y: json_i32(&arr_from, 2)?,
                    bit_width: json_i32(&arr_from, 3)?,
                })
            })(),
            "REG" => (|| {
                Ok::<_, String>(Segment::Reg {
                    reg_name: json_str(&arr_from, 0)?,
                    track: json_i32(&arr_from, 1)?,
                    x: json_i32(&arr_from, 2)?,
                    y: json_i32(&arr_from, 3)?,
                    bit_width: json_i32(&arr_from, 4)?,
                })
            })(),
            "RMUX" => (|| {
                Ok::<_, String>(Segment::Rmux {
                    rmux_name: json_str(&arr_from, 0)?,
                    x: json_i32(&arr_from, 1)?,
                    y: json_i32(&arr_from, 2)?,
                    bit_width: json_i32(&arr_from, 3)?,
                })
            })(),
            other => return Ok(Segment::Unknown(other.to_string())),
        };

        result.map_err(DeError::custom)
    }
}

fn kernel_of(id_to_name: &IdToName, blk_id: &str) -> Option<String> {
    id_to_name.get(blk_id).and_then(|name| {
        name.split_once('$').map(|(prefix, _)| prefix.to_string())
    })
}

fn numeric_suffix(blk_id: &str) -> Option<u64> {
    blk_id[1..].parse::<u64>().ok()
}

/// Fuses `placement`, `routes`, `id_to_name`, and `netlist` into a
/// populated [`RoutingResultGraph`], per the eight construction steps in
/// the spec: tile instantiation, segment materialization and stitching,
/// adjacency rebuild, per-port latency/break-path annotation, kernel
/// propagation, and cycle breaking.
pub fn construct_graph(
    placement: &Placement,
    routes: &Routes,
    id_to_name: &IdToName,
    netlist: &Netlist,
    pe_latency: i64,
) -> StaResult<RoutingResultGraph> {
    dbg_log!(DBG_INFO, "Constructing graph from {} nets", netlist.len());

    let mut graph = RoutingResultGraph::new();
    graph.id_to_name = id_to_name.clone();

    // Step 1: id_to_ports from every netlist endpoint (driver + sinks).
    for conns in netlist.values() {
        for (blk_id, port) in conns {
            graph
                .id_to_ports
                .entry(blk_id.clone())
                .or_insert_with(Vec::new)
                .push(port.clone());
        }
    }

    // Step 2: placement map, (x, y) -> tile_ids.
    for (blk_id, &(x, y)) in placement {
        graph.placement.entry((x, y)).or_insert_with(Vec::new).push(blk_id.clone());
    }

    // Step 3: instantiate tiles, tracking the highest register suffix seen.
    let mut max_reg_id: u64 = 0;
    for (blk_id, &(x, y)) in placement {
        let kernel = kernel_of(id_to_name, blk_id);
        let tile = TileNode::new(x, y, blk_id.clone(), kernel);
        graph.add_node(tile);
        if let Some(n) = numeric_suffix(blk_id) {
            max_reg_id = max_reg_id.max(n);
        }
    }
    graph.added_regs = max_reg_id + 1;

    // Step 4: materialize routing segments and stitch them to tile
    // boundaries. PORT and REG are the only variants adjacent to a tile.
    for (&net_id, paths) in routes {
        for path in paths {
            for seg in path {
                if let Segment::Unknown(tag) = seg {
                    return Err(StaError::MalformedSegment(tag.clone()));
                }
            }

            for window in path.windows(2) {
                let (seg1, seg2) = (window[0].clone(), window[1].clone());

                let node1 = seg1.clone().into_route_node(net_id);
                let node2 = seg2.clone().into_route_node(net_id);
                let id1 = graph.add_node(node1);
                let id2 = graph.add_node(node2);
                graph.add_edge(id1, id2);

                stitch_tile_boundary(&mut graph, &seg1, id1, true)?;
                stitch_tile_boundary(&mut graph, &seg2, id2, false)?;
            }
        }
    }

    // Step 5.
    graph.update_sources_and_sinks();

    // Step 6: per-port latency / break-path annotation.
    let mut id_to_input_ports: HashMap<BlkId, Vec<String>> = HashMap::new();
    for conns in netlist.values() {
        for (blk_id, port) in conns.iter().skip(1) {
            id_to_input_ports
                .entry(blk_id.clone())
                .or_insert_with(Vec::new)
                .push(port.clone());
        }
    }

    let shift_regs: std::collections::HashSet<_> = graph.get_shift_regs().into_iter().collect();

    for tile_id_handle in graph.get_tiles() {
        let tile_id = graph.get(tile_id_handle).as_tile().unwrap().tile_id.clone();
        let Some(ports) = id_to_input_ports.get(&tile_id) else { continue };
        let ports = ports.clone();
        let tile_type = graph.get(tile_id_handle).as_tile().unwrap().tile_type;
        let is_shift_reg = shift_regs.contains(&tile_id_handle);

        for port in ports {
            use crate::node::TileType::*;
            let (latency, break_path) = match tile_type {
                PE => (pe_latency, pe_latency != 0),
                MEM => {
                    if port.contains("flush") || port.contains("chain") {
                        (0, false)
                    } else {
                        (0, true)
                    }
                }
                REG => {
                    if is_shift_reg {
                        (0, true)
                    } else {
                        (1, true)
                    }
                }
                POND => (0, true),
                IO1 | IO16 => (0, false),
            };

            let tile = graph.get_mut(tile_id_handle).as_tile_mut().unwrap();
            tile.input_port_latencies.insert(port.clone(), latency);
            tile.input_port_break_path.insert(port, break_path);
        }
    }

    // Step 7.
    graph.update_edge_kernels();

    // Step 8.
    let mut cycles_broken = 0;
    while graph.fix_cycles() {
        cycles_broken += 1;
    }
    if cycles_broken > 0 {
        dbg_log!(DBG_WARN, "Broke {} cycle(s) in routing graph", cycles_broken);
    }

    Ok(graph)
}

/// For a PORT segment, connects the tile at `(x, y)` exposing `port` to
/// (or from) the just-added route node. For a REG segment, connects the
/// register tile at `(x, y)` instead. SB and RMUX segments are
/// fabric-internal and need no stitching.
///
/// `outgoing` is `true` when `seg` is the first element of the pair
/// (`tile -> node`, the tile driving its output onto the fabric) and
/// `false` when it is the second (`node -> tile`, the fabric feeding the
/// tile's input).
fn stitch_tile_boundary(
    graph: &mut RoutingResultGraph,
    seg: &Segment,
    node_id: crate::node::NodeId,
    outgoing: bool,
) -> StaResult<()> {
    let (x, y, tile_id) = match seg {
        Segment::Port { port, x, y, .. } => {
            let tile_id = graph.get_tile_at(*x, *y, port).ok_or_else(|| StaError::MissingTile {
                x: *x,
                y: *y,
                detail: format!("port {:?}", port),
            })?;
            (*x, *y, tile_id)
        }
        Segment::Reg { x, y, .. } => {
            let tile_id = graph
                .get_reg_at(*x, *y)
                .ok_or_else(|| StaError::MissingTile { x: *x, y: *y, detail: "register tile".to_string() })?;
            (*x, *y, tile_id)
        }
        Segment::Sb { .. } | Segment::Rmux { .. } => return Ok(()),
    };

    let tile_node_id = graph.tile_by_id(&tile_id).ok_or_else(|| StaError::MissingTile {
        x,
        y,
        detail: format!("tile {:?} referenced by routing but absent from placement", tile_id),
    })?;

    if outgoing {
        graph.add_edge(tile_node_id, node_id);
    } else {
        graph.add_edge(node_id, tile_node_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(segs: Vec<Segment>) -> Vec<Vec<Segment>> {
        vec![segs]
    }

    /// S1 (also exercised pipelined, as S2, by the sta module's own test):
    /// a single PE fed from an input IO over a PORT -> SB -> PORT path.
    fn single_pe_design() -> (Placement, Routes, IdToName, Netlist) {
        let mut placement = Placement::new();
        placement.insert("p1".into(), (0, 0));
        placement.insert("i1".into(), (0, 1));

        let mut netlist = Netlist::new();
        netlist.insert(
            0,
            vec![("i1".to_string(), "io2f_17".to_string()), ("p1".to_string(), "data0".to_string())],
        );

        let mut id_to_name = IdToName::new();
        id_to_name.insert("p1".into(), "global$pe_0".into());
        id_to_name.insert("i1".into(), "global$io_0".into());

        let mut routes = Routes::new();
        routes.insert(
            0,
            path(vec![
                Segment::Port { port: "io2f_17".into(), x: 0, y: 1, bit_width: 16 },
                Segment::Sb { track: 0, x: 0, y: 1, side: 1, io: 1, bit_width: 16 },
                Segment::Sb { track: 0, x: 0, y: 0, side: 3, io: 0, bit_width: 16 },
                Segment::Port { port: "data0".into(), x: 0, y: 0, bit_width: 16 },
            ]),
        );

        (placement, routes, id_to_name, netlist)
    }

    #[test]
    fn construct_graph_stitches_tile_boundaries() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();
        let graph = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();

        assert_eq!(graph.get_tiles().len(), 2);
        let pe = graph.tile_by_id("p1").unwrap();
        assert!(!graph.sources_of(pe).is_empty());
    }

    #[test]
    fn kernel_is_prefix_before_dollar() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();
        let graph = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();
        let pe = graph.tile_by_id("p1").unwrap();
        assert_eq!(graph.get(pe).kernel(), Some("global"));
    }

    #[test]
    fn pe_break_path_follows_pe_latency() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();

        let unpipelined = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();
        let pe = unpipelined.tile_by_id("p1").unwrap();
        let tile = unpipelined.get(pe).as_tile().unwrap();
        assert_eq!(tile.input_port_break_path.get("data0"), Some(&false));

        let pipelined = construct_graph(&placement, &routes, &id_to_name, &netlist, 1).unwrap();
        let pe = pipelined.tile_by_id("p1").unwrap();
        let tile = pipelined.get(pe).as_tile().unwrap();
        assert_eq!(tile.input_port_break_path.get("data0"), Some(&true));
        assert_eq!(tile.input_port_latencies.get("data0"), Some(&1));
    }

    #[test]
    fn missing_tile_for_port_is_an_error() {
        let mut placement = Placement::new();
        placement.insert("p1".into(), (0, 0));
        let id_to_name = IdToName::new();
        let netlist = Netlist::new();
        let mut routes = Routes::new();
        routes.insert(
            0,
            path(vec![
                Segment::Port { port: "nope".into(), x: 5, y: 5, bit_width: 16 },
                Segment::Rmux { rmux_name: "r0".into(), x: 5, y: 5, bit_width: 16 },
            ]),
        );

        let err = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap_err();
        assert!(matches!(err, StaError::MissingTile { .. }));
    }

    #[test]
    fn unrecognized_segment_tag_deserializes_to_unknown() {
        let decoded: Segment = serde_json::from_str(r#"["WIBBLE", 1, 2, 3]"#).unwrap();
        assert_eq!(decoded, Segment::Unknown("WIBBLE".to_string()));
    }

    #[test]
    fn malformed_segment_is_an_error() {
        let placement = Placement::new();
        let id_to_name = IdToName::new();
        let netlist = Netlist::new();
        let mut routes = Routes::new();
        routes.insert(
            0,
            path(vec![
                Segment::Unknown("WIBBLE".to_string()),
                Segment::Rmux { rmux_name: "r0".into(), x: 5, y: 5, bit_width: 16 },
            ]),
        );

        let err = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap_err();
        assert!(matches!(err, StaError::MalformedSegment(tag) if tag == "WIBBLE"));
    }
}

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

//! Static timing analysis over a constructed [`RoutingResultGraph`]: a
//! longest-path walk in topological order that accumulates per-hop delay
//! counters and resets them at register boundaries.

use std::fmt;

use serde::Deserialize;

use crate::error::{StaError, StaResult};
use crate::graph::RoutingResultGraph;
use crate::log::*;
use crate::node::{NodeId, RouteKind, TileType};

/// Per-hop delays in picoseconds, decoded from an external delay-table
/// JSON document. All six fields are required: a document missing one
/// fails deserialization before STA ever runs.
#[derive(Debug, Clone, Deserialize)]
pub struct DelayTable {
    pub glb: u64,
    pub sb_horiz: u64,
    pub sb_up: u64,
    pub sb_down: u64,
    pub pe: u64,
    pub mem: u64,
}

/// Delay-contributing counters accumulated along one candidate path, plus
/// a back-link to the predecessor the candidate was cloned from.
///
/// `available_regs` is tracked for prospective retiming tooling; it never
/// contributes to `total`.
#[derive(Debug, Clone, Default)]
pub struct PathComponents {
    pub glbs: u64,
    pub hhops: u64,
    pub uhops: u64,
    pub dhops: u64,
    pub pes: u64,
    pub mems: u64,
    pub available_regs: u64,
    pub parent: Option<NodeId>,
}

impl PathComponents {
    pub fn total(&self, delays: &DelayTable) -> u64 {
        self.glbs * delays.glb
            + self.hhops * delays.sb_horiz
            + self.uhops * delays.sb_up
            + self.dhops * delays.sb_down
            + self.pes * delays.pe
            + self.mems * delays.mem
    }
}

/// The result of a completed STA run.
pub struct StaReport {
    pub max_delay_ps: u64,
    pub clock_speed_mhz: f64,
    pub endpoint: NodeId,
    pub endpoint_components: PathComponents,
}

impl fmt::Display for StaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "max clock frequency: {:.2} MHz", self.clock_speed_mhz)?;
        writeln!(f, "critical path delay: {} ps", self.max_delay_ps)?;
        writeln!(
            f,
            "critical endpoint breakdown: glbs={} hhops={} uhops={} dhops={} pes={} mems={} available_regs={}",
            self.endpoint_components.glbs,
            self.endpoint_components.hhops,
            self.endpoint_components.uhops,
            self.endpoint_components.dhops,
            self.endpoint_components.pes,
            self.endpoint_components.mems,
            self.endpoint_components.available_regs,
        )
    }
}

fn break_path_for(
    graph: &RoutingResultGraph,
    tile_id: NodeId,
    predecessor: NodeId,
) -> StaResult<bool> {
    let tile = graph.get(tile_id).as_tile().expect("tile node expected");
    let pred = graph.get(predecessor);
    match pred.as_route() {
        Some(route) => match &route.kind {
            RouteKind::Port { port } => Ok(tile.input_port_break_path.get(port).copied().unwrap_or(false)),
            RouteKind::Reg { .. } => Ok(tile.input_port_break_path.get("reg").copied().unwrap_or(false)),
            _ => Err(StaError::InvalidPredecessor(format!(
                "tile {:?} fed by non-port/non-reg route node",
                tile.tile_id
            ))),
        },
        None => Err(StaError::InvalidPredecessor(format!(
            "tile {:?} fed directly by another tile",
            tile.tile_id
        ))),
    }
}

/// Runs static timing analysis: a topologically-ordered longest-path walk
/// that accumulates per-hop delay counters, resetting at register
/// boundaries, and reports the critical path.
pub fn sta(graph: &RoutingResultGraph, delays: &DelayTable) -> StaResult<StaReport> {
    let order = graph.topological_sort();
    dbg_log!(DBG_INFO, "Running STA over {} nodes", order.len());
    let mut timing_info: Vec<Option<PathComponents>> = vec![None; graph.node_count()];

    for node_id in &order {
        let node_id = *node_id;
        let sources = graph.sources_of(node_id);
        let is_tile = graph.get(node_id).is_tile();

        let mut candidates: Vec<PathComponents> = Vec::new();

        if sources.is_empty() && is_input_io(graph, node_id) {
            candidates.push(PathComponents { glbs: 1, parent: None, ..Default::default() });
        }

        for &p in sources {
            let mut c = timing_info[p.index()]
                .clone()
                .unwrap_or_default();
            c.parent = Some(p);

            if is_tile {
                match tile_kind(graph, node_id) {
                    TileType::PE => c.pes += 1,
                    TileType::MEM => c.mems += 1,
                    TileType::IO1 | TileType::IO16 => c.glbs += 1,
                    TileType::POND | TileType::REG => {}
                }

                if break_path_for(graph, node_id, p)? {
                    c = PathComponents { parent: Some(p), ..Default::default() };
                }
            } else if let Some(route) = graph.get(node_id).as_route() {
                match &route.kind {
                    RouteKind::Sb { side, io, .. } if *io == 1 => match side {
                        3 => c.uhops += 1,
                        1 => c.dhops += 1,
                        _ => c.hhops += 1,
                    },
                    RouteKind::Rmux { .. } => {
                        if !matches!(graph.get(p).as_route().map(|r| &r.kind), Some(RouteKind::Reg { .. })) {
                            c.available_regs += 1;
                        }
                    }
                    _ => {}
                }
            }

            candidates.push(c);
        }

        if candidates.is_empty() {
            candidates.push(PathComponents::default());
        }

        let best = candidates
            .into_iter()
            .fold(None::<PathComponents>, |best, cand| match &best {
                None => Some(cand),
                Some(b) if cand.total(delays) > b.total(delays) => Some(cand),
                Some(_) => best,
            })
            .unwrap();

        timing_info[node_id.index()] = Some(best);
    }

    // Tie-break: reverse the node list, then keep the first (i.e.
    // last-inserted among equal totals) maximal entry.
    let mut reversed: Vec<NodeId> = graph.node_ids().collect();
    reversed.reverse();

    let mut best_id = None;
    let mut best_total = 0u64;
    for id in reversed {
        if let Some(components) = &timing_info[id.index()] {
            let total = components.total(delays);
            if best_id.is_none() || total > best_total {
                best_total = total;
                best_id = Some(id);
            }
        }
    }

    let endpoint = best_id.expect("graph must contain at least one node to run STA on");
    let endpoint_components = timing_info[endpoint.index()].clone().unwrap_or_default();
    let max_delay_ps = best_total;
    let clock_speed_mhz = if max_delay_ps == 0 { f64::INFINITY } else { 1.0e6 / max_delay_ps as f64 };

    Ok(StaReport { max_delay_ps, clock_speed_mhz, endpoint, endpoint_components })
}

fn is_input_io(graph: &RoutingResultGraph, id: NodeId) -> bool {
    graph
        .get(id)
        .as_tile()
        .map(|t| matches!(t.tile_type, TileType::IO1 | TileType::IO16))
        .unwrap_or(false)
}

fn tile_kind(graph: &RoutingResultGraph, id: NodeId) -> TileType {
    graph.get(id).as_tile().expect("tile node expected").tile_type
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::construct::{construct_graph, IdToName, Netlist, Placement, Routes, Segment};

    fn delays() -> DelayTable {
        DelayTable { glb: 100, sb_horiz: 10, sb_up: 20, sb_down: 20, pe: 50, mem: 80 }
    }

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
            vec![vec![
                Segment::Port { port: "io2f_17".into(), x: 0, y: 1, bit_width: 16 },
                Segment::Sb { track: 0, x: 0, y: 1, side: 1, io: 1, bit_width: 16 },
                Segment::Sb { track: 0, x: 0, y: 0, side: 3, io: 0, bit_width: 16 },
                Segment::Port { port: "data0".into(), x: 0, y: 0, bit_width: 16 },
            ]],
        );

        (placement, routes, id_to_name, netlist)
    }

    /// S1: single PE, no pipelining.
    #[test]
    fn unpipelined_critical_path_includes_glb_and_pe() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();
        let graph = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();
        let report = sta(&graph, &delays()).unwrap();

        assert!(report.max_delay_ps > 0);
        assert_eq!(report.endpoint_components.glbs, 1);
        assert_eq!(report.endpoint_components.pes, 1);
    }

    /// S2: PE pipelined resets accumulation at the PE input, so the
    /// reported critical path is no longer than the unpipelined case.
    #[test]
    fn pipelined_design_is_not_slower_than_unpipelined() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();
        let unpipelined = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();
        let pipelined = construct_graph(&placement, &routes, &id_to_name, &netlist, 1).unwrap();

        let report_unpipelined = sta(&unpipelined, &delays()).unwrap();
        let report_pipelined = sta(&pipelined, &delays()).unwrap();

        assert!(report_pipelined.max_delay_ps <= report_unpipelined.max_delay_ps);
    }

    #[test]
    fn clock_speed_is_inverse_of_delay() {
        let (placement, routes, id_to_name, netlist) = single_pe_design();
        let graph = construct_graph(&placement, &routes, &id_to_name, &netlist, 0).unwrap();
        let report = sta(&graph, &delays()).unwrap();
        let expected = 1.0e6 / report.max_delay_ps as f64;
        assert!((report.clock_speed_mhz - expected).abs() < 1e-9);
    }
}

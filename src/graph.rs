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

//! The routing-result graph: a directed graph fusing logical tiles with
//! physical routing resources, built once by [`crate::construct`] and then
//! treated as read-only by [`crate::sta`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::node::{Node, NodeId, RouteKind, TileNode, TileType};

#[derive(Default)]
struct CategoryCache {
    mems: RefCell<Option<Vec<NodeId>>>,
    roms: RefCell<Option<Vec<NodeId>>>,
    regs: RefCell<Option<Vec<NodeId>>>,
    shift_regs: RefCell<Option<Vec<NodeId>>>,
    ponds: RefCell<Option<Vec<NodeId>>>,
    pes: RefCell<Option<Vec<NodeId>>>,
    input_ios: RefCell<Option<Vec<NodeId>>>,
    output_ios: RefCell<Option<Vec<NodeId>>>,
}

/// The fused placement+routing+netlist graph. See the module-level docs for
/// lifecycle notes: everything here is built by `construct_graph` and
/// consumed read-only afterwards.
pub struct RoutingResultGraph {
    nodes: Vec<Node>,
    identity_to_id: HashMap<String, NodeId>,
    tile_id_to_node: HashMap<String, NodeId>,
    edges: Vec<(NodeId, NodeId)>,
    edge_set: HashSet<(NodeId, NodeId)>,
    sources: Vec<Vec<NodeId>>,
    sinks: Vec<Vec<NodeId>>,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,

    pub placement: HashMap<(i32, i32), Vec<String>>,
    pub id_to_ports: HashMap<String, Vec<String>>,
    pub id_to_name: HashMap<String, String>,
    pub added_regs: u64,

    cache: CategoryCache,
}

impl RoutingResultGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            identity_to_id: HashMap::new(),
            tile_id_to_node: HashMap::new(),
            edges: Vec::new(),
            edge_set: HashSet::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            placement: HashMap::new(),
            id_to_ports: HashMap::new(),
            id_to_name: HashMap::new(),
            added_regs: 0,
            cache: CategoryCache::default(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId::from_raw(i as u32))
    }

    pub fn sources_of(&self, id: NodeId) -> &[NodeId] {
        &self.sources[id.index()]
    }

    pub fn sinks_of(&self, id: NodeId) -> &[NodeId] {
        &self.sinks[id.index()]
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn tile_by_id(&self, tile_id: &str) -> Option<NodeId> {
        self.tile_id_to_node.get(tile_id).copied()
    }

    /// Registers a node, deduplicating by identity string. Idempotent:
    /// inserting the same logical node twice returns the same handle.
    pub fn add_node<N: Into<Node>>(&mut self, node: N) -> NodeId {
        let node = node.into();
        let identity = node.identity();
        if let Some(&id) = self.identity_to_id.get(&identity) {
            return id;
        }

        let id = NodeId::from_raw(self.nodes.len() as u32);
        if let Node::Tile(t) = &node {
            self.tile_id_to_node.insert(t.tile_id.clone(), id);
        }
        self.identity_to_id.insert(identity, id);
        self.nodes.push(node);
        self.sources.push(Vec::new());
        self.sinks.push(Vec::new());
        id
    }

    /// Adds a directed edge. Both endpoints must already have been added.
    /// Idempotent on duplicate edges.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId) {
        debug_assert!(u.index() < self.nodes.len(), "add_edge: {:?} not in graph", u);
        debug_assert!(v.index() < self.nodes.len(), "add_edge: {:?} not in graph", v);

        if self.edge_set.insert((u, v)) {
            self.edges.push((u, v));
            if !self.sinks[u.index()].contains(&v) {
                self.sinks[u.index()].push(v);
            }
            if !self.sources[v.index()].contains(&u) {
                self.sources[v.index()].push(u);
            }
        }
    }

    /// Removes an edge from the edge list and both adjacency indices.
    /// Tolerates edges that are not present.
    pub fn remove_edge(&mut self, edge: (NodeId, NodeId)) {
        let (u, v) = edge;
        if self.edge_set.remove(&edge) {
            if let Some(pos) = self.edges.iter().position(|&e| e == edge) {
                self.edges.remove(pos);
            }
        }
        if let Some(pos) = self.sinks[u.index()].iter().position(|&x| x == v) {
            self.sinks[u.index()].remove(pos);
        }
        if let Some(pos) = self.sources[v.index()].iter().position(|&x| x == u) {
            self.sources[v.index()].remove(pos);
        }
    }

    /// Rebuilds `sources`, `sinks`, `inputs`, `outputs` from the edge list.
    /// Must be called after bulk edits that didn't go through `add_edge`.
    pub fn update_sources_and_sinks(&mut self) {
        for s in self.sources.iter_mut() {
            s.clear();
        }
        for s in self.sinks.iter_mut() {
            s.clear();
        }

        for &(u, v) in &self.edges {
            if !self.sinks[u.index()].contains(&v) {
                self.sinks[u.index()].push(v);
            }
            if !self.sources[v.index()].contains(&u) {
                self.sources[v.index()].push(u);
            }
        }

        self.inputs.clear();
        self.outputs.clear();
        for id in self.node_ids() {
            if self.sources[id.index()].is_empty() {
                self.inputs.push(id);
            }
            if self.sinks[id.index()].is_empty() {
                self.outputs.push(id);
            }
        }
    }

    /// Forward reachability search from `src` to `dst`.
    pub fn is_reachable(&self, src: NodeId, dst: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![src];
        visited.insert(src);
        while let Some(n) = stack.pop() {
            if n == dst {
                return true;
            }
            for &next in &self.sinks[n.index()] {
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Post-order DFS from every input, reversed. Deterministic given the
    /// insertion order of `inputs` and of each node's `sinks` list.
    ///
    /// Implemented with an explicit work stack rather than recursion: CGRA
    /// routing graphs can exceed the depth a default call stack tolerates.
    pub fn topological_sort(&self) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for &input in &self.inputs {
            if visited[input.index()] {
                continue;
            }
            visited[input.index()] = true;
            let mut work: Vec<(NodeId, usize)> = vec![(input, 0)];

            while let Some(&(node, child_idx)) = work.last() {
                let sinks = &self.sinks[node.index()];
                if child_idx < sinks.len() {
                    let child = sinks[child_idx];
                    work.last_mut().unwrap().1 += 1;
                    if !visited[child.index()] {
                        visited[child.index()] = true;
                        work.push((child, 0));
                    }
                } else {
                    order.push(node);
                    work.pop();
                }
            }
        }

        order.reverse();
        order
    }

    /// Runs one pass of iterative DFS-with-recursion-stack from each input;
    /// on the first back edge discovered, removes it and returns `true`.
    /// Returns `false` once no cycle remains. Callers loop until `false`.
    pub fn fix_cycles(&mut self) -> bool {
        let n = self.nodes.len();
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        let inputs = self.inputs.clone();

        for start in inputs {
            if visited[start.index()] {
                continue;
            }
            visited[start.index()] = true;
            on_stack[start.index()] = true;
            let mut work: Vec<(NodeId, usize)> = vec![(start, 0)];

            while let Some(&(node, child_idx)) = work.last() {
                let sinks_len = self.sinks[node.index()].len();
                if child_idx < sinks_len {
                    let child = self.sinks[node.index()][child_idx];
                    work.last_mut().unwrap().1 += 1;
                    if !visited[child.index()] {
                        visited[child.index()] = true;
                        on_stack[child.index()] = true;
                        work.push((child, 0));
                    } else if on_stack[child.index()] {
                        self.remove_edge((node, child));
                        return true;
                    }
                } else {
                    on_stack[node.index()] = false;
                    work.pop();
                }
            }
        }
        false
    }

    pub fn get_tiles(&self) -> Vec<NodeId> {
        self.node_ids().filter(|&id| self.nodes[id.index()].is_tile()).collect()
    }

    pub fn get_routes(&self) -> Vec<NodeId> {
        self.node_ids().filter(|&id| !self.nodes[id.index()].is_tile()).collect()
    }

    fn tiles_of_type(&self, ty: TileType) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| matches!(self.nodes[id.index()].as_tile(), Some(t) if t.tile_type == ty))
            .collect()
    }

    pub fn get_mems(&self) -> Vec<NodeId> {
        if self.cache.mems.borrow().is_none() {
            *self.cache.mems.borrow_mut() = Some(self.tiles_of_type(TileType::MEM));
        }
        self.cache.mems.borrow().clone().unwrap()
    }

    /// A MEM whose incoming sources include a PORT named `ren_in_0`.
    pub fn get_roms(&self) -> Vec<NodeId> {
        if self.cache.roms.borrow().is_none() {
            let roms = self
                .get_mems()
                .into_iter()
                .filter(|&id| {
                    self.sources[id.index()].iter().any(|&src| {
                        self.nodes[src.index()]
                            .as_route()
                            .and_then(|r| r.port_name())
                            == Some("ren_in_0")
                    })
                })
                .collect();
            *self.cache.roms.borrow_mut() = Some(roms);
        }
        self.cache.roms.borrow().clone().unwrap()
    }

    pub fn get_regs(&self) -> Vec<NodeId> {
        if self.cache.regs.borrow().is_none() {
            *self.cache.regs.borrow_mut() = Some(self.tiles_of_type(TileType::REG));
        }
        self.cache.regs.borrow().clone().unwrap()
    }

    /// A MEM whose human name (from `id_to_name`) contains `d_reg_`.
    pub fn get_shift_regs(&self) -> Vec<NodeId> {
        if self.cache.shift_regs.borrow().is_none() {
            let shift_regs = self
                .get_mems()
                .into_iter()
                .filter(|&id| {
                    let tile_id = &self.nodes[id.index()].as_tile().unwrap().tile_id;
                    self.id_to_name
                        .get(tile_id)
                        .map(|name| name.contains("d_reg_"))
                        .unwrap_or(false)
                })
                .collect();
            *self.cache.shift_regs.borrow_mut() = Some(shift_regs);
        }
        self.cache.shift_regs.borrow().clone().unwrap()
    }

    pub fn get_ponds(&self) -> Vec<NodeId> {
        if self.cache.ponds.borrow().is_none() {
            *self.cache.ponds.borrow_mut() = Some(self.tiles_of_type(TileType::POND));
        }
        self.cache.ponds.borrow().clone().unwrap()
    }

    pub fn get_pes(&self) -> Vec<NodeId> {
        if self.cache.pes.borrow().is_none() {
            *self.cache.pes.borrow_mut() = Some(self.tiles_of_type(TileType::PE));
        }
        self.cache.pes.borrow().clone().unwrap()
    }

    fn is_io(&self, id: NodeId) -> bool {
        matches!(
            self.nodes[id.index()].as_tile().map(|t| t.tile_type),
            Some(TileType::IO1) | Some(TileType::IO16)
        )
    }

    pub fn get_input_ios(&self) -> Vec<NodeId> {
        if self.cache.input_ios.borrow().is_none() {
            let ios = self
                .node_ids()
                .filter(|&id| self.is_io(id) && self.sources[id.index()].is_empty())
                .collect();
            *self.cache.input_ios.borrow_mut() = Some(ios);
        }
        self.cache.input_ios.borrow().clone().unwrap()
    }

    pub fn get_output_ios(&self) -> Vec<NodeId> {
        if self.cache.output_ios.borrow().is_none() {
            let ios = self
                .node_ids()
                .filter(|&id| self.is_io(id) && self.sinks[id.index()].is_empty())
                .collect();
            *self.cache.output_ios.borrow_mut() = Some(ios);
        }
        self.cache.output_ios.borrow().clone().unwrap()
    }

    /// Among tiles placed at `(x, y)`, the first whose port list contains
    /// `port`.
    pub fn get_tile_at(&self, x: i32, y: i32, port: &str) -> Option<String> {
        let tiles = self.placement.get(&(x, y))?;
        tiles
            .iter()
            .find(|tile_id| {
                self.id_to_ports
                    .get(*tile_id)
                    .map(|ports| ports.iter().any(|p| p == port))
                    .unwrap_or(false)
            })
            .cloned()
    }

    /// Among tiles placed at `(x, y)`, the first whose `tile_id` starts
    /// with `r`.
    pub fn get_reg_at(&self, x: i32, y: i32) -> Option<String> {
        let tiles = self.placement.get(&(x, y))?;
        tiles.iter().find(|tile_id| tile_id.starts_with('r')).cloned()
    }

    /// Propagates `kernel` from each input tile forward through the graph.
    ///
    /// The per-input walk uses a `Vec` as a LIFO stack (matching the
    /// original implementation's `queue.pop()`, which is a DFS despite the
    /// name) because which kernel wins when a RouteNode is reachable from
    /// more than one tile depends on that exact order. The final pass then
    /// overwrites every tile's immediate sources with that tile's own
    /// kernel, so a tile's directly-feeding routing always displays the
    /// consuming tile's kernel rather than the upstream one.
    pub fn update_edge_kernels(&mut self) {
        for i in 0..self.inputs.len() {
            let start = self.inputs[i];
            let mut visited = HashSet::new();
            let mut stack = vec![start];
            visited.insert(start);

            while let Some(n) = stack.pop() {
                let kernel = self.nodes[n.index()].kernel().map(|s| s.to_string());
                let children = self.sinks[n.index()].clone();
                for child in children {
                    if visited.insert(child) {
                        stack.push(child);
                        if self.nodes[child.index()].as_route().is_some() {
                            self.nodes[child.index()].set_kernel(kernel.clone());
                        }
                    }
                }
            }
        }

        for tile_id in self.get_tiles() {
            let kernel = self.nodes[tile_id.index()].kernel().map(|s| s.to_string());
            let sources = self.sources[tile_id.index()].clone();
            for src in sources {
                self.nodes[src.index()].set_kernel(kernel.clone());
            }
        }
    }

    /// Renders the graph as Graphviz DOT source text. Never shells out to
    /// an external renderer — producing an image from this text is the
    /// caller's responsibility, if they want one at all.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph routing_result {\n");
        for id in self.node_ids() {
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\"];\n",
                self.get(id).identity(),
                display_label(self.get(id))
            ));
        }
        for &(u, v) in &self.edges {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\";\n",
                self.get(u).identity(),
                self.get(v).identity()
            ));
        }
        out.push_str("}\n");
        out
    }
}

impl Default for RoutingResultGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn display_label(node: &Node) -> String {
    match node {
        Node::Tile(TileNode { tile_id, .. }) => tile_id.clone(),
        Node::Route(r) => match &r.kind {
            RouteKind::Sb { track, side, io } => {
                format!("SB({}, {}, {}, {}, {}, {})", track, r.x, r.y, side, io, r.bit_width)
            }
            RouteKind::Port { port } => format!("PORT({}, {}, {}, {})", port, r.x, r.y, r.bit_width),
            RouteKind::Reg { reg_name, track } => {
                format!("REG({}, {}, {}, {}, {})", reg_name, track, r.x, r.y, r.bit_width)
            }
            RouteKind::Rmux { rmux_name } => format!("RMUX({}, {}, {}, {})", rmux_name, r.x, r.y, r.bit_width),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RouteNode;

    fn tile(id: &str) -> TileNode {
        TileNode::new(0, 0, id.to_string(), None)
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(tile("p1"));
        let b = g.add_node(tile("p1"));
        assert_eq!(a, b);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn edges_update_adjacency_both_ways() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(tile("p1"));
        let b = g.add_node(tile("p2"));
        g.add_edge(a, b);
        assert_eq!(g.sinks_of(a), &[b]);
        assert_eq!(g.sources_of(b), &[a]);
    }

    #[test]
    fn add_edge_is_idempotent() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(tile("p1"));
        let b = g.add_node(tile("p2"));
        g.add_edge(a, b);
        g.add_edge(a, b);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.sinks_of(a).len(), 1);
    }

    #[test]
    fn update_sources_and_sinks_recomputes_inputs_outputs() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(tile("p1"));
        let b = g.add_node(tile("p2"));
        g.add_edge(a, b);
        g.update_sources_and_sinks();
        assert_eq!(g.inputs(), &[a]);
        assert_eq!(g.outputs(), &[b]);
    }

    #[test]
    fn topological_sort_orders_edges_forward() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(tile("p1"));
        let b = g.add_node(tile("p2"));
        let c = g.add_node(tile("p3"));
        g.add_edge(a, b);
        g.add_edge(b, c);
        g.update_sources_and_sinks();

        let order = g.topological_sort();
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn fix_cycles_removes_one_back_edge_then_stabilizes() {
        let mut g = RoutingResultGraph::new();
        let a = g.add_node(RouteNode::new(0, 0, 1, 0, RouteKind::Rmux { rmux_name: "A".into() }));
        let b = g.add_node(RouteNode::new(0, 0, 1, 0, RouteKind::Rmux { rmux_name: "B".into() }));
        g.add_edge(a, b);
        g.add_edge(b, a);
        g.update_sources_and_sinks();

        // Neither node is a source in the strict sense once the loop exists,
        // but construction always runs fix_cycles starting from `inputs`
        // which may be empty for a pure cycle; drive the fixed point
        // directly from a seeded input for this isolated test.
        g.inputs = vec![a];
        assert!(g.fix_cycles());
        assert!(!g.fix_cycles());
        g.update_sources_and_sinks();
        let _ = g.topological_sort();
    }

    #[test]
    fn get_mems_is_memoized() {
        let mut g = RoutingResultGraph::new();
        g.add_node(tile("m1"));
        let first = g.get_mems();
        let second = g.get_mems();
        assert_eq!(first, second);
    }

    /// S3: a MEM whose human name contains `d_reg_` is a shift register.
    #[test]
    fn shift_register_detected_by_name_substring() {
        let mut g = RoutingResultGraph::new();
        let mem = g.add_node(tile("m5"));
        g.id_to_name.insert("m5".to_string(), "foo$d_reg_3".to_string());
        g.update_sources_and_sinks();

        assert!(g.get_shift_regs().contains(&mem));
        assert!(g.get_mems().contains(&mem));
    }

    /// S4: a MEM fed by a PORT named `ren_in_0` is a ROM.
    #[test]
    fn rom_detected_by_ren_in_0_predecessor() {
        let mut g = RoutingResultGraph::new();
        let mem = g.add_node(tile("m6"));
        let port = g.add_node(RouteNode::new(0, 0, 1, 0, RouteKind::Port { port: "ren_in_0".into() }));
        g.add_edge(port, mem);
        g.update_sources_and_sinks();

        assert!(g.get_roms().contains(&mem));
        assert!(g.get_mems().contains(&mem));
    }

    /// S6: tile `T` (kernel `k1`) drives `T -> PORT -> SB -> SB -> PORT ->
    /// T'` where `T'` carries kernel `k2`. Forward propagation from `T`
    /// reaches every routing node in the chain before `T'` is ever visited,
    /// so `port0`/`sb1`/`sb2` inherit `k1`. The tile-sink pass then runs for
    /// every tile and overwrites each tile's *immediate* sources with that
    /// tile's own kernel, so `port1` — the one node directly upstream of
    /// `T'` — is relabeled to `k2`, while the SB nodes further upstream are
    /// untouched by that pass (only PORT/REG nodes ever sit immediately
    /// upstream of a tile).
    #[test]
    fn kernel_propagation_forward_walk_then_tile_sink_override() {
        let mut g = RoutingResultGraph::new();
        let t = g.add_node(TileNode::new(0, 0, "p1".to_string(), Some("k1".to_string())));
        let t2 = g.add_node(TileNode::new(1, 0, "p2".to_string(), Some("k2".to_string())));
        let port0 = g.add_node(RouteNode::new(0, 0, 1, 0, RouteKind::Port { port: "out".into() }));
        let sb1 = g.add_node(RouteNode::new(0, 0, 1, 0, RouteKind::Sb { track: 0, side: 1, io: 1 }));
        let sb2 = g.add_node(RouteNode::new(1, 0, 1, 0, RouteKind::Sb { track: 0, side: 3, io: 0 }));
        let port1 = g.add_node(RouteNode::new(1, 0, 1, 0, RouteKind::Port { port: "in".into() }));

        g.add_edge(t, port0);
        g.add_edge(port0, sb1);
        g.add_edge(sb1, sb2);
        g.add_edge(sb2, port1);
        g.add_edge(port1, t2);
        g.update_sources_and_sinks();

        g.update_edge_kernels();

        assert_eq!(g.get(port0).kernel(), Some("k1"));
        assert_eq!(g.get(sb1).kernel(), Some("k1"));
        assert_eq!(g.get(sb2).kernel(), Some("k1"));
        assert_eq!(g.get(port1).kernel(), Some("k2"));
    }
}

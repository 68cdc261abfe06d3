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

use std::fs;
use std::path::Path;

use clap::Parser;

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

use crate::construct::{construct_graph, IdToName, Netlist, Placement, Routes};
use crate::exporter::{Exporter, MultiFileExporter};
use crate::log::*;
use crate::sta::{sta, DelayTable};

#[derive(Parser, Debug)]
#[clap(
    author = "Antmicro",
    version = "0.1.0",
    about = "Static timing analysis over a placed-and-routed CGRA design",
    long_about = None
)]
struct Args {
    #[clap(help = "Placement JSON file (blk_id -> [x, y])")]
    placement: String,
    #[clap(help = "Netlist JSON file (net_id -> [[blk_id, port], ...])")]
    netlist: String,
    #[clap(help = "Routing JSON file (net_id -> [[segment, ...], ...])")]
    routing: String,
    #[clap(help = "id_to_name JSON file (blk_id -> display name, kernel$instance)")]
    id_to_name: String,
    #[clap(help = "Delay table JSON file (glb/sb_horiz/sb_up/sb_down/pe/mem, in ps)")]
    delay_table: String,
    #[clap(
        long,
        help = "Treat PEs as pipelined (pe_latency=1); overrides the PIPELINED env var"
    )]
    pipelined: bool,
    #[clap(long, help = "Write the constructed graph as Graphviz .dot text to this path")]
    dot: Option<String>,
}

fn pe_latency(args: &Args) -> i64 {
    if args.pipelined {
        return 1;
    }
    match std::env::var("PIPELINED") {
        Ok(v) if v == "1" => 1,
        _ => 0,
    }
}

fn read_json<T: for<'de> serde::Deserialize<'de>>(path: &str) -> T {
    let data = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("couldn't read {}: {}", path, e));
    serde_json::from_str(&data).unwrap_or_else(|e| panic!("couldn't parse {}: {}", path, e))
}

fn main() {
    let args = Args::parse();

    let placement: Placement = read_json(&args.placement);
    let netlist: Netlist = read_json(&args.netlist);
    let routing: Routes = read_json(&args.routing);
    let delays: DelayTable = read_json(&args.delay_table);
    let id_to_name: IdToName = read_json(&args.id_to_name);

    let pe_latency = pe_latency(&args);
    dbg_log!(DBG_INFO, "pe_latency = {}", pe_latency);

    let graph = construct_graph(&placement, &routing, &id_to_name, &netlist, pe_latency)
        .expect("graph construction failed");

    if let Some(dot_path) = &args.dot {
        let path = Path::new(dot_path);
        let prefix = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_stem().expect("--dot path must name a file").to_string_lossy().into_owned();

        let mut exporter =
            MultiFileExporter::new(&Some(vec![":all".to_string()]), prefix.to_string_lossy().into_owned(), ".dot".to_string());
        exporter.ignore_or_export(&name, || graph.to_dot()).expect("failed to write .dot file");
    }

    let report = sta(&graph, &delays).expect("static timing analysis failed");
    println!("{}", report);
}

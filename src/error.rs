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

use std::fmt;

/// Errors surfaced by graph construction and static timing analysis.
///
/// No variant here is recoverable by the crate itself; every fallible
/// operation in construction and STA returns `Result<_, StaError>` and lets
/// the caller decide. Cycle breaking is the one exception: it mutates the
/// graph to restore acyclicity and never produces an error.
#[derive(Debug, Clone)]
pub enum StaError {
    /// A routing segment's leading kind tag was not one of `SB`, `PORT`,
    /// `REG`, `RMUX`.
    MalformedSegment(String),
    /// A PORT or REG segment referenced a grid cell that holds no tile
    /// exposing the expected port (or, for REG, no register tile at all).
    MissingTile { x: i32, y: i32, detail: String },
    /// During STA, a tile's predecessor in the graph was neither a PORT
    /// nor a REG node, which can only happen if graph construction is
    /// broken (tiles are only ever reachable through PORT/REG segments).
    InvalidPredecessor(String),
    /// A delay-table key required by STA was absent.
    MissingDelayKey(String),
}

impl fmt::Display for StaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaError::MalformedSegment(kind) =>
                write!(f, "unrecognized routing segment kind: {:?}", kind),
            StaError::MissingTile { x, y, detail } =>
                write!(f, "no tile at ({}, {}) matching {}", x, y, detail),
            StaError::InvalidPredecessor(detail) =>
                write!(f, "tile fed by non-port/non-reg predecessor: {}", detail),
            StaError::MissingDelayKey(key) =>
                write!(f, "delay table is missing key {:?}", key),
        }
    }
}

impl std::error::Error for StaError {}

pub type StaResult<T> = Result<T, StaError>;

// Copyright 2026 The Skitter Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The placement service.
//!
//! Picks a node for a new worker from the registry of connected worker
//! nodes. The default policy round-robins across the advertised worker
//! cores of the cluster; `on`, `with` and `avoid` constrain the choice.

use std::sync::atomic::{AtomicUsize, Ordering};

use skitter::{NodeName, Placement, PlacementError};

use crate::stores::NodeRegistry;

#[derive(Debug)]
pub(crate) struct Placer {
    registry: NodeRegistry,
    local: NodeName,
    cursor: AtomicUsize,
}

impl Placer {
    pub fn new(registry: NodeRegistry, local: NodeName) -> Self {
        Placer {
            registry,
            local,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Picks a node satisfying the placement constraint.
    pub fn pick(&self, placement: &Placement) -> Result<NodeName, PlacementError> {
        match placement {
            Placement::On(node) => {
                if self.is_up(node) {
                    Ok(node.clone())
                } else {
                    Err(PlacementError::NodeUnreachable { node: node.clone() })
                }
            }
            Placement::With(worker) => {
                if self.is_up(&worker.node) {
                    Ok(worker.node.clone())
                } else {
                    Err(PlacementError::NodeUnreachable {
                        node: worker.node.clone(),
                    })
                }
            }
            Placement::Avoid(worker) => {
                let cores: Vec<_> = self
                    .registry
                    .cores()
                    .into_iter()
                    .filter(|node| *node != worker.node)
                    .collect();
                if cores.is_empty() {
                    // No alternative exists; fall back to the same node.
                    if self.is_up(&worker.node) {
                        Ok(worker.node.clone())
                    } else {
                        Err(PlacementError::NodeUnreachable {
                            node: worker.node.clone(),
                        })
                    }
                } else {
                    Ok(self.round_robin(&cores))
                }
            }
            Placement::Any => {
                let cores = self.registry.cores();
                if cores.is_empty() {
                    Err(PlacementError::NoWorkerNodes)
                } else {
                    Ok(self.round_robin(&cores))
                }
            }
        }
    }

    fn round_robin(&self, cores: &[NodeName]) -> NodeName {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % cores.len();
        cores[index].clone()
    }

    fn is_up(&self, node: &NodeName) -> bool {
        *node == self.local || self.registry.contains(node)
    }
}

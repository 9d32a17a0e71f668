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

//! Per-workflow supervisors.
//!
//! One supervisor runs on every node that owns workers for a deployment.
//! Workers report callback failures here; recurring failures beyond the
//! configured threshold tear the workflow down.

use futures::{channel::mpsc, StreamExt};

use skitter::DeploymentId;

use crate::runtime::RuntimeHandle;

#[derive(Debug)]
pub(crate) enum SupervisorEvent {
    /// A worker crashed inside a callback and was restarted.
    CallbackFailure { worker: u64 },
    /// A worker hit an unrecoverable definition problem.
    Fatal { reason: String },
}

/// Handle workers use to report to their deployment's supervisor.
#[derive(Debug, Clone)]
pub(crate) struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl SupervisorHandle {
    pub fn callback_failure(&self, worker: u64) {
        self.tx
            .unbounded_send(SupervisorEvent::CallbackFailure { worker })
            .ok();
    }

    pub fn fatal(&self, reason: String) {
        self.tx
            .unbounded_send(SupervisorEvent::Fatal { reason })
            .ok();
    }
}

/// Starts the supervisor task for a deployment on this node.
pub(crate) fn spawn(
    handle: RuntimeHandle,
    deployment: DeploymentId,
    threshold: u32,
) -> SupervisorHandle {
    let (tx, mut rx) = mpsc::unbounded();
    tokio::spawn(async move {
        let mut failures = 0u32;
        while let Some(event) = rx.next().await {
            match event {
                SupervisorEvent::CallbackFailure { worker } => {
                    failures += 1;
                    log::warn!(
                        "Worker {} of {} was restarted ({}/{} failures)",
                        worker,
                        deployment,
                        failures,
                        threshold
                    );
                    if failures >= threshold {
                        log::error!(
                            "{} exceeded its failure threshold; tearing down",
                            deployment
                        );
                        handle.teardown_deployment(deployment);
                        break;
                    }
                }
                SupervisorEvent::Fatal { reason } => {
                    log::error!("{} hit a fatal error: {}; tearing down", deployment, reason);
                    handle.teardown_deployment(deployment);
                    break;
                }
            }
        }
    });
    SupervisorHandle { tx }
}

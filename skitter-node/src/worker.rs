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

//! Worker actors.
//!
//! A worker is a single tokio task draining a mailbox: messages are
//! processed one at a time against the worker's state, which no other task
//! may touch. A crash inside a callback resets the worker to its initial
//! state and reports the failure to the deployment's supervisor; an
//! invocation-lifetime worker is collected after its single `process` call.

use futures::{channel::mpsc, StreamExt};

use skitter::{InstanceRef, Invocation, Lifetime, ProcessResult, Value};

use crate::{router, runtime::RuntimeHandle, supervisor::SupervisorHandle};

/// Commands a worker mailbox accepts.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Deliver a message under an invocation.
    Deliver {
        message: Value,
        invocation: Invocation,
    },
    /// Stop the worker; pending messages behind this command are discarded.
    Stop,
}

/// Registered mailbox of a live worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    pub tx: mpsc::UnboundedSender<WorkerCommand>,
    pub instance: InstanceRef,
}

/// Everything a worker task needs to run.
pub(crate) struct WorkerSeed {
    pub id: u64,
    pub instance: InstanceRef,
    pub tag: String,
    pub lifetime: Lifetime,
    pub state: Value,
    pub rx: mpsc::UnboundedReceiver<WorkerCommand>,
    pub handle: RuntimeHandle,
    pub supervisor: SupervisorHandle,
}

pub(crate) async fn worker_task(seed: WorkerSeed) {
    let WorkerSeed {
        id,
        instance,
        tag,
        lifetime,
        state,
        mut rx,
        handle,
        supervisor,
    } = seed;
    let initial = state.clone();
    let mut state = state;

    while let Some(command) = rx.next().await {
        match command {
            WorkerCommand::Stop => break,
            WorkerCommand::Deliver {
                message,
                invocation,
            } => {
                let outcome = match handle.instance_context(instance) {
                    Some(icx) => {
                        let context = icx.context(&handle, invocation, instance);
                        icx.strategy.process(&context, message, &state, &tag)
                    }
                    // The deployment is gone or not yet known here; the
                    // message is discarded.
                    None => {
                        log::debug!(
                            "Dropping message for worker {}: unknown instance {}",
                            id,
                            instance
                        );
                        continue;
                    }
                };

                match outcome {
                    Ok(result) => {
                        if let Err(err) = result.check_ports() {
                            log::error!("Worker {} produced an invalid result: {}", id, err);
                            supervisor.fatal(err.to_string());
                            break;
                        }
                        let ProcessResult {
                            state: new_state,
                            emit,
                            emit_invocation,
                        } = result;
                        if let Some(new_state) = new_state {
                            state = new_state;
                        }
                        router::route(&handle, instance, invocation, emit, emit_invocation);
                    }
                    Err(err) => {
                        log::warn!(
                            "Worker {} of {} failed: {}; restarting with initial state",
                            id,
                            instance,
                            err
                        );
                        state = initial.clone();
                        supervisor.callback_failure(id);
                    }
                }

                if lifetime == Lifetime::Invocation {
                    break;
                }
            }
        }
    }

    handle.remove_worker(id);
}

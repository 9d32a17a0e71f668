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

//! Emit routing.
//!
//! Translates an instance's emissions into `deliver` calls on the strategies
//! of the destinations listed in the replicated link table: one call per
//! (element, destination) pair, never batched across destinations. Ports
//! without a link table entry are sinks and their elements are discarded.
//! A failing `deliver` is logged and dropped; this is the only place errors
//! are swallowed.

use std::collections::BTreeMap;

use skitter::{EmitMap, InstanceRef, Invocation, Value};

use crate::{runtime::RuntimeHandle, stores::LinkTable};

/// Routes the emissions of one `process` result.
pub(crate) fn route(
    handle: &RuntimeHandle,
    source: InstanceRef,
    invocation: Invocation,
    emit: EmitMap,
    emit_invocation: BTreeMap<String, Vec<(Value, Invocation)>>,
) {
    let table = match handle.links(source.deployment) {
        Some(table) => table,
        // The deployment was torn down while the message was in flight.
        None => return,
    };
    for (port, values) in emit {
        let items = values.into_iter().map(|value| (value, invocation));
        deliver_port(handle, &table, source, &port, items);
    }
    for (port, pairs) in emit_invocation {
        deliver_port(handle, &table, source, &port, pairs.into_iter());
    }
}

fn deliver_port(
    handle: &RuntimeHandle,
    table: &LinkTable,
    source: InstanceRef,
    port: &str,
    items: impl Iterator<Item = (Value, Invocation)>,
) {
    let dests = match table.destinations(source.index, port) {
        Some(dests) if !dests.is_empty() => dests,
        // Sink behavior: an unlinked out port discards its elements.
        _ => return,
    };
    for (value, invocation) in items {
        for dest in dests {
            let instance = InstanceRef {
                deployment: source.deployment,
                index: dest.node,
            };
            deliver(handle, instance, value.clone(), dest.port, invocation);
        }
    }
}

/// Hands one record to the strategy of a destination instance.
pub(crate) fn deliver(
    handle: &RuntimeHandle,
    instance: InstanceRef,
    record: Value,
    port: usize,
    invocation: Invocation,
) {
    let icx = match handle.instance_context(instance) {
        Some(icx) => icx,
        None => {
            log::warn!("Dropping record for unknown instance {}", instance);
            return;
        }
    };
    let context = icx.context(handle, invocation, instance);
    if let Err(err) = icx.strategy.deliver(&context, record, port) {
        log::warn!("Dropping record for {}: {}", instance, err);
    }
}

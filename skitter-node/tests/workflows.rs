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

//! End-to-end workflow scenarios on a single local node.

use pretty_assertions::assert_eq;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use skitter::{
    operation::OperationRegistry, Callback, CallbackInfo, Context, EmitMap, Invocation, Lifetime,
    Operation, Placement, ProcessResult, SendError, Source, Strategy, StrategyError,
    StrategyServices, Target, Value, Workflow, WorkerRef,
};
use skitter_node::{strategies, Node, NodeConfig, RuntimeHandle};

type Sink = Arc<Mutex<Vec<Value>>>;

fn local_node(operations: OperationRegistry, cores: usize) -> RuntimeHandle {
    local_node_with(operations, strategies::builtin(), cores)
}

fn local_node_with(
    operations: OperationRegistry,
    strategies: skitter::StrategyRegistry,
    cores: usize,
) -> RuntimeHandle {
    let mut config = NodeConfig::local();
    config.cores = cores;
    Node::new(config, operations, strategies).unwrap().handle()
}

fn add(registry: &mut OperationRegistry, operation: Operation) -> Arc<Operation> {
    let name = operation.name().to_owned();
    registry.register(operation).unwrap();
    registry.get(&name).unwrap()
}

async fn wait_for<T>(timeout_ms: u64, condition: impl Fn() -> Option<T>) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Some(value) = condition() {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {} ms",
            timeout_ms
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn drain(sink: &Sink, expected: usize) -> Vec<Value> {
    wait_for(5_000, || {
        let guard = sink.lock().unwrap();
        if guard.len() >= expected {
            Some(guard.clone())
        } else {
            None
        }
    })
    .await
}

fn probe_operation(name: &str, sink: Sink) -> Operation {
    Operation::builder(name)
        .in_port("value")
        .strategy("serial")
        .callback(
            "react",
            Callback::new(1, CallbackInfo::pure(), move |_, args| {
                sink.lock().unwrap().push(args[0].clone());
                Ok(Value::Nil)
            }),
        )
        .build()
        .unwrap()
}

fn average_operation() -> Operation {
    Operation::builder("average")
        .in_port("value")
        .out_port("current")
        .strategy("serial")
        .initial_state(Value::record(vec![
            ("total", Value::Int(0)),
            ("count", Value::Int(0)),
        ]))
        .callback(
            "react",
            Callback::new(1, CallbackInfo::stateful_emitter(), |ctx, args| {
                let total =
                    ctx.read_field("total")?.as_int().unwrap_or(0) + args[0].as_int().unwrap_or(0);
                let count = ctx.read_field("count")?.as_int().unwrap_or(0) + 1;
                ctx.write_field("total", Value::Int(total))?;
                ctx.write_field("count", Value::Int(count))?;
                ctx.emit("current", vec![Value::Float(total as f64 / count as f64)])?;
                Ok(Value::Nil)
            }),
        )
        .build()
        .unwrap()
}

// E1: running average over [10, 20, 30] emits [10.0, 15.0, 20.0] and ends
// with state {total: 60, count: 3}.
#[tokio::test(flavor = "multi_thread")]
async fn average_workflow_emits_running_mean() {
    let sink: Sink = Default::default();
    let mut operations = OperationRegistry::new();
    let average = add(&mut operations, average_operation());
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("averages")
        .in_port("in")
        .operation("avg", average, Value::Nil)
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("avg", "value"))
        .unwrap()
        .link(Source::node("avg", "current"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    for value in vec![10, 20, 30] {
        manager.inject("in", Value::Int(value)).unwrap();
    }

    let values = drain(&sink, 3).await;
    assert_eq!(
        values,
        vec![Value::Float(10.0), Value::Float(15.0), Value::Float(20.0)]
    );
    manager.stop();
}

// E2: the print operation prefixes records with its configured label and
// passes them through unchanged.
#[tokio::test(flavor = "multi_thread")]
async fn print_workflow_labels_and_forwards() {
    let lines: Arc<Mutex<Vec<String>>> = Default::default();
    let sink: Sink = Default::default();

    let print_lines = lines.clone();
    let print = Operation::builder("print")
        .in_port("_")
        .out_port("_")
        .strategy("serial")
        .callback(
            "conf",
            Callback::new(1, CallbackInfo::pure(), |_, args| Ok(args[0].clone())),
        )
        .callback(
            "react",
            Callback::new(
                1,
                CallbackInfo {
                    emits: true,
                    ..CallbackInfo::default()
                },
                move |ctx, args| {
                    let label = ctx.config().as_text().unwrap_or("").to_owned();
                    let line = format!("{}: {}", label, args[0]);
                    println!("{}", line);
                    print_lines.lock().unwrap().push(line);
                    ctx.emit("_", vec![args[0].clone()])?;
                    Ok(Value::Nil)
                },
            ),
        )
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let print = add(&mut operations, print);
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("printer")
        .in_port("in")
        .operation("print", print, Value::from("L"))
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("print", "_"))
        .unwrap()
        .link(Source::node("print", "_"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    manager.inject("in", Value::from("a")).unwrap();
    manager.inject("in", Value::from("b")).unwrap();

    let forwarded = drain(&sink, 2).await;
    assert_eq!(forwarded, vec![Value::from("a"), Value::from("b")]);
    assert_eq!(
        *lines.lock().unwrap(),
        vec![r#"L: "a""#.to_owned(), r#"L: "b""#.to_owned()]
    );
    manager.stop();
}

// E3: keyed hashing sends equal keys to the same aggregator; the partial
// sums for keys 1, 5, 9 are 1, 6, 15 in that order.
#[tokio::test(flavor = "multi_thread")]
async fn keyed_hashing_pins_keys_to_aggregators() {
    let sink: Sink = Default::default();
    let sums = Operation::builder("sums")
        .in_port("value")
        .out_port("sum")
        .strategy("keyed_hash")
        .initial_state(Value::Int(0))
        .callback(
            "key",
            Callback::new(1, CallbackInfo::pure(), |_, args| {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) % 4))
            }),
        )
        .callback(
            "react",
            Callback::new(1, CallbackInfo::stateful_emitter(), |ctx, args| {
                let sum = ctx.read_state().as_int().unwrap_or(0) + args[0].as_int().unwrap_or(0);
                ctx.emit("sum", vec![Value::Int(sum)])?;
                ctx.write_state(Value::Int(sum));
                Ok(Value::Nil)
            }),
        )
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let sums = add(&mut operations, sums);
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 4);

    let workflow = Workflow::builder("partition")
        .in_port("in")
        .operation("sums", sums, Value::Nil)
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("sums", "value"))
        .unwrap()
        .link(Source::node("sums", "sum"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    for value in vec![1, 5, 9, 2, 6, 3] {
        manager.inject("in", Value::Int(value)).unwrap();
    }

    let values = drain(&sink, 6).await;
    let sums: Vec<i64> = values.iter().filter_map(Value::as_int).collect();
    let mut sorted = sums.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 2, 3, 6, 8, 15]);

    // Keys 1, 5 and 9 share an aggregator, so their partial sums appear in
    // order.
    let position = |x: i64| sums.iter().position(|v| *v == x).unwrap();
    assert!(position(1) < position(6));
    assert!(position(6) < position(15));
    manager.stop();
}

// E4: the matcher fires an arity-2 operation once both ports of an
// invocation arrived, in completion order.
#[tokio::test(flavor = "multi_thread")]
async fn matcher_workflow_fires_per_invocation() {
    let sink: Sink = Default::default();
    let adder = Operation::builder("adder")
        .in_port("a")
        .in_port("b")
        .out_port("sum")
        .strategy("zip_ports")
        .callback(
            "react",
            Callback::new(
                2,
                CallbackInfo {
                    emits: true,
                    ..CallbackInfo::default()
                },
                |ctx, args| {
                    let sum = args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0);
                    ctx.emit("sum", vec![Value::Int(sum)])?;
                    Ok(Value::Int(sum))
                },
            ),
        )
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let adder = add(&mut operations, adder);
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("zipper")
        .in_port("a")
        .in_port("b")
        .operation("adder", adder, Value::Nil)
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("a"), Target::node("adder", "a"))
        .unwrap()
        .link(Source::workflow_in("b"), Target::node("adder", "b"))
        .unwrap()
        .link(Source::node("adder", "sum"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    manager
        .inject_with("a", Value::Int(2), Invocation::Id(1))
        .unwrap();
    manager
        .inject_with("b", Value::Int(10), Invocation::Id(2))
        .unwrap();
    manager
        .inject_with("b", Value::Int(3), Invocation::Id(1))
        .unwrap();
    manager
        .inject_with("a", Value::Int(7), Invocation::Id(2))
        .unwrap();

    let values = drain(&sink, 2).await;
    assert_eq!(values, vec![Value::Int(5), Value::Int(17)]);
    manager.stop();
}

// Property 4: every element reaches every destination exactly once, with no
// cross-destination batching.
#[tokio::test(flavor = "multi_thread")]
async fn router_delivers_once_per_element_and_destination() {
    let left_sink: Sink = Default::default();
    let right_sink: Sink = Default::default();

    let fanout = Operation::builder("fanout")
        .in_port("value")
        .out_port("value")
        .strategy("serial")
        .callback(
            "react",
            Callback::new(
                1,
                CallbackInfo {
                    emits: true,
                    ..CallbackInfo::default()
                },
                |ctx, args| {
                    let base = args[0].as_int().unwrap_or(0);
                    ctx.emit(
                        "value",
                        vec![
                            Value::Int(base),
                            Value::Int(base + 1),
                            Value::Int(base + 2),
                        ],
                    )?;
                    Ok(Value::Nil)
                },
            ),
        )
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let fanout = add(&mut operations, fanout);
    let left = add(&mut operations, probe_operation("left", left_sink.clone()));
    let right = add(&mut operations, probe_operation("right", right_sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("fanout")
        .in_port("in")
        .operation("fanout", fanout, Value::Nil)
        .unwrap()
        .operation("left", left, Value::Nil)
        .unwrap()
        .operation("right", right, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("fanout", "value"))
        .unwrap()
        .link(Source::node("fanout", "value"), Target::node("left", "value"))
        .unwrap()
        .link(Source::node("fanout", "value"), Target::node("right", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    manager.inject("in", Value::Int(1)).unwrap();

    let expected = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
    assert_eq!(drain(&left_sink, 3).await, expected);
    assert_eq!(drain(&right_sink, 3).await, expected);
    manager.stop();
}

// Property 5: messages from one sender are processed in order.
#[tokio::test(flavor = "multi_thread")]
async fn per_worker_ordering_is_preserved() {
    let sink: Sink = Default::default();
    let relay = Operation::builder("relay")
        .in_port("value")
        .out_port("value")
        .strategy("serial")
        .callback(
            "react",
            Callback::new(
                1,
                CallbackInfo {
                    emits: true,
                    ..CallbackInfo::default()
                },
                |ctx, args| {
                    ctx.emit("value", vec![args[0].clone()])?;
                    Ok(Value::Nil)
                },
            ),
        )
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let relay = add(&mut operations, relay);
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("ordered")
        .in_port("in")
        .operation("relay", relay, Value::Nil)
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("relay", "value"))
        .unwrap()
        .link(Source::node("relay", "value"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    let expected: Vec<Value> = (0..50).map(Value::Int).collect();
    for value in &expected {
        manager.inject("in", value.clone()).unwrap();
    }
    assert_eq!(drain(&sink, 50).await, expected);
    manager.stop();
}

/// Test strategy for worker lifetimes: its deployment worker creates an
/// invocation-lifetime child per message and reports the child's address
/// downstream.
#[derive(Debug)]
struct SpawnOnce;

impl Strategy for SpawnOnce {
    fn name(&self) -> &str {
        "spawn_once"
    }

    fn deploy(&self, context: &Context<'_>, _args: &Value) -> Result<Value, StrategyError> {
        let worker = context.create_remote(Value::Nil, "parent", Placement::Any)?;
        Ok(Value::record(vec![("worker", worker.to_value())]))
    }

    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        _port: usize,
    ) -> Result<(), StrategyError> {
        let worker = context
            .deployment_data
            .field("worker")
            .and_then(WorkerRef::from_value)
            .expect("deployment data carries the parent worker");
        context.send(&worker, record)?;
        Ok(())
    }

    fn process(
        &self,
        context: &Context<'_>,
        message: Value,
        _state: &Value,
        tag: &str,
    ) -> Result<ProcessResult, StrategyError> {
        if tag != "parent" {
            return Ok(ProcessResult::unchanged());
        }
        let child = context.create_worker(
            Value::Nil,
            "child",
            Lifetime::Invocation,
            Placement::On(context.local_node()),
        )?;
        context.send(&child, message)?;
        let mut emit = EmitMap::new();
        emit.insert("child".to_owned(), vec![child.to_value()]);
        Ok(ProcessResult::unchanged().with_emit(emit))
    }
}

// E6: an invocation-lifetime worker is collected after its single process;
// later sends report it as stopped.
#[tokio::test(flavor = "multi_thread")]
async fn invocation_workers_are_collected() {
    let sink: Sink = Default::default();
    let spawner = Operation::builder("spawner")
        .in_port("trigger")
        .out_port("child")
        .strategy("spawn_once")
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let spawner = add(&mut operations, spawner);
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));

    let mut registry = strategies::builtin();
    registry.register(Arc::new(SpawnOnce)).unwrap();
    let handle = local_node_with(operations, registry, 1);

    let workflow = Workflow::builder("lifetimes")
        .in_port("in")
        .operation("spawner", spawner, Value::Nil)
        .unwrap()
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("spawner", "trigger"))
        .unwrap()
        .link(Source::node("spawner", "child"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    manager.inject("in", Value::Int(1)).unwrap();

    let values = drain(&sink, 1).await;
    let child = WorkerRef::from_value(&values[0]).unwrap();
    assert_eq!(&child.node, handle.node_name());

    // The child processed its single message and is collected; sending to
    // it afterwards reports it as stopped.
    wait_for(5_000, || {
        match handle.send(&child, Value::Nil, Invocation::External) {
            Err(SendError::Stopped { .. }) => Some(()),
            _ => None,
        }
    })
    .await;
    manager.stop();
}

/// Test strategy for `emit_invocation`: its worker re-emits every record
/// twice, each element stamped with a freshly minted invocation.
#[derive(Debug)]
struct FanInvocations;

impl Strategy for FanInvocations {
    fn name(&self) -> &str {
        "fan_invocations"
    }

    fn deploy(&self, context: &Context<'_>, _args: &Value) -> Result<Value, StrategyError> {
        let worker = context.create_remote(Value::Nil, "source", Placement::Any)?;
        Ok(Value::record(vec![("worker", worker.to_value())]))
    }

    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        _port: usize,
    ) -> Result<(), StrategyError> {
        let worker = context
            .deployment_data
            .field("worker")
            .and_then(WorkerRef::from_value)
            .expect("deployment data carries the source worker");
        context.send(&worker, record)?;
        Ok(())
    }

    fn process(
        &self,
        context: &Context<'_>,
        message: Value,
        _state: &Value,
        _tag: &str,
    ) -> Result<ProcessResult, StrategyError> {
        let first = context.fresh_invocation();
        let second = context.fresh_invocation();
        Ok(ProcessResult::unchanged().with_emit_invocation(
            "out",
            vec![(message.clone(), first), (message, second)],
        ))
    }
}

/// Test strategy acting as a pure sink: `deliver` records the invocation
/// each element arrived under.
#[derive(Debug)]
struct RecordingSink {
    seen: Arc<Mutex<Vec<(Invocation, Value)>>>,
}

impl Strategy for RecordingSink {
    fn name(&self) -> &str {
        "recording_sink"
    }

    fn deploy(&self, _context: &Context<'_>, _args: &Value) -> Result<Value, StrategyError> {
        Ok(Value::Nil)
    }

    fn deliver(
        &self,
        context: &Context<'_>,
        record: Value,
        _port: usize,
    ) -> Result<(), StrategyError> {
        self.seen.lock().unwrap().push((context.invocation, record));
        Ok(())
    }

    fn process(
        &self,
        _context: &Context<'_>,
        _message: Value,
        _state: &Value,
        _tag: &str,
    ) -> Result<ProcessResult, StrategyError> {
        Ok(ProcessResult::unchanged())
    }
}

// Elements emitted through `emit_invocation` travel under their own fresh
// invocations rather than the processed message's.
#[tokio::test(flavor = "multi_thread")]
async fn emit_invocation_stamps_each_element() {
    let seen: Arc<Mutex<Vec<(Invocation, Value)>>> = Default::default();

    let source = Operation::builder("source")
        .in_port("trigger")
        .out_port("out")
        .strategy("fan_invocations")
        .build()
        .unwrap();
    let terminal = Operation::builder("terminal")
        .in_port("value")
        .strategy("recording_sink")
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let source = add(&mut operations, source);
    let terminal = add(&mut operations, terminal);

    let mut registry = strategies::builtin();
    registry.register(Arc::new(FanInvocations)).unwrap();
    registry
        .register(Arc::new(RecordingSink { seen: seen.clone() }))
        .unwrap();
    let handle = local_node_with(operations, registry, 1);

    let workflow = Workflow::builder("stamped")
        .in_port("in")
        .operation("source", source, Value::Nil)
        .unwrap()
        .operation("terminal", terminal, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("source", "trigger"))
        .unwrap()
        .link(Source::node("source", "out"), Target::node("terminal", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    manager.inject("in", Value::Int(7)).unwrap();

    let seen = wait_for(5_000, || {
        let guard = seen.lock().unwrap();
        if guard.len() >= 2 {
            Some(guard.clone())
        } else {
            None
        }
    })
    .await;

    assert_eq!(seen.len(), 2);
    for (invocation, value) in &seen {
        assert_eq!(*value, Value::Int(7));
        assert!(matches!(invocation, Invocation::Id(_)));
    }
    assert_ne!(seen[0].0, seen[1].0);
    manager.stop();
}

// Deploying an operation missing a strategy-required callback fails the
// deployment.
#[tokio::test(flavor = "multi_thread")]
async fn deploy_rejects_missing_callbacks() {
    let silent = Operation::builder("silent")
        .in_port("value")
        .strategy("serial")
        .build()
        .unwrap();

    let mut operations = OperationRegistry::new();
    let silent = add(&mut operations, silent);
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("broken")
        .operation("silent", silent, Value::Nil)
        .unwrap()
        .build();

    let err = handle.deploy(&workflow).unwrap_err();
    assert_eq!(
        err,
        StrategyError::MissingCallback {
            operation: "silent".to_owned(),
            name: "react".to_owned(),
            arity: 1
        }
    );
}

// Stopping the manager unpublishes the deployment.
#[tokio::test(flavor = "multi_thread")]
async fn manager_stop_tears_down() {
    let sink: Sink = Default::default();
    let mut operations = OperationRegistry::new();
    let probe = add(&mut operations, probe_operation("probe", sink.clone()));
    let handle = local_node(operations, 1);

    let workflow = Workflow::builder("short-lived")
        .in_port("in")
        .operation("probe", probe, Value::Nil)
        .unwrap()
        .link(Source::workflow_in("in"), Target::node("probe", "value"))
        .unwrap()
        .build();

    let manager = handle.deploy(&workflow).unwrap();
    assert!(manager.is_alive());
    let deployment = manager.deployment();
    manager.stop();

    let manager = handle.deploy(&workflow).unwrap();
    assert_ne!(manager.deployment(), deployment);
    manager.stop();
}

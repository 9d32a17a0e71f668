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

//! Workflows and the flattener.
//!
//! A workflow is a directed multigraph of operation nodes and nested
//! workflow nodes, linked port to port. Links are validated while the
//! workflow is built; flattening expands nested workflows, assigns dense
//! indices and resolves every destination to `(node index, in port index)`.
//! The flattened form is the canonical runtime representation — after
//! flattening only operation nodes remain.

use serde_derive::{Deserialize, Serialize};

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{error::DefinitionError, operation::Operation, value::Value};

/// Source endpoint of a link: an out port of a node, or one of the
/// workflow's own in ports.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Out port `port` of node `node`.
    Node { node: String, port: String },
    /// In port `port` of the workflow itself.
    WorkflowIn { port: String },
}

impl Source {
    /// Out port of a node.
    pub fn node(node: impl Into<String>, port: impl Into<String>) -> Self {
        Source::Node {
            node: node.into(),
            port: port.into(),
        }
    }

    /// In port of the workflow itself.
    pub fn workflow_in(port: impl Into<String>) -> Self {
        Source::WorkflowIn { port: port.into() }
    }
}

/// Target endpoint of a link: an in port of a node, or one of the
/// workflow's own out ports.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// In port `port` of node `node`.
    Node { node: String, port: String },
    /// Out port `port` of the workflow itself.
    WorkflowOut { port: String },
}

impl Target {
    /// In port of a node.
    pub fn node(node: impl Into<String>, port: impl Into<String>) -> Self {
        Target::Node {
            node: node.into(),
            port: port.into(),
        }
    }

    /// Out port of the workflow itself.
    pub fn workflow_out(port: impl Into<String>) -> Self {
        Target::WorkflowOut { port: port.into() }
    }
}

#[derive(Debug, Clone)]
struct Link {
    source: Source,
    target: Target,
}

/// A node of a workflow.
#[derive(Debug, Clone)]
enum WorkflowNode {
    Operation {
        operation: Arc<Operation>,
        strategy: Option<String>,
        args: Value,
    },
    Nested {
        workflow: Workflow,
    },
}

/// A directed multigraph of operation nodes linked port to port; may nest
/// other workflows.
#[derive(Debug, Clone)]
pub struct Workflow {
    name: String,
    in_ports: Vec<String>,
    out_ports: Vec<String>,
    nodes: Vec<(String, WorkflowNode)>,
    links: Vec<Link>,
}

impl Workflow {
    /// Starts building a workflow with the given name.
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder {
            workflow: Workflow {
                name: name.into(),
                in_ports: Vec::new(),
                out_ports: Vec::new(),
                nodes: Vec::new(),
                links: Vec::new(),
            },
        }
    }

    /// Name of the workflow.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// In ports of the workflow itself.
    pub fn in_ports(&self) -> &[String] {
        &self.in_ports
    }

    /// Out ports of the workflow itself.
    pub fn out_ports(&self) -> &[String] {
        &self.out_ports
    }

    /// Expands nested workflows, assigns dense indices and resolves every
    /// link destination to `(node index, in port index)`.
    pub fn flatten(&self) -> Result<FlattenedWorkflow, DefinitionError> {
        let mut nodes = Vec::new();
        let boundary = self.flatten_into(String::new(), &mut nodes)?;
        Ok(FlattenedWorkflow {
            name: self.name.clone(),
            nodes,
            in_links: boundary.in_map,
        })
    }

    /// Flattens this workflow into `nodes` and returns the resolved
    /// boundary tables: destinations of the workflow's in ports, and the
    /// internal sources feeding each of its out ports.
    fn flatten_into(
        &self,
        prefix: String,
        nodes: &mut Vec<FlatNode>,
    ) -> Result<FlattenBoundary, DefinitionError> {
        enum Expanded {
            Single(usize),
            Nested(FlattenBoundary),
        }

        let mut expanded: HashMap<String, Expanded> = HashMap::new();
        for (name, node) in &self.nodes {
            match node {
                WorkflowNode::Operation {
                    operation,
                    strategy,
                    args,
                } => {
                    let strategy = strategy
                        .clone()
                        .or_else(|| operation.strategy().map(str::to_owned))
                        .ok_or_else(|| DefinitionError::MissingStrategy {
                            operation: operation.name().to_owned(),
                        })?;
                    let index = nodes.len();
                    nodes.push(FlatNode {
                        name: format!("{}{}", prefix, name),
                        operation: Arc::clone(operation),
                        strategy,
                        args: args.clone(),
                        links: BTreeMap::new(),
                    });
                    expanded.insert(name.clone(), Expanded::Single(index));
                }
                WorkflowNode::Nested { workflow } => {
                    let boundary =
                        workflow.flatten_into(format!("{}{}.", prefix, name), nodes)?;
                    expanded.insert(name.clone(), Expanded::Nested(boundary));
                }
            }
        }

        enum Resolved {
            Dests(Vec<LinkDest>),
            WorkflowOut(String),
        }

        let mut boundary = FlattenBoundary::default();
        for link in &self.links {
            let resolved = match &link.target {
                Target::Node { node, port } => {
                    let expanded_node =
                        expanded
                            .get(node.as_str())
                            .ok_or_else(|| DefinitionError::UnknownNode {
                                node: node.clone(),
                            })?;
                    match expanded_node {
                        Expanded::Single(index) => {
                            let port_index = nodes[*index]
                                .operation
                                .in_port_index(port)
                                .ok_or_else(|| DefinitionError::UnknownPort {
                                    name: node.clone(),
                                    port: port.clone(),
                                })?;
                            Resolved::Dests(vec![LinkDest {
                                node: *index,
                                port: port_index,
                            }])
                        }
                        Expanded::Nested(child) => {
                            Resolved::Dests(child.in_map.get(port).cloned().unwrap_or_default())
                        }
                    }
                }
                Target::WorkflowOut { port } => Resolved::WorkflowOut(port.clone()),
            };

            let sources: Vec<(usize, String)> = match &link.source {
                Source::Node { node, port } => {
                    let expanded_node =
                        expanded
                            .get(node.as_str())
                            .ok_or_else(|| DefinitionError::UnknownNode {
                                node: node.clone(),
                            })?;
                    match expanded_node {
                        Expanded::Single(index) => {
                            if nodes[*index].operation.out_port_index(port).is_none() {
                                return Err(DefinitionError::UnknownPort {
                                    name: node.clone(),
                                    port: port.clone(),
                                });
                            }
                            vec![(*index, port.clone())]
                        }
                        Expanded::Nested(child) => {
                            child.out_stubs.get(port).cloned().unwrap_or_default()
                        }
                    }
                }
                Source::WorkflowIn { port } => {
                    match resolved {
                        Resolved::Dests(dests) => {
                            boundary.in_map.entry(port.clone()).or_default().extend(dests);
                        }
                        Resolved::WorkflowOut(_) => {
                            return Err(DefinitionError::PassThroughLink {
                                workflow: self.name.clone(),
                            });
                        }
                    }
                    continue;
                }
            };

            match resolved {
                Resolved::Dests(dests) => {
                    for (index, out_port) in sources {
                        nodes[index]
                            .links
                            .entry(out_port)
                            .or_default()
                            .extend(dests.iter().cloned());
                    }
                }
                Resolved::WorkflowOut(port) => {
                    boundary.out_stubs.entry(port).or_default().extend(sources);
                }
            }
        }

        Ok(boundary)
    }
}

/// Boundary tables produced while flattening a (nested) workflow.
#[derive(Debug, Default)]
struct FlattenBoundary {
    /// Workflow in port → resolved internal destinations.
    in_map: BTreeMap<String, Vec<LinkDest>>,
    /// Workflow out port → internal `(node index, out port name)` sources.
    out_stubs: BTreeMap<String, Vec<(usize, String)>>,
}

/// Builder for [`Workflow`]; every link is validated as it is added.
#[derive(Debug)]
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    /// Declares an in port of the workflow.
    pub fn in_port(mut self, port: impl Into<String>) -> Self {
        self.workflow.in_ports.push(port.into());
        self
    }

    /// Declares an out port of the workflow.
    pub fn out_port(mut self, port: impl Into<String>) -> Self {
        self.workflow.out_ports.push(port.into());
        self
    }

    /// Adds an operation node using the operation's default strategy.
    pub fn operation(
        self,
        name: impl Into<String>,
        operation: Arc<Operation>,
        args: Value,
    ) -> Result<Self, DefinitionError> {
        self.add_node(
            name.into(),
            WorkflowNode::Operation {
                operation,
                strategy: None,
                args,
            },
        )
    }

    /// Adds an operation node with an explicit strategy.
    pub fn operation_with_strategy(
        self,
        name: impl Into<String>,
        operation: Arc<Operation>,
        strategy: impl Into<String>,
        args: Value,
    ) -> Result<Self, DefinitionError> {
        self.add_node(
            name.into(),
            WorkflowNode::Operation {
                operation,
                strategy: Some(strategy.into()),
                args,
            },
        )
    }

    /// Adds a nested workflow node.
    pub fn nested(
        self,
        name: impl Into<String>,
        workflow: Workflow,
    ) -> Result<Self, DefinitionError> {
        self.add_node(name.into(), WorkflowNode::Nested { workflow })
    }

    fn add_node(mut self, name: String, node: WorkflowNode) -> Result<Self, DefinitionError> {
        if self.workflow.nodes.iter().any(|(n, _)| *n == name) {
            return Err(DefinitionError::DuplicateNode { node: name });
        }
        self.workflow.nodes.push((name, node));
        Ok(self)
    }

    /// Adds a link; unknown nodes or ports fail immediately.
    pub fn link(mut self, source: Source, target: Target) -> Result<Self, DefinitionError> {
        match &source {
            Source::Node { node, port } => {
                let ports = self.node_out_ports(node)?;
                if !ports.contains(port) {
                    return Err(DefinitionError::UnknownPort {
                        name: node.clone(),
                        port: port.clone(),
                    });
                }
            }
            Source::WorkflowIn { port } => {
                if !self.workflow.in_ports.contains(port) {
                    return Err(DefinitionError::UnknownPort {
                        name: self.workflow.name.clone(),
                        port: port.clone(),
                    });
                }
                if matches!(target, Target::WorkflowOut { .. }) {
                    return Err(DefinitionError::PassThroughLink {
                        workflow: self.workflow.name.clone(),
                    });
                }
            }
        }
        match &target {
            Target::Node { node, port } => {
                let ports = self.node_in_ports(node)?;
                if !ports.contains(port) {
                    return Err(DefinitionError::UnknownPort {
                        name: node.clone(),
                        port: port.clone(),
                    });
                }
            }
            Target::WorkflowOut { port } => {
                if !self.workflow.out_ports.contains(port) {
                    return Err(DefinitionError::UnknownPort {
                        name: self.workflow.name.clone(),
                        port: port.clone(),
                    });
                }
            }
        }
        self.workflow.links.push(Link { source, target });
        Ok(self)
    }

    /// Finishes the workflow.
    pub fn build(self) -> Workflow {
        self.workflow
    }

    fn node_out_ports(&self, name: &str) -> Result<Vec<String>, DefinitionError> {
        self.node_ports(name, false)
    }

    fn node_in_ports(&self, name: &str) -> Result<Vec<String>, DefinitionError> {
        self.node_ports(name, true)
    }

    fn node_ports(&self, name: &str, incoming: bool) -> Result<Vec<String>, DefinitionError> {
        let (_, node) = self
            .workflow
            .nodes
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| DefinitionError::UnknownNode {
                node: name.to_owned(),
            })?;
        let ports = match node {
            WorkflowNode::Operation { operation, .. } => {
                if incoming {
                    operation.in_ports()
                } else {
                    operation.out_ports()
                }
            }
            WorkflowNode::Nested { workflow } => {
                if incoming {
                    workflow.in_ports()
                } else {
                    workflow.out_ports()
                }
            }
        };
        Ok(ports.to_vec())
    }
}

/// A resolved link destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDest {
    /// Index of the destination node in the flattened workflow.
    pub node: usize,
    /// In port index of the destination operation.
    pub port: usize,
}

/// One operation instance of a flattened workflow.
#[derive(Debug, Clone)]
pub struct FlatNode {
    /// Dotted path of the node through the nesting that produced it.
    pub name: String,
    /// The operation this node instantiates.
    pub operation: Arc<Operation>,
    /// Resolved strategy name.
    pub strategy: String,
    /// Arguments passed to the strategy's deploy hook.
    pub args: Value,
    /// Out port name → resolved destinations.
    pub links: BTreeMap<String, Vec<LinkDest>>,
}

/// Dense runtime representation of a workflow.
#[derive(Debug, Clone)]
pub struct FlattenedWorkflow {
    /// Name of the source workflow.
    pub name: String,
    /// Operation instances in stable order.
    pub nodes: Vec<FlatNode>,
    /// Workflow in port → resolved destinations, used to feed records into
    /// the deployed workflow from outside.
    pub in_links: BTreeMap<String, Vec<LinkDest>>,
}

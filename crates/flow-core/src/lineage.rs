//! Grafo de linaje de un Run reconstruido desde su log de eventos.
//!
//! Nodos de step y de artifact; aristas `step -> artifact` (producido) y
//! `artifact -> step` (consumido). El id de una arista es
//! `"{source}_{target}"`.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{RunEvent, RunEventKind};
use crate::model::ArtifactCatalog;
use crate::step::StepStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LineageNode {
    Step { id: String, status: StepStatus },
    Artifact { id: Uuid, label: Option<String>, data_type: Option<String> },
}

impl LineageNode {
    pub fn id(&self) -> String {
        match self {
            Self::Step { id, .. } => id.clone(),
            Self::Artifact { id, .. } => id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

impl LineageEdge {
    fn new(source: String, target: String) -> Self {
        Self { id: format!("{source}_{target}"),
               source,
               target }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineageGraph {
    pub run_id: Option<Uuid>,
    nodes: IndexMap<String, LineageNode>,
    edges: IndexMap<String, LineageEdge>,
}

impl LineageGraph {
    pub fn from_events(events: &[RunEvent]) -> Self {
        let mut g = Self { run_id: events.first().map(|e| e.run_id),
                           ..Self::default() };
        for ev in events {
            match &ev.kind {
                RunEventKind::StepSubmitted { step, .. } => g.step(step, StepStatus::Running),
                RunEventKind::StepSucceeded { step, inputs, artifacts } => {
                    g.step(step, StepStatus::Succeeded);
                    g.link(step, inputs, artifacts);
                }
                RunEventKind::StepCached { step, inputs, artifacts, .. } => {
                    g.step(step, StepStatus::Cached);
                    g.link(step, inputs, artifacts);
                }
                RunEventKind::StepFailed { step, .. } => g.step(step, StepStatus::Failed),
                RunEventKind::StepSkipped { step, .. } => g.step(step, StepStatus::SkippedUpstreamFailure),
                RunEventKind::StepCancelled { step } => g.step(step, StepStatus::Cancelled),
                RunEventKind::RunStarted { .. } | RunEventKind::StepLogs { .. } | RunEventKind::RunFinished { .. } => {}
            }
        }
        g
    }

    /// Etiqueta los nodos de artifact (`step.output`) con el catálogo.
    pub fn annotate(&mut self, catalog: &dyn ArtifactCatalog) {
        for node in self.nodes.values_mut() {
            if let LineageNode::Artifact { id, label, data_type } = node {
                if let Ok(Some(av)) = catalog.get(*id) {
                    *label = Some(format!("{}.{}", av.step_name, av.output_name));
                    *data_type = Some(av.data_type.to_string());
                }
            }
        }
    }

    fn step(&mut self, name: &str, status: StepStatus) {
        self.nodes.insert(name.to_string(),
                          LineageNode::Step { id: name.to_string(),
                                              status });
    }

    fn artifact(&mut self, id: Uuid) -> String {
        let key = id.to_string();
        self.nodes.entry(key.clone()).or_insert(LineageNode::Artifact { id,
                                                                        label: None,
                                                                        data_type: None });
        key
    }

    fn link(&mut self, step: &str, inputs: &[Uuid], artifacts: &[Uuid]) {
        for input in inputs {
            let a = self.artifact(*input);
            self.edge(a, step.to_string());
        }
        for out in artifacts {
            let a = self.artifact(*out);
            self.edge(step.to_string(), a);
        }
    }

    fn edge(&mut self, source: String, target: String) {
        let e = LineageEdge::new(source, target);
        self.edges.entry(e.id.clone()).or_insert(e);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &LineageNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &LineageEdge> {
        self.edges.values()
    }

    pub fn node(&self, id: &str) -> Option<&LineageNode> {
        self.nodes.get(id)
    }

    /// Step que produjo el artifact.
    pub fn producer_of(&self, artifact: Uuid) -> Option<&str> {
        let target = artifact.to_string();
        self.edges
            .values()
            .find(|e| e.target == target)
            .map(|e| e.source.as_str())
    }

    /// Steps sin artifacts de entrada (raíces del grafo).
    pub fn root_steps(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter_map(|n| match n {
                LineageNode::Step { id, .. } if !self.edges.values().any(|e| &e.target == id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

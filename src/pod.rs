//! # Pod model: the unit of work handed to the scheduler.
//!
//! A [`Pod`] is a snapshot of what the control plane wants placed somewhere:
//! a namespaced name, a resource request, and optional placement constraints.
//! [`PodId`] (`namespace/name`) is the key used by the queue, the task
//! registry, and the deletion pipeline.
//!
//! ## Rules
//! - At most one non-terminal task exists per [`PodId`] at any time.
//! - A pod with an assigned node is already bound and is not admissible.
//! - Admission is checked once, on entry ([`Pod::admission`]); everything
//!   downstream may assume a well-formed pod.

use std::fmt;

/// Namespaced pod identity, rendered as `namespace/name`.
///
/// Identity key for the queue, the task registry's pod index, and deletion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name, unique within the namespace.
    pub name: String,
}

impl PodId {
    /// Creates an identity from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Scalar resources a pod asks for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResourceRequest {
    /// Requested CPU shares.
    pub cpus: f64,
    /// Requested memory in megabytes.
    pub mem: f64,
}

impl Default for ResourceRequest {
    /// Modest defaults applied to pods that declare nothing.
    fn default() -> Self {
        Self { cpus: 0.25, mem: 64.0 }
    }
}

/// Why a pod was refused admission to the scheduling queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmissionVerdict {
    /// Pod is well-formed and unassigned; enqueue it.
    Admit,
    /// Pod has an empty name.
    MissingName,
    /// Pod has an empty namespace.
    MissingNamespace,
    /// Pod already carries a node assignment (someone else bound it).
    AlreadyAssigned,
}

impl AdmissionVerdict {
    /// Short stable label for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            AdmissionVerdict::Admit => "admit",
            AdmissionVerdict::MissingName => "missing_name",
            AdmissionVerdict::MissingNamespace => "missing_namespace",
            AdmissionVerdict::AlreadyAssigned => "already_assigned",
        }
    }
}

/// Snapshot of a pod as observed from the pod source.
///
/// The scheduler never mutates a pod in place; new watch events replace the
/// snapshot wholesale. Binding is recorded on the control plane via
/// [`PodSource::bind`](crate::driver::PodSource::bind), not here.
#[derive(Clone, Debug)]
pub struct Pod {
    /// Namespace the pod lives in.
    pub namespace: String,
    /// Pod name, unique within the namespace.
    pub name: String,
    /// Opaque unique id assigned by the control plane.
    pub uid: String,
    /// Scalar resource request.
    pub request: ResourceRequest,
    /// Host ports the pod's containers declare; each must be covered by the
    /// offered port ranges of the node it lands on.
    pub host_ports: Vec<u16>,
    /// Optional hostname constraint; when set, only offers from that host fit.
    pub node_selector: Option<String>,
    /// Node this pod is bound to, if any. Non-empty means already scheduled.
    pub assigned_node: Option<String>,
}

impl Pod {
    /// Creates an unassigned pod with default resources.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let uid = format!("{namespace}:{name}");
        Self {
            namespace,
            name,
            uid,
            request: ResourceRequest::default(),
            host_ports: Vec::new(),
            node_selector: None,
            assigned_node: None,
        }
    }

    /// Sets the resource request.
    pub fn with_request(mut self, cpus: f64, mem: f64) -> Self {
        self.request = ResourceRequest { cpus, mem };
        self
    }

    /// Declares host ports the pod needs.
    pub fn with_host_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.host_ports = ports.into();
        self
    }

    /// Constrains the pod to a specific hostname.
    pub fn with_node_selector(mut self, hostname: impl Into<String>) -> Self {
        self.node_selector = Some(hostname.into());
        self
    }

    /// Records an existing node assignment (as observed, not requested).
    pub fn with_assigned_node(mut self, node: impl Into<String>) -> Self {
        self.assigned_node = Some(node.into());
        self
    }

    /// Returns the pod's identity.
    pub fn id(&self) -> PodId {
        PodId::new(self.namespace.clone(), self.name.clone())
    }

    /// Returns the identity only when namespace and name are both non-empty.
    ///
    /// Deletion and admission both refuse pods that fail this check.
    pub fn qualified_id(&self) -> Option<PodId> {
        if self.namespace.is_empty() || self.name.is_empty() {
            return None;
        }
        Some(self.id())
    }

    /// True if the pod already carries a node assignment.
    pub fn is_assigned(&self) -> bool {
        self.assigned_node.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Decides whether this pod may enter the scheduling queue.
    pub fn admission(&self) -> AdmissionVerdict {
        if self.name.is_empty() {
            AdmissionVerdict::MissingName
        } else if self.namespace.is_empty() {
            AdmissionVerdict::MissingNamespace
        } else if self.is_assigned() {
            AdmissionVerdict::AlreadyAssigned
        } else {
            AdmissionVerdict::Admit
        }
    }
}

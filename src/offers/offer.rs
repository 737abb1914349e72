//! # Offer: a node's resource advertisement.
//!
//! An [`Offer`] is an immutable record of what one node can host right now:
//! scalar cpu/mem plus free host-port ranges. Offers are redeemable once:
//! consumed by a launch, declined on expiry, or rescinded by the cluster
//! manager.
//!
//! [`Offer::fits`] is the fitness predicate: the offer's scalars must
//! dominate the pod's request, the hostname must satisfy the pod's node
//! selector, and every declared host port must fall inside a free range.

use std::fmt;

use crate::pod::Pod;

/// Unique offer identity assigned by the cluster manager.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OfferId(pub String);

impl OfferId {
    /// Creates an offer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node's resource advertisement.
#[derive(Clone, Debug)]
pub struct Offer {
    /// Offer identity; the registry keys on this.
    pub id: OfferId,
    /// Id of the node (slave) the resources belong to.
    pub node_id: String,
    /// Hostname of the node; matched against pod node selectors.
    pub hostname: String,
    /// Offered CPU shares.
    pub cpus: f64,
    /// Offered memory in megabytes.
    pub mem: f64,
    /// Free host-port ranges, inclusive on both ends.
    pub port_ranges: Vec<(u16, u16)>,
}

impl Offer {
    /// Creates an offer with no port ranges.
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        hostname: impl Into<String>,
        cpus: f64,
        mem: f64,
    ) -> Self {
        Self {
            id: OfferId::new(id),
            node_id: node_id.into(),
            hostname: hostname.into(),
            cpus,
            mem,
            port_ranges: Vec::new(),
        }
    }

    /// Adds free host-port ranges.
    pub fn with_port_ranges(mut self, ranges: impl Into<Vec<(u16, u16)>>) -> Self {
        self.port_ranges = ranges.into();
        self
    }

    /// True if one of the offered ranges covers `port`.
    pub fn covers_port(&self, port: u16) -> bool {
        self.port_ranges
            .iter()
            .any(|&(lo, hi)| lo <= port && port <= hi)
    }

    /// Fitness predicate: can this offer host the pod?
    ///
    /// - scalar dominance: `cpus >= request.cpus` and `mem >= request.mem`
    /// - hostname selector, when the pod declares one
    /// - every declared host port covered by a free range
    pub fn fits(&self, pod: &Pod) -> bool {
        if self.cpus < pod.request.cpus || self.mem < pod.request.mem {
            return false;
        }
        if let Some(wanted) = pod.node_selector.as_deref() {
            if wanted != self.hostname {
                return false;
            }
        }
        pod.host_ports.iter().all(|&p| self.covers_port(p))
    }
}

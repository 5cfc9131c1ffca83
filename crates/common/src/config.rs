use ahash::{AHashMap, AHashSet};
use std::time::Duration;

/// Scheduling-engine-wide configuration, the slice of the deployment's
/// `GroupwareConfig` that C1-C7 actually consult. Everything else a real
/// calendar server configures (DAV locking, sharing, addressbooks, file
/// storage) lives outside this engine's boundary.
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    /// Domains this node is authoritative for. An attendee/organizer address
    /// whose domain is in this set resolves locally (C1); anything else is
    /// either a cluster peer (`cluster_nodes`) or an external iMIP/iSchedule
    /// recipient.
    pub local_domains: AHashSet<String>,
    /// `PRODID` stamped on every iTIP message this engine assembles (C3).
    pub prod_id: String,
    /// Hard cap on a stored or inbound iCalendar object's serialized size.
    pub max_ical_size: usize,
    /// Name of the default scheduling inbox/outbox collection, mirroring
    /// the deployment's default calendar naming convention.
    pub default_calendar_name: String,
    /// Whether inbound `METHOD:REQUEST`/`REPLY`/etc. are auto-processed at
    /// all (C6); when `false` the engine only ever originates messages.
    pub itip_enabled: bool,
    /// Timeout for an outbound iMIP (SMTP) delivery attempt.
    pub imip_timeout: Duration,
    /// Timeout for an outbound iSchedule (HTTPS POST) delivery attempt.
    pub ischedule_timeout: Duration,
    /// Other cluster nodes reachable via iSchedule rather than iMIP, keyed
    /// by the domain they're authoritative for.
    pub cluster_nodes: AHashMap<String, ClusterNode>,
}

/// A peer node in the same deployment, reachable over iSchedule instead of
/// having to round-trip through SMTP the way a fully external attendee is.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    pub ischedule_url: String,
}

impl SchedulingConfig {
    /// `true` if `domain` is served by this node directly.
    pub fn is_local_domain(&self, domain: &str) -> bool {
        self.local_domains.contains(&domain.to_lowercase())
    }

    /// The cluster node authoritative for `domain`, if this deployment has
    /// one; `None` means a fully external recipient (iMIP only).
    pub fn cluster_node_for(&self, domain: &str) -> Option<&ClusterNode> {
        self.cluster_nodes.get(&domain.to_lowercase())
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            local_domains: AHashSet::default(),
            prod_id: "-//Scheduling Engine//EN".to_string(),
            max_ical_size: 1024 * 1024,
            default_calendar_name: "default".to_string(),
            itip_enabled: true,
            imip_timeout: Duration::from_secs(30),
            ischedule_timeout: Duration::from_secs(30),
            cluster_nodes: AHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_domain_check_is_case_insensitive() {
        let mut cfg = SchedulingConfig::default();
        cfg.local_domains.insert("example.com".to_string());
        assert!(cfg.is_local_domain("Example.COM"));
        assert!(!cfg.is_local_domain("other.test"));
    }
}

use types::address::CalAddress;

/// Where a resolved calendar user address lives, as far as C1 cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Served by this node directly.
    Local { account_id: u32 },
    /// Served by another node in the same deployment, reachable over
    /// iSchedule instead of iMIP.
    Cluster { domain: String },
    /// Not part of this deployment at all; reachable only via iMIP.
    External,
}

/// Directory lookups C1 needs. Everything about *how* principals, groups
/// and aliases are stored (the deployment's full directory backend) is out
/// of scope; this is the minimal read seam scheduling calls through.
#[async_trait::async_trait]
pub trait Directory: Send + Sync {
    /// Every `CalAddress` known to name the same calendar user as `address`
    /// (its canonical address plus any aliases), or an empty vec if
    /// `address` does not resolve to a known local/cluster principal.
    async fn expand_aliases(&self, address: &CalAddress) -> trc::Result<Vec<CalAddress>>;

    /// Classifies `address` per C1 so the caller knows how to deliver to it.
    async fn locate(&self, address: &CalAddress) -> trc::Result<Principal>;
}

#[cfg(any(test, feature = "test_mode"))]
pub mod test_support {
    use super::*;
    use ahash::AHashMap;
    use tokio::sync::Mutex;

    /// In-memory `Directory` fake for unit and scenario tests.
    #[derive(Default)]
    pub struct FakeDirectory {
        pub principals: Mutex<AHashMap<String, Principal>>,
        pub aliases: Mutex<AHashMap<String, Vec<CalAddress>>>,
    }

    impl FakeDirectory {
        pub fn with_local(mut self, address: &str, account_id: u32) -> Self {
            self.principals.get_mut().insert(
                address.to_lowercase(),
                Principal::Local { account_id },
            );
            self
        }

        pub fn with_cluster(mut self, address: &str, domain: &str) -> Self {
            self.principals.get_mut().insert(
                address.to_lowercase(),
                Principal::Cluster {
                    domain: domain.to_string(),
                },
            );
            self
        }
    }

    #[async_trait::async_trait]
    impl Directory for FakeDirectory {
        async fn expand_aliases(&self, address: &CalAddress) -> trc::Result<Vec<CalAddress>> {
            let aliases = self.aliases.lock().await;
            Ok(aliases
                .get(address.as_str())
                .cloned()
                .unwrap_or_else(|| vec![address.clone()]))
        }

        async fn locate(&self, address: &CalAddress) -> trc::Result<Principal> {
            let principals = self.principals.lock().await;
            Ok(principals
                .get(address.as_str())
                .cloned()
                .unwrap_or(Principal::External))
        }
    }
}

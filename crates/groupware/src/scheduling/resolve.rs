//! Address resolution (spec C1): classifies a calendar user address
//! relative to the acting user and the deployment's domain list, so C6/C7
//! know whether a recipient is the acting user, local, a cluster peer, or
//! fully external.

use common::{
    auth::AuthContext,
    config::SchedulingConfig,
    directory::{Directory, Principal},
};
use trc::AddContext;
use types::address::CalAddress;

/// Where `addr` resolves to, relative to `actingUser` (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `addr` is one of the acting user's own calendar user addresses.
    SelfAddress,
    Local { account_id: u32 },
    ClusterRemote { domain: String },
    External,
}

/// Resolves `addr`. Fails with `trc::CalendarEvent::ResolveFailed` when the
/// address's domain is configured-local but no mailbox exists there (spec's
/// `NoUser`); callers map that event into `ScheduleStatusCode::NoUser`.
pub async fn resolve(
    directory: &dyn Directory,
    config: &SchedulingConfig,
    acting_user: &AuthContext,
    addr: &CalAddress,
) -> trc::Result<Resolution> {
    if acting_user.owns(addr) {
        return Ok(Resolution::SelfAddress);
    }

    match directory
        .locate(addr)
        .await
        .caused_by(trc::location!())?
    {
        Principal::Local { account_id } => Ok(Resolution::Local { account_id }),
        Principal::Cluster { domain } => Ok(Resolution::ClusterRemote { domain }),
        Principal::External if config.is_local_domain(addr.domain()) => {
            Err(trc::Error::new(trc::CalendarEvent::ResolveFailed)
                .ctx("address", addr.as_str())
                .details("configured-local domain with no matching mailbox")
                .caused_by(trc::location!()))
        }
        Principal::External => Ok(Resolution::External),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::directory::test_support::FakeDirectory;

    fn config_with_local_domain(domain: &str) -> SchedulingConfig {
        let mut config = SchedulingConfig::default();
        config.local_domains.insert(domain.to_string());
        config
    }

    #[tokio::test]
    async fn self_address_beats_local_lookup() {
        let directory = FakeDirectory::default().with_local("alice@example.com", 1);
        let config = config_with_local_domain("example.com");
        let alice = CalAddress::parse("alice@example.com").unwrap();
        let ctx = AuthContext::new(1, vec![alice.clone()]);

        let resolution = resolve(&directory, &config, &ctx, &alice).await.unwrap();
        assert_eq!(resolution, Resolution::SelfAddress);
    }

    #[tokio::test]
    async fn local_domain_with_no_mailbox_is_no_user() {
        let directory = FakeDirectory::default();
        let config = config_with_local_domain("example.com");
        let bob = CalAddress::parse("bob@example.com").unwrap();
        let ctx = AuthContext::new(1, vec![]);

        let err = resolve(&directory, &config, &ctx, &bob).await.unwrap_err();
        assert_eq!(err.event(), trc::CalendarEvent::ResolveFailed);
    }

    #[tokio::test]
    async fn non_local_domain_with_no_mailbox_is_external() {
        let directory = FakeDirectory::default();
        let config = config_with_local_domain("example.com");
        let carol = CalAddress::parse("carol@other.test").unwrap();
        let ctx = AuthContext::new(1, vec![]);

        let resolution = resolve(&directory, &config, &ctx, &carol).await.unwrap();
        assert_eq!(resolution, Resolution::External);
    }

    #[tokio::test]
    async fn cluster_principal_resolves_to_cluster_remote() {
        let directory = FakeDirectory::default().with_cluster("dave@peer.test", "peer.test");
        let config = SchedulingConfig::default();
        let dave = CalAddress::parse("dave@peer.test").unwrap();
        let ctx = AuthContext::new(1, vec![]);

        let resolution = resolve(&directory, &config, &ctx, &dave).await.unwrap();
        assert_eq!(resolution, Resolution::ClusterRemote { domain: "peer.test".to_string() });
    }
}

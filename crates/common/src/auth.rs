use types::address::CalAddress;

/// Identity of the principal a scheduling operation runs as, passed
/// explicitly into every C1-C7 entry point rather than pulled from ambient
/// request state. A trimmed analog of the deployment's `AccessToken`: this
/// engine only ever needs to know who's acting and which calendar user
/// addresses that identity is allowed to act as.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub primary_id: u32,
    /// Every `CalAddress` this principal is entitled to send/receive
    /// scheduling messages as (its own address plus any it has been
    /// delegated or proxied for).
    pub addresses: Vec<CalAddress>,
}

impl AuthContext {
    pub fn new(primary_id: u32, addresses: Vec<CalAddress>) -> Self {
        Self {
            primary_id,
            addresses,
        }
    }

    pub fn owns(&self, address: &CalAddress) -> bool {
        self.addresses.iter().any(|a| a == address)
    }
}

/// The three ACL privileges scheduling ever gates on. The privilege check
/// itself belongs to the calendar store's ACL model (out of this engine's
/// scope); `Acl::has_privilege` is the seam scheduling calls through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    /// Required on the organizer's (C4) or attendee's (C5) Scheduling
    /// Outbox to originate an iTIP message at all.
    ScheduleSend,
    /// Required on a recipient's Scheduling Inbox to deliver an inbound
    /// `REQUEST`/`CANCEL`/`POLLSTATUS` (C6).
    ScheduleDeliverInvite,
    /// Required on a recipient's Scheduling Inbox to deliver an inbound
    /// `REPLY` (C6).
    ScheduleDeliverReply,
}

#[async_trait::async_trait]
pub trait Acl: Send + Sync {
    /// Whether `ctx` holds `privilege` against the Scheduling Inbox/Outbox
    /// of `principal`.
    async fn has_privilege(
        &self,
        ctx: &AuthContext,
        privilege: Privilege,
        principal: &CalAddress,
    ) -> trc::Result<bool>;
}

#[cfg(any(test, feature = "test_mode"))]
pub mod test_support {
    use super::*;

    /// Grants every privilege; used by tests of callers that sit above the
    /// ACL boundary and aren't themselves exercising privilege gating.
    pub struct AllowAllAcl;

    #[async_trait::async_trait]
    impl Acl for AllowAllAcl {
        async fn has_privilege(&self, _ctx: &AuthContext, _privilege: Privilege, _principal: &CalAddress) -> trc::Result<bool> {
            Ok(true)
        }
    }

    pub struct DenyAllAcl;

    #[async_trait::async_trait]
    impl Acl for DenyAllAcl {
        async fn has_privilege(&self, _ctx: &AuthContext, _privilege: Privilege, _principal: &CalAddress) -> trc::Result<bool> {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owns_checks_address_membership() {
        let a = CalAddress::parse("alice@example.com").unwrap();
        let b = CalAddress::parse("bob@example.com").unwrap();
        let ctx = AuthContext::new(1, vec![a.clone()]);
        assert!(ctx.owns(&a));
        assert!(!ctx.owns(&b));
    }
}

//! Delivery routing (spec C6): resolves a recipient via C1, then either
//! merges the iTIP message into its local calendar or hands it off to an
//! iMIP/iSchedule transport, returning the SCHEDULE-STATUS code the
//! planner writes back onto the source event.

use crate::scheduling::{
    ItipSnapshots,
    inbound::{self, MergeResult, itip_merge_changes, itip_process_message},
    organizer::organizer_handle_update,
    snapshot::itip_snapshot,
};
use calcard::icalendar::{ICalendar, ICalendarMethod, ICalendarScheduleForceSendValue};
use common::{
    auth::{Acl, AuthContext, Privilege},
    config::SchedulingConfig,
    directory::Directory,
    store::{EventStore, StoredEvent},
    transport::{ImipMessage, ImipTransport, IScheduleRequest, IScheduleTransport},
};
use std::{future::Future, pin::Pin};
use types::{address::CalAddress, status::ScheduleStatusCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Request,
    Reply,
    Cancel,
    PollStatus,
}

impl DeliveryKind {
    fn method(self) -> ICalendarMethod {
        match self {
            Self::Request => ICalendarMethod::Request,
            Self::Reply => ICalendarMethod::Reply,
            Self::Cancel => ICalendarMethod::Cancel,
            Self::PollStatus => ICalendarMethod::PollStatus,
        }
    }

    fn as_content_type(self) -> &'static str {
        match self {
            Self::Request => "REQUEST",
            Self::Reply => "REPLY",
            Self::Cancel => "CANCEL",
            Self::PollStatus => "POLLSTATUS",
        }
    }
}

/// One `Deliver(recipient, iTIP, kind, forceSend)` invocation (spec §4.6).
pub struct DeliveryRequest {
    pub sender: CalAddress,
    pub recipient: CalAddress,
    pub kind: DeliveryKind,
    pub force_send: Option<ICalendarScheduleForceSendValue>,
    pub itip: ICalendar,
}

/// The collaborators C6 is built against, bundled so a cascading
/// organizer-side update (spec §4.6's "emit a secondary organizer-side
/// update") can recurse through the same router without threading eight
/// parameters through every call.
pub struct DeliveryContext<'x> {
    pub directory: &'x dyn Directory,
    pub acl: &'x dyn Acl,
    pub store: &'x dyn EventStore,
    pub imip: &'x dyn ImipTransport,
    pub ischedule: &'x dyn IScheduleTransport,
    pub config: &'x SchedulingConfig,
    pub auth: &'x AuthContext,
}

/// Routes one delivery to completion and returns its SCHEDULE-STATUS code.
/// Boxed because a successful local REPLY cascades into further `deliver`
/// calls for the organizer's other attendees (async fns can't recurse
/// unboxed).
pub fn deliver<'x>(
    ctx: &'x DeliveryContext<'x>,
    request: DeliveryRequest,
) -> Pin<Box<dyn Future<Output = ScheduleStatusCode> + Send + 'x>>
where
    DeliveryRequest: 'x,
{
    Box::pin(async move {
        if !force_send_is_legal(request.force_send, request.kind) {
            return ScheduleStatusCode::InvalidParam;
        }

        let resolution = match crate::scheduling::resolve::resolve(
            ctx.directory,
            ctx.config,
            ctx.auth,
            &request.recipient,
        )
        .await
        {
            Ok(resolution) => resolution,
            Err(_) => return ScheduleStatusCode::NoUser,
        };

        use crate::scheduling::resolve::Resolution;
        match resolution {
            Resolution::SelfAddress => ScheduleStatusCode::Success,
            Resolution::Local { .. } => deliver_local(ctx, request).await,
            Resolution::ClusterRemote { domain } => deliver_ischedule(ctx, &domain, request).await,
            Resolution::External => deliver_imip(ctx, request).await,
        }
    })
}

fn force_send_is_legal(force_send: Option<ICalendarScheduleForceSendValue>, kind: DeliveryKind) -> bool {
    match force_send {
        None => true,
        Some(ICalendarScheduleForceSendValue::Reply) => kind == DeliveryKind::Reply,
        Some(ICalendarScheduleForceSendValue::Request) => kind == DeliveryKind::Request,
    }
}

async fn deliver_local(ctx: &DeliveryContext<'_>, request: DeliveryRequest) -> ScheduleStatusCode {
    let privilege = match request.kind {
        DeliveryKind::Reply => Privilege::ScheduleDeliverReply,
        DeliveryKind::Request | DeliveryKind::Cancel | DeliveryKind::PollStatus => {
            Privilege::ScheduleDeliverInvite
        }
    };
    match ctx.acl.has_privilege(ctx.auth, privilege, &request.recipient).await {
        Ok(true) => {}
        Ok(false) => return ScheduleStatusCode::NoPrivs,
        Err(_) => return ScheduleStatusCode::Rejected,
    }

    let Some(uid) = extract_uid(&request.itip) else {
        return ScheduleStatusCode::InvalidParam;
    };

    let stored = match ctx.store.find_by_uid(&request.recipient, &uid).await {
        Ok(stored) => stored,
        Err(_) => return ScheduleStatusCode::TempFail,
    };

    let Some(mut stored) = stored else {
        return match request.kind {
            DeliveryKind::Reply => ScheduleStatusCode::PermFail,
            DeliveryKind::Cancel | DeliveryKind::PollStatus => ScheduleStatusCode::Success,
            DeliveryKind::Request => {
                let mut ical = request.itip.clone();
                if inbound::itip_import_message(&mut ical).is_err() {
                    return ScheduleStatusCode::Rejected;
                }
                match ctx.store.create(&request.recipient, ical).await {
                    Ok(_) => {
                        let _ = ctx.store.write_inbox_item(&request.recipient, request.itip.clone()).await;
                        ScheduleStatusCode::Success
                    }
                    Err(_) => ScheduleStatusCode::TempFail,
                }
            }
        };
    };

    let recipient_email = request.recipient.as_str().to_string();
    let old_ical = stored.ical.clone();
    let (old_itip, new_itip) = match (
        itip_snapshot(&old_ical, std::slice::from_ref(&recipient_email), false),
        itip_snapshot(&request.itip, std::slice::from_ref(&recipient_email), false),
    ) {
        (Ok(old), Ok(new)) => (old, new),
        _ => return ScheduleStatusCode::Rejected,
    };

    match itip_process_message(
        &ctx.config.prod_id,
        &old_ical,
        old_itip,
        &request.itip,
        new_itip,
        request.sender.as_str().to_string(),
    ) {
        Ok(MergeResult::None) => ScheduleStatusCode::Success,
        Ok(MergeResult::Message(message)) => {
            let reply = DeliveryRequest {
                sender: request.recipient,
                recipient: request.sender,
                kind: DeliveryKind::Request,
                force_send: None,
                itip: message.message,
            };
            deliver(ctx, reply).await
        }
        Ok(MergeResult::Actions(actions)) => {
            itip_merge_changes(&mut stored.ical, actions);
            let new_ical = stored.ical.clone();

            if ctx.store.save(&request.recipient, stored).await.is_err() {
                return ScheduleStatusCode::TempFail;
            }
            let _ = ctx.store.write_inbox_item(&request.recipient, request.itip).await;

            if request.kind == DeliveryKind::Reply {
                cascade_organizer_update(ctx, &request.recipient, &request.sender, &old_ical, &new_ical).await;
            }

            ScheduleStatusCode::Success
        }
        Err(_) => ScheduleStatusCode::Rejected,
    }
}

/// Spec §4.6: "after a successful local REPLY delivery, emit a secondary
/// organizer-side update... so other attendees see the state change."
/// Re-diffs the merged event as an organizer-side edit and fans the
/// resulting messages back out through this same router, skipping the
/// attendee who just replied - they already have the state they sent.
async fn cascade_organizer_update(
    ctx: &DeliveryContext<'_>,
    organizer: &CalAddress,
    replier: &CalAddress,
    old_ical: &ICalendar,
    new_ical: &ICalendar,
) {
    let organizer_email = organizer.as_str().to_string();
    let (old_itip, new_itip): (ItipSnapshots<'_>, ItipSnapshots<'_>) = match (
        itip_snapshot(old_ical, std::slice::from_ref(&organizer_email), false),
        itip_snapshot(new_ical, std::slice::from_ref(&organizer_email), false),
    ) {
        (Ok(old), Ok(new)) => (old, new),
        _ => return,
    };

    let mut increment_sequences = Vec::new();
    let Ok(messages) = organizer_handle_update(
        &ctx.config.prod_id,
        old_ical,
        new_ical,
        old_itip,
        new_itip,
        &mut increment_sequences,
    ) else {
        return;
    };

    for message in messages {
        let kind = match message.method {
            ICalendarMethod::Cancel => DeliveryKind::Cancel,
            _ => DeliveryKind::Request,
        };
        for to in message.to {
            if to == replier.as_str() {
                continue;
            }
            let Some(recipient) = CalAddress::parse(&to) else {
                continue;
            };
            deliver(
                ctx,
                DeliveryRequest {
                    sender: organizer.clone(),
                    recipient,
                    kind,
                    force_send: None,
                    itip: message.message.clone(),
                },
            )
            .await;
        }
    }
}

async fn deliver_imip(ctx: &DeliveryContext<'_>, request: DeliveryRequest) -> ScheduleStatusCode {
    let message = ImipMessage {
        from: request.sender,
        to: request.recipient,
        subject: format!("{} notification", request.kind.as_content_type()),
        ical: request.itip.to_string(),
        method: request.kind.as_content_type(),
    };
    match ctx.imip.send(message).await {
        Ok(()) => ScheduleStatusCode::Sent,
        Err(_) => ScheduleStatusCode::TempFail,
    }
}

async fn deliver_ischedule(ctx: &DeliveryContext<'_>, domain: &str, request: DeliveryRequest) -> ScheduleStatusCode {
    let Some(node) = ctx.config.cluster_node_for(domain) else {
        return ScheduleStatusCode::TempFail;
    };

    let ischedule_request = IScheduleRequest {
        originator: request.sender,
        recipients: vec![request.recipient.clone()],
        ical: request.itip.to_string(),
    };

    match ctx.ischedule.post(&node.ischedule_url, ischedule_request).await {
        Ok(items) => items
            .into_iter()
            .find(|item| item.recipient == request.recipient)
            .map(|item| status_from_request_status(&item.request_status))
            .unwrap_or(ScheduleStatusCode::TempFail),
        Err(_) => ScheduleStatusCode::TempFail,
    }
}

fn status_from_request_status(request_status: &str) -> ScheduleStatusCode {
    match request_status.split_once(';').map_or(request_status, |(code, _)| code) {
        code if code.starts_with("1.2") => ScheduleStatusCode::Delivered,
        code if code.starts_with("1.") => ScheduleStatusCode::Sent,
        code if code.starts_with("2.") => ScheduleStatusCode::Success,
        code if code.starts_with("3.7") => ScheduleStatusCode::NoUser,
        code if code.starts_with("3.8") => ScheduleStatusCode::NoPrivs,
        code if code.starts_with("5.2") => ScheduleStatusCode::PermFail,
        code if code.starts_with("5.3") => ScheduleStatusCode::Rejected,
        _ => ScheduleStatusCode::TempFail,
    }
}

fn extract_uid(ical: &ICalendar) -> Option<String> {
    use calcard::icalendar::{ICalendarProperty, ICalendarValue};

    ical.components.iter().find_map(|comp| {
        comp.entries.iter().find_map(|entry| {
            if entry.name == ICalendarProperty::Uid {
                entry.values.iter().find_map(|v| match v {
                    ICalendarValue::Text(t) => Some(t.clone()),
                    _ => None,
                })
            } else {
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        auth::test_support::AllowAllAcl, directory::test_support::FakeDirectory,
        store::test_support::FakeEventStore, transport::test_support::{FakeImipTransport, FakeIScheduleTransport},
    };

    fn sample_request(uid: &str, method: ICalendarMethod) -> ICalendar {
        let raw = format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nMETHOD:{}\r\nBEGIN:VEVENT\r\nUID:{}\r\nDTSTAMP:20260101T000000Z\r\nDTSTART:20260101T100000Z\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@example.com\r\nATTENDEE:mailto:bob@example.com\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
            match method {
                ICalendarMethod::Request => "REQUEST",
                ICalendarMethod::Cancel => "CANCEL",
                _ => "REQUEST",
            },
            uid
        );
        ICalendar::parse(&raw).unwrap()
    }

    #[tokio::test]
    async fn unknown_request_force_send_combo_is_invalid_param() {
        let directory = FakeDirectory::default();
        let acl = AllowAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport::default();
        let ischedule = FakeIScheduleTransport::default();
        let config = SchedulingConfig::default();
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: CalAddress::parse("bob@example.com").unwrap(),
            kind: DeliveryKind::Cancel,
            force_send: Some(ICalendarScheduleForceSendValue::Reply),
            itip: sample_request("evt1@example.com", ICalendarMethod::Cancel),
        };

        assert_eq!(deliver(&ctx, request).await, ScheduleStatusCode::InvalidParam);
    }

    #[tokio::test]
    async fn new_request_with_no_stored_match_creates_object() {
        let directory = FakeDirectory::default().with_local("bob@example.com", 2);
        let acl = AllowAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport::default();
        let ischedule = FakeIScheduleTransport::default();
        let mut config = SchedulingConfig::default();
        config.local_domains.insert("example.com".to_string());
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let bob = CalAddress::parse("bob@example.com").unwrap();
        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: bob.clone(),
            kind: DeliveryKind::Request,
            force_send: None,
            itip: sample_request("evt2@example.com", ICalendarMethod::Request),
        };

        let status = deliver(&ctx, request).await;
        assert_eq!(status, ScheduleStatusCode::Success);
        assert_eq!(store.inbox_of(&bob).await.len(), 1);
    }

    #[tokio::test]
    async fn cancel_with_no_stored_match_is_success() {
        let directory = FakeDirectory::default().with_local("bob@example.com", 2);
        let acl = AllowAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport::default();
        let ischedule = FakeIScheduleTransport::default();
        let mut config = SchedulingConfig::default();
        config.local_domains.insert("example.com".to_string());
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: CalAddress::parse("bob@example.com").unwrap(),
            kind: DeliveryKind::Cancel,
            force_send: None,
            itip: sample_request("evt3@example.com", ICalendarMethod::Cancel),
        };

        assert_eq!(deliver(&ctx, request).await, ScheduleStatusCode::Success);
    }

    #[tokio::test]
    async fn external_recipient_goes_through_imip() {
        let directory = FakeDirectory::default();
        let acl = AllowAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport::default();
        let ischedule = FakeIScheduleTransport::default();
        let config = SchedulingConfig::default();
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: CalAddress::parse("carol@other.test").unwrap(),
            kind: DeliveryKind::Request,
            force_send: None,
            itip: sample_request("evt4@example.com", ICalendarMethod::Request),
        };

        let status = deliver(&ctx, request).await;
        assert_eq!(status, ScheduleStatusCode::Sent);
        assert_eq!(imip.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_imip_transport_is_temp_fail() {
        let directory = FakeDirectory::default();
        let acl = AllowAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport { sent: Default::default(), fail: true };
        let ischedule = FakeIScheduleTransport::default();
        let config = SchedulingConfig::default();
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: CalAddress::parse("carol@other.test").unwrap(),
            kind: DeliveryKind::Request,
            force_send: None,
            itip: sample_request("evt5@example.com", ICalendarMethod::Request),
        };

        assert_eq!(deliver(&ctx, request).await, ScheduleStatusCode::TempFail);
    }

    #[tokio::test]
    async fn unprivileged_sender_is_no_privs() {
        use common::auth::test_support::DenyAllAcl;

        let directory = FakeDirectory::default().with_local("bob@example.com", 2);
        let acl = DenyAllAcl;
        let store = FakeEventStore::default();
        let imip = FakeImipTransport::default();
        let ischedule = FakeIScheduleTransport::default();
        let mut config = SchedulingConfig::default();
        config.local_domains.insert("example.com".to_string());
        let auth = AuthContext::new(1, vec![]);
        let ctx = DeliveryContext {
            directory: &directory,
            acl: &acl,
            store: &store,
            imip: &imip,
            ischedule: &ischedule,
            config: &config,
            auth: &auth,
        };

        let request = DeliveryRequest {
            sender: CalAddress::parse("alice@example.com").unwrap(),
            recipient: CalAddress::parse("bob@example.com").unwrap(),
            kind: DeliveryKind::Request,
            force_send: None,
            itip: sample_request("evt6@example.com", ICalendarMethod::Request),
        };

        assert_eq!(deliver(&ctx, request).await, ScheduleStatusCode::NoPrivs);
    }
}

//! End-to-end scheduling scenarios: an organizer-authored change goes in,
//! the emitted iTIP messages are routed through the same collaborators a
//! real deployment would plug in (an in-memory directory, event store, and
//! iMIP/iSchedule transports), and the result is checked from the outside.

use calcard::icalendar::{ICalendar, ICalendarMethod};
use common::{
    auth::{AuthContext, test_support::AllowAllAcl},
    config::{ClusterNode, SchedulingConfig},
    directory::test_support::FakeDirectory,
    store::{BusyInterval, BusyStatus, test_support::FakeEventStore},
    transport::test_support::{FakeImipTransport, FakeIScheduleTransport},
};
use dav_proto::schema::response::{ScheduleResponse, ScheduleResponseItem};
use groupware::scheduling::{
    delivery::{DeliveryContext, DeliveryKind, DeliveryRequest, deliver},
    event_cancel::itip_cancel,
    event_create::itip_create,
    event_update::{itip_reply, itip_update},
    freebusy::federate_free_busy,
};
use types::{TimeRange, address::CalAddress, status::ScheduleStatusCode};

const PROD_ID: &str = "-//Test//Scheduling Scenarios//EN";

fn parse(src: &str) -> ICalendar {
    ICalendar::parse(src).unwrap()
}

fn addr(s: &str) -> CalAddress {
    CalAddress::parse(s).unwrap()
}

/// S1: a brand-new invite from a local organizer to one local and one
/// external attendee delivers to both, by whatever channel C1 selects.
#[tokio::test]
async fn s1_initial_invite_delivers_to_local_and_external_attendees() {
    let mut ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E1\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\n\
         SUMMARY:kick-off\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );

    let messages = itip_create(PROD_ID, &mut ical, &["alice@x.test".to_string()]).unwrap();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.method, ICalendarMethod::Request);
    assert_eq!(message.to.len(), 2);

    let directory = FakeDirectory::default().with_local("bob@x.test", 2);
    let acl = AllowAllAcl;
    let store = FakeEventStore::default();
    let imip = FakeImipTransport::default();
    let ischedule = FakeIScheduleTransport::default();
    let mut config = SchedulingConfig::default();
    config.local_domains.insert("x.test".to_string());
    let auth = AuthContext::new(1, vec![addr("alice@x.test")]);
    let ctx = DeliveryContext {
        directory: &directory,
        acl: &acl,
        store: &store,
        imip: &imip,
        ischedule: &ischedule,
        config: &config,
        auth: &auth,
    };

    let bob = addr("bob@x.test");
    let carol = addr("carol@y.test");
    for to in &message.to {
        let recipient = addr(to);
        let status = deliver(
            &ctx,
            DeliveryRequest {
                sender: addr("alice@x.test"),
                recipient: recipient.clone(),
                kind: DeliveryKind::Request,
                force_send: None,
                itip: message.message.clone(),
            },
        )
        .await;
        if recipient == bob {
            assert_eq!(status, ScheduleStatusCode::Success);
        } else {
            assert_eq!(status, ScheduleStatusCode::Sent);
        }
    }

    assert_eq!(store.inbox_of(&bob).await.len(), 1);
    assert_eq!(imip.sent.lock().await.len(), 1);
    assert_eq!(imip.sent.lock().await[0].to, carol);
}

/// S2: moving DTSTART bumps SEQUENCE and resets every attendee to
/// NEEDS-ACTION on the wire.
#[tokio::test]
async fn s2_time_change_bumps_sequence_and_resets_partstat() {
    let old_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E1\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\n\
         SUMMARY:kick-off\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );
    let mut new_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E1\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T100000Z\r\n\
         SUMMARY:kick-off\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );

    let messages = itip_update(PROD_ID, &old_ical, &mut new_ical, &["alice@x.test".to_string()]).unwrap();
    assert_eq!(messages.len(), 1);
    let wire = messages[0].message.to_string();
    assert!(wire.contains("SEQUENCE:1"));
    assert!(wire.contains("DTSTART:20240601T100000Z"));
    assert!(wire.contains("PARTSTAT=NEEDS-ACTION"));
    assert!(new_ical.to_string().contains("SEQUENCE:1"));
}

/// S3: dropping an attendee from a single recurrence override sends that
/// attendee a CANCEL scoped to the override's RECURRENCE-ID.
#[tokio::test]
async fn s3_attendee_removed_from_one_recurrence_is_cancelled_for_that_instance() {
    let old_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\n\
         BEGIN:VEVENT\r\nUID:E3\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\n\
         RRULE:FREQ=WEEKLY\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\n\
         BEGIN:VEVENT\r\nUID:E3\r\nRECURRENCE-ID:20240608T090000Z\r\nDTSTAMP:20240601T080000Z\r\n\
         DTSTART:20240608T090000Z\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );
    let mut new_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\n\
         BEGIN:VEVENT\r\nUID:E3\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\n\
         RRULE:FREQ=WEEKLY\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\n\
         BEGIN:VEVENT\r\nUID:E3\r\nRECURRENCE-ID:20240608T090000Z\r\nDTSTAMP:20240601T080000Z\r\n\
         DTSTART:20240608T090000Z\r\nSEQUENCE:0\r\nORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );

    let messages = itip_update(PROD_ID, &old_ical, &mut new_ical, &["alice@x.test".to_string()]).unwrap();

    let bob_cancel = messages
        .iter()
        .find(|m| m.method == ICalendarMethod::Cancel && m.to.iter().any(|t| t == "bob@x.test"))
        .expect("bob should receive a cancellation for the dropped instance");
    let wire = bob_cancel.message.to_string();
    assert!(wire.contains("RECURRENCE-ID"));
    assert!(wire.contains("20240608T090000Z"));
}

/// S4: an attendee's PARTSTAT change produces a single REPLY naming only
/// that attendee.
#[tokio::test]
async fn s4_attendee_reply_carries_only_the_replier() {
    let old_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E4\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\nSEQUENCE:0\r\n\
         ORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE;PARTSTAT=NEEDS-ACTION;RSVP=TRUE:mailto:bob@x.test\r\n\
         ATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );
    let new_ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E4\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\nSEQUENCE:0\r\n\
         ORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE;PARTSTAT=ACCEPTED;RSVP=FALSE:mailto:bob@x.test\r\n\
         ATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );

    let messages = itip_reply(PROD_ID, &old_ical, &new_ical, &["bob@x.test".to_string()]).unwrap();
    assert_eq!(messages.len(), 1);
    let reply = &messages[0];
    assert_eq!(reply.method, ICalendarMethod::Reply);
    assert_eq!(reply.from, "bob@x.test");
    assert!(reply.to.iter().any(|t| t == "alice@x.test"));

    let wire = reply.message.to_string();
    assert_eq!(wire.matches("ATTENDEE").count(), 1);
    assert!(wire.contains("PARTSTAT=ACCEPTED"));
    assert!(wire.contains("bob@x.test"));
}

/// S5: the organizer deleting the event cancels every attendee, and each
/// cancellation is then routed to completion.
#[tokio::test]
async fn s5_organizer_cancels_notifies_every_attendee() {
    let mut ical = parse(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//EN\r\nBEGIN:VEVENT\r\n\
         UID:E5\r\nDTSTAMP:20240601T080000Z\r\nDTSTART:20240601T090000Z\r\nSEQUENCE:0\r\n\
         ORGANIZER:mailto:alice@x.test\r\n\
         ATTENDEE:mailto:bob@x.test\r\nATTENDEE:mailto:carol@y.test\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n",
    );

    let message = itip_cancel(PROD_ID, &mut ical, &["alice@x.test".to_string()]).unwrap();
    assert_eq!(message.method, ICalendarMethod::Cancel);
    assert!(message.message.to_string().contains("STATUS:CANCELLED"));
    assert_eq!(message.to.len(), 2);

    let directory = FakeDirectory::default().with_local("bob@x.test", 2);
    let acl = AllowAllAcl;
    let store = FakeEventStore::default();
    let imip = FakeImipTransport::default();
    let ischedule = FakeIScheduleTransport::default();
    let mut config = SchedulingConfig::default();
    config.local_domains.insert("x.test".to_string());
    let auth = AuthContext::new(1, vec![addr("alice@x.test")]);
    let ctx = DeliveryContext {
        directory: &directory,
        acl: &acl,
        store: &store,
        imip: &imip,
        ischedule: &ischedule,
        config: &config,
        auth: &auth,
    };

    for to in &message.to {
        let recipient = addr(to);
        let status = deliver(
            &ctx,
            DeliveryRequest {
                sender: addr("alice@x.test"),
                recipient,
                kind: DeliveryKind::Cancel,
                force_send: None,
                itip: message.message.clone(),
            },
        )
        .await;
        assert_eq!(status, ScheduleStatusCode::Success);
    }
    assert_eq!(imip.sent.lock().await.len(), 1);
}

/// S6: a free-busy request spanning a local attendee and an iSchedule peer
/// returns one response per attendee, with the peer's reply passed through
/// verbatim.
#[tokio::test]
async fn s6_free_busy_federates_local_and_cluster_peers() {
    let bob = addr("bob@x.test");
    let dana = addr("dana@cluster.test");
    let directory = FakeDirectory::default()
        .with_local("bob@x.test", 2)
        .with_cluster("dana@cluster.test", "cluster.test");
    let mut config = SchedulingConfig::default();
    config.local_domains.insert("x.test".to_string());
    config.cluster_nodes.insert(
        "cluster.test".to_string(),
        ClusterNode {
            ischedule_url: "https://cluster.test/.well-known/ischedule".to_string(),
        },
    );
    let store = FakeEventStore::default();
    store
        .set_busy(
            &bob,
            vec![BusyInterval {
                range: TimeRange::new(1_000, 2_000),
                status: BusyStatus::Busy,
            }],
        )
        .await;
    let ischedule = FakeIScheduleTransport::default();
    let auth = AuthContext::new(1, vec![addr("alice@x.test")]);

    let results = federate_free_busy(
        &directory,
        &config,
        &store,
        &ischedule,
        &auth,
        &addr("alice@x.test"),
        &[bob.clone(), dana.clone()],
        TimeRange::new(0, 3_000),
    )
    .await;

    assert_eq!(results.len(), 2);
    let bob_result = results.iter().find(|r| r.recipient == bob).unwrap();
    assert_eq!(bob_result.request_status, ScheduleStatusCode::Success.to_request_status());
    assert!(bob_result.calendar_data.as_ref().unwrap().contains("FREEBUSY"));

    let dana_result = results.iter().find(|r| r.recipient == dana).unwrap();
    assert_eq!(dana_result.request_status, "2.0;Success");

    let response = ScheduleResponse {
        items: results
            .into_iter()
            .map(|r| ScheduleResponseItem {
                recipient: r.recipient,
                request_status: r.request_status,
                calendar_data: r.calendar_data,
            })
            .collect(),
    };
    let xml = response.to_string();
    assert_eq!(xml.matches("<B:response>").count(), 2);
    assert!(xml.contains("<B:recipient><A:href>mailto:bob@x.test</A:href></B:recipient>"));
    assert!(xml.contains("<![CDATA["));
}

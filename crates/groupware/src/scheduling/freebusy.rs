//! Busy-time federation (spec C7): answers a VFREEBUSY REQUEST by scanning
//! local calendars directly and fanning the remainder out over iSchedule,
//! declining the iMIP-only remote group (iMIP has no synchronous reply
//! channel, so it can't carry a busy-time answer).

use crate::scheduling::{itip::itip_build_envelope, resolve::{Resolution, resolve}};
use ahash::AHashMap;
use calcard::icalendar::{ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarMethod, ICalendarProperty, ICalendarValue};
use chrono::{TimeZone, Utc};
use common::{
    auth::AuthContext,
    config::SchedulingConfig,
    directory::Directory,
    store::EventStore,
    transport::{IScheduleRequest, IScheduleTransport},
};
use types::{address::CalAddress, status::ScheduleStatusCode, TimeRange};

/// One `response` element of the `schedule-response` document (spec §4.7).
#[derive(Debug, Clone)]
pub struct FreeBusyResponse {
    pub recipient: CalAddress,
    pub request_status: String,
    pub calendar_data: Option<String>,
}

/// Answers a VFREEBUSY REQUEST for `attendees` over `window`, partitioning
/// by C1 resolution: local attendees are scanned directly, cluster peers
/// are batched one iSchedule POST per server, and external attendees are
/// declined since iMIP carries no synchronous reply.
pub async fn federate_free_busy(
    directory: &dyn Directory,
    config: &SchedulingConfig,
    store: &dyn EventStore,
    ischedule: &dyn IScheduleTransport,
    acting_user: &AuthContext,
    organizer: &CalAddress,
    attendees: &[CalAddress],
    window: TimeRange,
) -> Vec<FreeBusyResponse> {
    let mut results = Vec::with_capacity(attendees.len());
    let mut by_cluster: AHashMap<String, Vec<CalAddress>> = AHashMap::new();

    for attendee in attendees {
        match resolve(directory, config, acting_user, attendee).await {
            Ok(Resolution::SelfAddress | Resolution::Local { .. }) => {
                results.push(local_response(store, organizer, attendee, window, &config.prod_id).await);
            }
            Ok(Resolution::ClusterRemote { domain }) => {
                by_cluster.entry(domain).or_default().push(attendee.clone());
            }
            Ok(Resolution::External) => {
                results.push(FreeBusyResponse {
                    recipient: attendee.clone(),
                    request_status: ScheduleStatusCode::TempFail.to_request_status(),
                    calendar_data: None,
                });
            }
            Err(_) => {
                results.push(FreeBusyResponse {
                    recipient: attendee.clone(),
                    request_status: ScheduleStatusCode::NoUser.to_request_status(),
                    calendar_data: None,
                });
            }
        }
    }

    for (domain, group) in by_cluster {
        results.extend(cluster_responses(config, ischedule, organizer, &domain, group, window).await);
    }

    results
}

async fn local_response(
    store: &dyn EventStore,
    organizer: &CalAddress,
    attendee: &CalAddress,
    window: TimeRange,
    prod_id: &str,
) -> FreeBusyResponse {
    match store.busy_time(attendee, window).await {
        Ok(intervals) => {
            let ical = build_vfreebusy(ICalendarMethod::Reply, organizer, &[attendee.clone()], window, prod_id);
            let mut ical = ical;
            fill_freebusy_entries(&mut ical, &intervals);
            FreeBusyResponse {
                recipient: attendee.clone(),
                request_status: ScheduleStatusCode::Success.to_request_status(),
                calendar_data: Some(ical.to_string()),
            }
        }
        Err(err) => {
            trc::event!(trc::Level::Warn, "freebusy.local_scan_failed", attendee = %attendee, error = %err);
            FreeBusyResponse {
                recipient: attendee.clone(),
                request_status: ScheduleStatusCode::TempFail.to_request_status(),
                calendar_data: None,
            }
        }
    }
}

async fn cluster_responses(
    config: &SchedulingConfig,
    ischedule: &dyn IScheduleTransport,
    organizer: &CalAddress,
    domain: &str,
    group: Vec<CalAddress>,
    window: TimeRange,
) -> Vec<FreeBusyResponse> {
    let Some(node) = config.cluster_node_for(domain) else {
        return group
            .into_iter()
            .map(|recipient| FreeBusyResponse {
                recipient,
                request_status: ScheduleStatusCode::TempFail.to_request_status(),
                calendar_data: None,
            })
            .collect();
    };

    let ical = build_vfreebusy(ICalendarMethod::Request, organizer, &group, window, &config.prod_id);
    let request = IScheduleRequest {
        originator: organizer.clone(),
        recipients: group.clone(),
        ical: ical.to_string(),
    };

    match ischedule.post(&node.ischedule_url, request).await {
        Ok(items) => items
            .into_iter()
            .map(|item| FreeBusyResponse {
                recipient: item.recipient,
                request_status: item.request_status,
                calendar_data: item.calendar_data,
            })
            .collect(),
        Err(err) => {
            trc::event!(trc::Level::Warn, "freebusy.ischedule_failed", domain = %domain, error = %err);
            group
                .into_iter()
                .map(|recipient| FreeBusyResponse {
                    recipient,
                    request_status: ScheduleStatusCode::TempFail.to_request_status(),
                    calendar_data: None,
                })
                .collect()
        }
    }
}

/// Builds the VCALENDAR/VFREEBUSY envelope shared by the local answer and
/// the outbound iSchedule request; callers append FREEBUSY entries
/// themselves (the federator never emits a reply with intervals already
/// attached — a cluster peer fills those in on its own node).
fn build_vfreebusy(
    method: ICalendarMethod,
    organizer: &CalAddress,
    attendees: &[CalAddress],
    window: TimeRange,
    prod_id: &str,
) -> ICalendar {
    let mut envelope = itip_build_envelope(method, prod_id);
    envelope.component_ids.push(1);

    let mut vfreebusy = ICalendarComponent {
        component_type: ICalendarComponentType::VFreebusy,
        entries: Vec::with_capacity(4 + attendees.len()),
        component_ids: vec![],
    };
    vfreebusy.add_property(ICalendarProperty::Organizer, ICalendarValue::Text(organizer.to_string()));
    for attendee in attendees {
        vfreebusy.add_property(ICalendarProperty::Attendee, ICalendarValue::Text(attendee.to_string()));
    }
    vfreebusy.entries.push(ICalendarEntry {
        name: ICalendarProperty::Dtstart,
        params: vec![],
        values: vec![ICalendarValue::Text(format_instant(window.start))],
    });
    vfreebusy.entries.push(ICalendarEntry {
        name: ICalendarProperty::Dtend,
        params: vec![],
        values: vec![ICalendarValue::Text(format_instant(window.end))],
    });

    ICalendar {
        components: vec![envelope, vfreebusy],
    }
}

fn fill_freebusy_entries(ical: &mut ICalendar, intervals: &[common::store::BusyInterval]) {
    if let Some(vfreebusy) = ical
        .components
        .iter_mut()
        .find(|c| c.component_type == ICalendarComponentType::VFreebusy)
    {
        for interval in intervals {
            vfreebusy.entries.push(ICalendarEntry {
                name: ICalendarProperty::Freebusy,
                params: vec![],
                values: vec![ICalendarValue::Text(format!(
                    "{}/{}",
                    format_instant(interval.range.start),
                    format_instant(interval.range.end)
                ))],
            });
        }
    }
}

fn format_instant(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .format("%Y%m%dT%H%M%SZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        directory::test_support::FakeDirectory,
        store::{BusyInterval, BusyStatus, test_support::FakeEventStore},
        transport::test_support::FakeIScheduleTransport,
    };

    #[tokio::test]
    async fn local_attendee_returns_computed_freebusy() {
        let directory = FakeDirectory::default().with_local("bob@example.com", 2);
        let mut config = SchedulingConfig::default();
        config.local_domains.insert("example.com".to_string());
        let store = FakeEventStore::default();
        let ischedule = FakeIScheduleTransport::default();
        let bob = CalAddress::parse("bob@example.com").unwrap();
        let organizer = CalAddress::parse("alice@example.com").unwrap();
        store
            .set_busy(&bob, vec![BusyInterval { range: TimeRange::new(1_000, 2_000), status: BusyStatus::Busy }])
            .await;

        let ctx = AuthContext::new(1, vec![]);
        let results = federate_free_busy(
            &directory,
            &config,
            &store,
            &ischedule,
            &ctx,
            &organizer,
            &[bob.clone()],
            TimeRange::new(0, 3_000),
        )
        .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].recipient, bob);
        assert_eq!(results[0].request_status, ScheduleStatusCode::Success.to_request_status());
        assert!(results[0].calendar_data.as_ref().unwrap().contains("FREEBUSY"));
    }

    #[tokio::test]
    async fn unresolvable_local_domain_attendee_is_no_user() {
        let directory = FakeDirectory::default();
        let mut config = SchedulingConfig::default();
        config.local_domains.insert("example.com".to_string());
        let store = FakeEventStore::default();
        let ischedule = FakeIScheduleTransport::default();
        let organizer = CalAddress::parse("alice@example.com").unwrap();
        let ghost = CalAddress::parse("ghost@example.com").unwrap();
        let ctx = AuthContext::new(1, vec![]);

        let results = federate_free_busy(
            &directory,
            &config,
            &store,
            &ischedule,
            &ctx,
            &organizer,
            &[ghost.clone()],
            TimeRange::new(0, 1),
        )
        .await;

        assert_eq!(results[0].request_status, ScheduleStatusCode::NoUser.to_request_status());
    }

    #[tokio::test]
    async fn external_attendee_is_declined() {
        let directory = FakeDirectory::default();
        let config = SchedulingConfig::default();
        let store = FakeEventStore::default();
        let ischedule = FakeIScheduleTransport::default();
        let organizer = CalAddress::parse("alice@example.com").unwrap();
        let carol = CalAddress::parse("carol@other.test").unwrap();
        let ctx = AuthContext::new(1, vec![]);

        let results = federate_free_busy(
            &directory,
            &config,
            &store,
            &ischedule,
            &ctx,
            &organizer,
            &[carol.clone()],
            TimeRange::new(0, 1),
        )
        .await;

        assert_eq!(results[0].request_status, ScheduleStatusCode::TempFail.to_request_status());
    }
}

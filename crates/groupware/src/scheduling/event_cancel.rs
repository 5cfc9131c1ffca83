//! Full cancellation (organizer side) and full decline (attendee side) of
//! an entire scheduling object (spec C4 `FullCancel` / C5 `FullDecline`).

use crate::scheduling::{
    InstanceId, ItipError, ItipMessage, ItipSnapshots,
    attendee::attendee_decline,
    itip::{itip_add_tz, itip_build_envelope, itip_finalize},
    snapshot::itip_snapshot,
};
use ahash::AHashSet;
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarMethod, ICalendarProperty,
        ICalendarStatus, ICalendarValue,
    },
};
use std::fmt::Display;

/// Cancels `ical` entirely. If the caller is the organizer this sends
/// `CANCEL` to every server-scheduled attendee; if the caller is an
/// attendee this sends `REPLY;PARTSTAT=DECLINED` for every instance it
/// still has standing in.
pub fn itip_cancel(
    prod_id: &str,
    ical: &mut ICalendar,
    account_emails: &[String],
) -> Result<ItipMessage, ItipError> {
    let itip = itip_snapshot(ical, account_emails, false)?;
    let dt_stamp = PartialDateTime::now();
    let mut message = ICalendar {
        components: Vec::with_capacity(2),
    };

    if itip.organizer.email.is_local {
        let mut comp = itip_build_envelope(ICalendarMethod::Cancel, prod_id);
        comp.component_ids.push(1);
        message.components.push(comp);

        let mut recipients = AHashSet::new();
        let mut cancel_guests = AHashSet::new();
        let mut component_type = &ICalendarComponentType::VEvent;
        let mut increment_sequences = Vec::new();
        let mut sequence = 0;
        for (instance_id, comp) in &itip.components {
            component_type = &comp.comp.component_type;
            for attendee in &comp.attendees {
                if attendee.send_update_messages() {
                    recipients.insert(attendee.email.email.clone());
                }
                cancel_guests.insert(attendee.email.email.clone());
            }

            increment_sequences.push(comp.comp_id);
            if instance_id == &InstanceId::Main {
                sequence = comp.sequence.unwrap_or_default() + 1;
            }
        }

        if !recipients.is_empty() && component_type != &ICalendarComponentType::VFreebusy {
            message.components.push(build_cancel_component(
                component_type.clone(),
                &itip,
                sequence,
                dt_stamp,
                cancel_guests.iter(),
            ));
            let message = ItipMessage {
                method: ICalendarMethod::Cancel,
                from: itip.organizer.email.email,
                from_organizer: true,
                to: recipients.into_iter().collect(),
                changed_properties: vec![],
                message,
            };

            itip_finalize(ical, &increment_sequences);

            Ok(message)
        } else {
            Err(ItipError::NothingToSend)
        }
    } else {
        message.components.push(itip_build_envelope(ICalendarMethod::Reply, prod_id));

        let mut mail_from = None;
        let mut email_rcpt = AHashSet::new();
        for (instance_id, comp) in &itip.components {
            if let Some((cancel_comp, attendee_email)) =
                attendee_decline(instance_id, &itip, comp, &dt_stamp, &mut email_rcpt, false)
            {
                let comp_id = message.components.len() as u32;
                message.components[0].component_ids.push(comp_id);
                message.components.push(cancel_comp);
                mail_from = Some(attendee_email.email.clone());
            }
        }

        if let Some(from) = mail_from {
            itip_add_tz(&mut message, ical);

            email_rcpt.insert(itip.organizer.email.email.as_str());
            let message = ItipMessage {
                method: ICalendarMethod::Reply,
                from,
                from_organizer: false,
                to: email_rcpt.into_iter().map(|e| e.to_string()).collect(),
                changed_properties: vec![],
                message,
            };

            itip_finalize(ical, &[]);

            Ok(message)
        } else {
            Err(ItipError::NothingToSend)
        }
    }
}

/// Builds the `STATUS:CANCELLED` component a `CANCEL` message carries,
/// with just enough of the original event (`UID`, timing, organizer) for
/// the recipient's client to identify what's being cancelled.
pub(crate) fn build_cancel_component<T, I>(
    component_type: ICalendarComponentType,
    itip: &ItipSnapshots<'_>,
    sequence: i64,
    dt_stamp: PartialDateTime,
    cancel_guests: T,
) -> ICalendarComponent
where
    T: Iterator<Item = I>,
    I: Display,
{
    let mut cancel_comp = ICalendarComponent {
        component_type,
        entries: Vec::with_capacity(7),
        component_ids: vec![],
    };
    cancel_comp.add_property(
        ICalendarProperty::Status,
        ICalendarValue::Status(ICalendarStatus::Cancelled),
    );
    cancel_comp.add_dtstamp(dt_stamp);
    cancel_comp.add_sequence(sequence);
    cancel_comp.add_uid(itip.uid);
    cancel_comp.add_property(
        ICalendarProperty::Organizer,
        ICalendarValue::Text(itip.organizer.email.to_string()),
    );

    for email in cancel_guests {
        cancel_comp.add_property(ICalendarProperty::Attendee, ICalendarValue::Text(email.to_string()));
    }
    cancel_comp
}

//! Entry point for a local edit to an existing scheduling object (spec C4's
//! organizer-side update path and C5's attendee-side reply path, scenarios
//! S2-S4): diffs the stored and incoming snapshots and assembles whatever
//! `REQUEST`/`REPLY`/`CANCEL`/`ADD` messages the change requires.

use crate::scheduling::{
    ItipError, ItipMessage,
    attendee::attendee_handle_update,
    itip::itip_finalize,
    organizer::organizer_handle_update,
    snapshot::itip_snapshot,
};
use calcard::icalendar::ICalendar;

/// Organizer-side edit (spec C4): moves `old_ical` to `new_ical` and emits
/// the `REQUEST`/`CANCEL`/`ADD` set the diff requires. `new_ical`'s
/// `SEQUENCE` is bumped in place for every instance an emitted message
/// touches.
pub fn itip_update(
    prod_id: &str,
    old_ical: &ICalendar,
    new_ical: &mut ICalendar,
    account_emails: &[String],
) -> Result<Vec<ItipMessage<ICalendar>>, ItipError> {
    let old_itip = itip_snapshot(old_ical, account_emails, false)?;
    let new_itip = itip_snapshot(new_ical, account_emails, false)?;

    if !new_itip.organizer.is_server_scheduling {
        return Err(ItipError::OtherSchedulingAgent);
    }
    if !new_itip.organizer.email.is_local {
        return Err(ItipError::NotOrganizer);
    }

    let mut increment_sequences = Vec::new();
    let messages = organizer_handle_update(
        prod_id,
        old_ical,
        new_ical,
        old_itip,
        new_itip,
        &mut increment_sequences,
    )?;
    itip_finalize(new_ical, &increment_sequences);
    Ok(messages)
}

/// Attendee-side edit (spec C5): the local attendee changed `PARTSTAT`,
/// delegated, or dropped an instance on their own copy; emits the `REPLY`
/// (plus any delegate `REQUEST`) the diff requires. Unlike the organizer
/// path, `SEQUENCE` is never touched here — only the organizer owns it.
pub fn itip_reply(
    prod_id: &str,
    old_ical: &ICalendar,
    new_ical: &ICalendar,
    account_emails: &[String],
) -> Result<Vec<ItipMessage<ICalendar>>, ItipError> {
    let old_itip = itip_snapshot(old_ical, account_emails, false)?;
    let new_itip = itip_snapshot(new_ical, account_emails, false)?;

    if new_itip.organizer.email.is_local {
        return Err(ItipError::SenderIsOrganizer);
    }

    attendee_handle_update(prod_id, new_ical, old_itip, new_itip)
}

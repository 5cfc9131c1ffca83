//! Entry point for a brand-new organizer-authored scheduling object (spec
//! C4's initial `REQUEST`, scenario S1).

use crate::scheduling::{ItipError, ItipMessage, itip::itip_finalize, organizer::organizer_request_full, snapshot::itip_snapshot};
use calcard::icalendar::ICalendar;

pub fn itip_create(
    prod_id: &str,
    ical: &mut ICalendar,
    account_emails: &[String],
) -> Result<Vec<ItipMessage<ICalendar>>, ItipError> {
    let itip = itip_snapshot(ical, account_emails, false)?;
    if !itip.organizer.is_server_scheduling {
        Err(ItipError::OtherSchedulingAgent)
    } else if !itip.organizer.email.is_local {
        Err(ItipError::NotOrganizer)
    } else {
        let mut sequences = Vec::new();
        organizer_request_full(prod_id, ical, &itip, Some(&mut sequences), true)
            .inspect(|_| itip_finalize(ical, &sequences))
    }
}

//! iTIP message assembly: building the `VCALENDAR` envelope, exporting a
//! component for a specific recipient, and the bookkeeping (`SEQUENCE`
//! bump, timezone copying) every outbound message needs (spec C3).

use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarEntry, ICalendarMethod,
        ICalendarParameter, ICalendarParameterName, ICalendarParameterValue,
        ICalendarParticipationStatus, ICalendarProperty, ICalendarValue,
    },
};

/// The `VCALENDAR` header component every iTIP message starts with:
/// `VERSION`, `PRODID` and `METHOD`.
pub(crate) fn itip_build_envelope(method: ICalendarMethod, prod_id: &str) -> ICalendarComponent {
    ICalendarComponent {
        component_type: ICalendarComponentType::VCalendar,
        entries: vec![
            ICalendarEntry {
                name: ICalendarProperty::Version,
                params: vec![],
                values: vec![ICalendarValue::Text("2.0".to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Prodid,
                params: vec![],
                values: vec![ICalendarValue::Text(prod_id.to_string())],
            },
            ICalendarEntry {
                name: ICalendarProperty::Method,
                params: vec![],
                values: vec![ICalendarValue::Method(method)],
            },
        ],
        component_ids: Default::default(),
    }
}

pub(crate) enum ItipExportAs<'x> {
    /// Organizer sending to every attendee: reset every `ATTENDEE`'s
    /// `PARTSTAT` to `partstat` (normally `NEEDS-ACTION`).
    Organizer(&'x ICalendarParticipationStatus),
    /// Attendee replying, or organizer sending a partial update to a
    /// specific set of attendee entries: keep only the named `ATTENDEE`
    /// entry ids plus `ORGANIZER`.
    Attendee(Vec<u16>),
}

/// Produces the copy of `component` that goes out on the wire: fresh
/// `DTSTAMP`/`SEQUENCE`/`UID`, scheduling parameters stripped
/// (`SCHEDULE-STATUS`/`SCHEDULE-AGENT`/`SCHEDULE-FORCE-SEND` never leave
/// this node), and only the properties the recipient is allowed to see.
pub(crate) fn itip_export_component(
    component: &ICalendarComponent,
    uid: &str,
    dt_stamp: &PartialDateTime,
    sequence: i64,
    export_as: ItipExportAs<'_>,
) -> ICalendarComponent {
    let is_todo = component.component_type == ICalendarComponentType::VTodo;
    let mut comp = ICalendarComponent {
        component_type: component.component_type.clone(),
        entries: Vec::with_capacity(component.entries.len() + 1),
        component_ids: Default::default(),
    };

    comp.add_dtstamp(dt_stamp.clone());
    comp.add_sequence(sequence);
    comp.add_uid(uid);

    for (entry_id, entry) in component.entries.iter().enumerate() {
        match (&entry.name, &export_as) {
            (
                ICalendarProperty::Organizer | ICalendarProperty::Attendee,
                ItipExportAs::Organizer(partstat),
            ) => {
                let mut new_entry = ICalendarEntry {
                    name: entry.name.clone(),
                    params: Vec::with_capacity(entry.params.len()),
                    values: entry.values.clone(),
                };
                let mut has_partstat = false;
                let mut rsvp = true;

                for param in &entry.params {
                    match &param.name {
                        ICalendarParameterName::ScheduleStatus
                        | ICalendarParameterName::ScheduleAgent
                        | ICalendarParameterName::ScheduleForceSend => {}
                        _ => {
                            match &param.name {
                                ICalendarParameterName::Rsvp => {
                                    rsvp = !matches!(param.value, ICalendarParameterValue::Bool(false));
                                }
                                ICalendarParameterName::Partstat => {
                                    has_partstat = true;
                                }
                                _ => {}
                            }
                            new_entry.params.push(param.clone());
                        }
                    }
                }

                if !has_partstat && rsvp && entry.name == ICalendarProperty::Attendee {
                    new_entry
                        .params
                        .push(ICalendarParameter::partstat((*partstat).clone()));
                }

                comp.entries.push(new_entry);
            }
            (
                ICalendarProperty::Organizer | ICalendarProperty::Attendee,
                ItipExportAs::Attendee(attendee_entry_ids),
            ) => {
                if attendee_entry_ids.contains(&(entry_id as u16))
                    || entry.name == ICalendarProperty::Organizer
                {
                    comp.entries.push(ICalendarEntry {
                        name: entry.name.clone(),
                        params: entry
                            .params
                            .iter()
                            .filter(|param| {
                                !matches!(
                                    &param.name,
                                    ICalendarParameterName::ScheduleStatus
                                        | ICalendarParameterName::ScheduleAgent
                                        | ICalendarParameterName::ScheduleForceSend
                                )
                            })
                            .cloned()
                            .collect(),
                        values: entry.values.clone(),
                    });
                }
            }
            (
                ICalendarProperty::RequestStatus
                | ICalendarProperty::Dtstamp
                | ICalendarProperty::Sequence
                | ICalendarProperty::Uid,
                _,
            ) => {}
            (_, ItipExportAs::Organizer(_))
            | (
                ICalendarProperty::RecurrenceId
                | ICalendarProperty::Dtstart
                | ICalendarProperty::Dtend
                | ICalendarProperty::Duration
                | ICalendarProperty::Due
                | ICalendarProperty::Description
                | ICalendarProperty::Summary,
                _,
            ) => {
                comp.entries.push(entry.clone());
            }
            (
                ICalendarProperty::Status
                | ICalendarProperty::PercentComplete
                | ICalendarProperty::Completed,
                _,
            ) if is_todo => {
                comp.entries.push(entry.clone());
            }
            _ => {}
        }
    }

    if matches!(export_as, ItipExportAs::Attendee(_)) {
        comp.entries.push(ICalendarEntry {
            name: ICalendarProperty::RequestStatus,
            params: vec![],
            values: vec![
                ICalendarValue::Text("2.0".to_string()),
                ICalendarValue::Text("Success".to_string()),
            ],
        });
    }

    comp
}

/// Bumps `SEQUENCE` on every scheduling object in `scheduling_object_ids`
/// and strips `SCHEDULE-FORCE-SEND` now that it has served its purpose,
/// applied to the *stored* event once its outbound messages have been
/// built (spec C4 step "persist").
pub(crate) fn itip_finalize(ical: &mut ICalendar, scheduling_object_ids: &[u16]) {
    for comp in ical.components.iter_mut() {
        if comp.component_type.is_scheduling_object() {
            for entry in comp.entries.iter_mut() {
                if matches!(
                    entry.name,
                    ICalendarProperty::Organizer | ICalendarProperty::Attendee
                ) {
                    entry
                        .params
                        .retain(|param| !matches!(param.name, ICalendarParameterName::ScheduleForceSend));
                }
            }
        }
    }

    for comp_id in scheduling_object_ids {
        let comp = &mut ical.components[*comp_id as usize];
        let mut found_sequence = false;
        for entry in &mut comp.entries {
            if entry.name == ICalendarProperty::Sequence {
                if let Some(ICalendarValue::Integer(seq)) = entry.values.first_mut() {
                    *seq += 1;
                } else {
                    entry.values = vec![ICalendarValue::Integer(1)];
                }
                found_sequence = true;
                break;
            }
        }
        if !found_sequence {
            comp.add_sequence(1);
        }
    }
}

/// Copies `VTIMEZONE` components referenced by `message` from `ical`, if
/// `message` doesn't already carry its own (spec C3's timezone-inlining
/// rule: a message is self-contained).
pub(crate) fn itip_add_tz(message: &mut ICalendar, ical: &ICalendar) {
    let mut has_timezones = false;

    if message
        .components
        .iter()
        .any(|c| {
            has_timezones = has_timezones || c.component_type == ICalendarComponentType::VTimezone;
            !has_timezones
                && c.entries.iter().any(|e| {
                    e.params
                        .iter()
                        .any(|p| matches!(p.name, ICalendarParameterName::Tzid))
                })
        })
        && !has_timezones
    {
        message.copy_timezones(ical);
    }
}

/// Properties an attendee's `REPLY` is allowed to change on a component it
/// doesn't own (spec C5 `CannotModifyProperty`): everything else must come
/// from the organizer.
#[inline]
pub(crate) fn can_attendee_modify_property(
    component_type: &ICalendarComponentType,
    property: &ICalendarProperty,
) -> bool {
    match component_type {
        ICalendarComponentType::VEvent | ICalendarComponentType::VJournal => matches!(
            property,
            ICalendarProperty::Exdate
                | ICalendarProperty::Summary
                | ICalendarProperty::Description
                | ICalendarProperty::Comment
        ),
        ICalendarComponentType::VTodo => matches!(
            property,
            ICalendarProperty::Exdate
                | ICalendarProperty::Summary
                | ICalendarProperty::Description
                | ICalendarProperty::Status
                | ICalendarProperty::PercentComplete
                | ICalendarProperty::Completed
                | ICalendarProperty::Comment
        ),
        _ => false,
    }
}

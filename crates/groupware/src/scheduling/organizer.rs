//! Organizer-side request planning (spec C4): decides, for a changed event,
//! which attendees get a full `REQUEST`, which get a scoped per-instance
//! update, and which get a `CANCEL`/`ADD`.

use crate::scheduling::{
    InstanceId, ItipError, ItipMessage, ItipSnapshots, event_cancel::build_cancel_component,
    is_cancelled,
    itip::{ItipExportAs, itip_add_tz, itip_build_envelope, itip_export_component},
};
use ahash::{AHashMap, AHashSet};
use calcard::{
    common::PartialDateTime,
    icalendar::{
        ICalendar, ICalendarComponent, ICalendarComponentType, ICalendarMethod,
        ICalendarParticipationStatus, ICalendarProperty,
    },
};
use std::collections::hash_map::Entry;

/// Diffs `old_ical`/`new_ical` and builds the set of outbound messages an
/// organizer-side edit requires. `increment_sequences` collects the
/// component ids whose stored `SEQUENCE` must be bumped once these messages
/// are sent (spec C4's sequence-bump side effect).
pub(crate) fn organizer_handle_update(
    prod_id: &str,
    old_ical: &ICalendar,
    new_ical: &ICalendar,
    old_itip: ItipSnapshots<'_>,
    new_itip: ItipSnapshots<'_>,
    increment_sequences: &mut Vec<u16>,
) -> Result<Vec<ItipMessage<ICalendar>>, ItipError> {
    let mut changed_instances: Vec<(&InstanceId, &str, &ICalendarMethod)> = Vec::new();
    let mut increment_sequence = false;
    let mut changed_properties = AHashSet::new();

    for (instance_id, instance) in &new_itip.components {
        if let Some(old_instance) = old_itip.components.get(instance_id) {
            let changed_entries = instance.entries != old_instance.entries;
            let changed_attendees = instance.attendees != old_instance.attendees;

            if changed_entries || changed_attendees {
                if changed_entries {
                    for entry in instance.entries.symmetric_difference(&old_instance.entries) {
                        increment_sequence = increment_sequence
                            || matches!(
                                entry.name,
                                ICalendarProperty::Dtstart
                                    | ICalendarProperty::Dtend
                                    | ICalendarProperty::Duration
                                    | ICalendarProperty::Due
                                    | ICalendarProperty::Rrule
                                    | ICalendarProperty::Rdate
                                    | ICalendarProperty::Exdate
                                    | ICalendarProperty::Status
                                    | ICalendarProperty::Location
                            );
                        changed_properties.insert(entry.name);
                    }
                }

                if changed_attendees {
                    changed_instances.extend(
                        old_instance
                            .external_attendees()
                            .filter(|attendee| attendee.send_update_messages())
                            .map(|attendee| attendee.email.email.as_str())
                            .collect::<AHashSet<_>>()
                            .difference(
                                &instance
                                    .external_attendees()
                                    .map(|attendee| attendee.email.email.as_str())
                                    .collect::<AHashSet<_>>(),
                            )
                            .map(|attendee| (instance_id, *attendee, &ICalendarMethod::Cancel)),
                    );
                    changed_properties.insert(&ICalendarProperty::Attendee);
                    increment_sequence = true;
                }

                changed_instances.extend(instance.attendees.iter().filter_map(|attendee| {
                    attendee
                        .send_update_messages()
                        .then_some((instance_id, attendee.email.email.as_str(), &ICalendarMethod::Request))
                }));
            }
        } else if instance_id != &InstanceId::Main {
            changed_properties.insert(&ICalendarProperty::Exdate);
            let method = if is_cancelled(instance.comp) {
                &ICalendarMethod::Cancel
            } else {
                &ICalendarMethod::Add
            };

            changed_instances.extend(instance.attendees.iter().filter_map(|attendee| {
                attendee
                    .send_invite_messages()
                    .then_some((instance_id, attendee.email.email.as_str(), method))
            }));

            increment_sequence = true;
        } else {
            return Err(ItipError::CannotModifyInstance);
        }
    }

    for (instance_id, old_instance) in &old_itip.components {
        if !new_itip.components.contains_key(instance_id) {
            if instance_id != &InstanceId::Main {
                changed_instances.extend(old_instance.attendees.iter().filter_map(|attendee| {
                    attendee
                        .send_update_messages()
                        .then_some((instance_id, attendee.email.email.as_str(), &ICalendarMethod::Cancel))
                }));
                changed_properties.insert(&ICalendarProperty::Exdate);
                increment_sequence = true;
            } else {
                return Err(ItipError::CannotModifyInstance);
            }
        }
    }

    if changed_instances.is_empty() {
        return Err(ItipError::NothingToSend);
    }

    // Attendees who'd otherwise get several partial messages get one full
    // update instead; an attendee getting a full update for the main
    // instance never also gets a partial one.
    let mut send_full_update: AHashSet<&str> = AHashSet::new();
    let mut send_partial_update: AHashMap<&str, AHashMap<&ICalendarMethod, Vec<&InstanceId>>> =
        AHashMap::new();
    for (instance_id, email, method) in &changed_instances {
        if *instance_id == &InstanceId::Main && *method == &ICalendarMethod::Request {
            send_full_update.insert(*email);
            send_partial_update.remove(email);
        } else if !send_full_update.contains(email) {
            match send_partial_update.entry(email) {
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    let is_empty = entry.is_empty();
                    match entry.entry(method) {
                        Entry::Occupied(mut method_entry) => {
                            method_entry.get_mut().push(*instance_id);
                        }
                        Entry::Vacant(method_entry) if is_empty => {
                            method_entry.insert(vec![*instance_id]);
                        }
                        _ => {
                            send_full_update.insert(*email);
                            send_partial_update.remove(email);
                        }
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(AHashMap::from_iter([(*method, vec![*instance_id])]));
                }
            }
        }
    }

    let mut messages = Vec::new();
    if !send_full_update.is_empty() {
        match organizer_request_full(
            prod_id,
            new_ical,
            &new_itip,
            increment_sequence.then_some(increment_sequences),
            false,
        ) {
            Ok(messages_) => {
                for message in messages_ {
                    messages.push(message);
                }
            }
            Err(err) => {
                if send_partial_update.is_empty() {
                    return Err(err);
                }
            }
        }
    }

    if !send_partial_update.is_empty() {
        let mut updates: AHashMap<(&ICalendarMethod, Vec<&InstanceId>), Vec<&str>> = AHashMap::new();
        for (email, partial_updates) in send_partial_update {
            for (method, mut instances) in partial_updates {
                instances.sort_unstable();
                instances.dedup();
                updates.entry((method, instances)).or_default().push(email);
            }
        }

        let dt_stamp = PartialDateTime::now();
        for ((method, instances), emails) in updates {
            let (mut ical, mut itip, is_cancel) = if matches!(method, ICalendarMethod::Cancel) {
                (old_ical, &old_itip, true)
            } else {
                (new_ical, &new_itip, false)
            };

            let mut message = ICalendar {
                components: Vec::with_capacity(instances.len() + 1),
            };
            message.components.push(itip_build_envelope(method.clone(), prod_id));

            let mut new_increment_sequences = Vec::new();

            for instance_id in instances {
                let comp = match itip.components.get(instance_id) {
                    Some(comp) => comp,
                    None => {
                        ical = new_ical;
                        itip = &new_itip;
                        itip.components.get(instance_id).unwrap()
                    }
                };
                let sequence = if increment_sequence {
                    comp.sequence.unwrap_or_default() + 1
                } else {
                    comp.sequence.unwrap_or_default()
                };
                let orig_component = comp.comp;
                let component = if !is_cancel {
                    if increment_sequence {
                        new_increment_sequences.push(comp.comp_id);
                    }
                    itip_export_component(
                        orig_component,
                        itip.uid,
                        &dt_stamp,
                        sequence,
                        ItipExportAs::Organizer(&ICalendarParticipationStatus::NeedsAction),
                    )
                } else {
                    build_cancel_component(
                        orig_component.component_type.clone(),
                        itip,
                        sequence,
                        dt_stamp.clone(),
                        emails.iter().copied(),
                    )
                };

                let comp_id = message.components.len() as u32;
                message.components.push(component);
                message.components[0].component_ids.push(comp_id);
            }
            increment_sequences.extend(new_increment_sequences);

            itip_add_tz(&mut message, ical);

            messages.push(ItipMessage {
                method: method.clone(),
                from: itip.organizer.email.email.clone(),
                from_organizer: true,
                to: emails.into_iter().map(|e| e.to_string()).collect(),
                changed_properties: changed_properties.iter().map(|p| (*p).clone()).collect(),
                message,
            });
        }
    }

    Ok(messages)
}

/// Builds a full `REQUEST` for every attendee across every instance (spec
/// C4's `FullUpdate`). Used both for a brand-new event (`is_first_request`)
/// and as the fallback when a change touches the main instance.
pub(crate) fn organizer_request_full(
    prod_id: &str,
    ical: &ICalendar,
    itip: &ItipSnapshots<'_>,
    mut increment_sequence: Option<&mut Vec<u16>>,
    is_first_request: bool,
) -> Result<Vec<ItipMessage<ICalendar>>, ItipError> {
    let dt_stamp = PartialDateTime::now();
    let mut message = ICalendar {
        components: vec![ICalendarComponent::default(); ical.components.len()],
    };
    message.components[0] = itip_build_envelope(ICalendarMethod::Request, prod_id);

    let mut recipients = AHashSet::new();
    let mut copy_components = AHashSet::new();

    for comp in itip.components.values() {
        if comp.attendees.is_empty() {
            continue;
        }

        let sequence = if let Some(increment_sequence) = &mut increment_sequence {
            increment_sequence.push(comp.comp_id);
            comp.sequence.unwrap_or_default() + 1
        } else {
            comp.sequence.unwrap_or_default()
        };
        let orig_component = &ical.components[comp.comp_id as usize];
        let mut component = itip_export_component(
            orig_component,
            itip.uid,
            &dt_stamp,
            sequence,
            ItipExportAs::Organizer(&ICalendarParticipationStatus::NeedsAction),
        );

        if is_first_request {
            for sub_comp_id in &orig_component.component_ids {
                if matches!(
                    ical.components[*sub_comp_id as usize].component_type,
                    ICalendarComponentType::VAlarm
                ) {
                    copy_components.insert(*sub_comp_id);
                    component.component_ids.push(*sub_comp_id);
                }
            }
        }

        message.components[comp.comp_id as usize] = component;
        message.components[0].component_ids.push(comp.comp_id as u32);

        for attendee in &comp.attendees {
            if (is_first_request && attendee.send_invite_messages())
                || (!is_first_request && attendee.send_update_messages())
            {
                recipients.insert(&attendee.email.email);
            }
        }
    }

    for (comp_id, comp) in ical.components.iter().enumerate() {
        if matches!(comp.component_type, ICalendarComponentType::VTimezone) {
            copy_components.extend(comp.component_ids.iter().copied());
            message.components[0].component_ids.push(comp_id as u32);
        } else if !copy_components.contains(&(comp_id as u32)) {
            continue;
        }
        message.components[comp_id] = comp.clone();
    }
    message.components[0].component_ids.sort_unstable();

    if !recipients.is_empty() {
        Ok(vec![ItipMessage {
            method: ICalendarMethod::Request,
            from: itip.organizer.email.email.clone(),
            from_organizer: true,
            to: recipients.into_iter().map(|e| e.to_string()).collect(),
            changed_properties: vec![],
            message,
        }])
    } else {
        Err(ItipError::NothingToSend)
    }
}

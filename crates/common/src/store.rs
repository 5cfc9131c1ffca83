use calcard::icalendar::ICalendar;
use types::{address::CalAddress, DocumentId, TimeRange};

/// A scheduling object as the calendar store holds it: the iCalendar body
/// plus the identifiers scheduling needs to find it again and to merge a
/// later delivery into it (C6).
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub document_id: DocumentId,
    pub ical: ICalendar,
}

/// Read/write access to a calendar user's events and scheduling inbox. The
/// full calendar store (locking, properties, sync tokens, sharing) is out
/// of scope; this is the slice C6 and C7 touch.
#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    /// Looks up the stored event with `uid` in `account`'s calendar, if any.
    /// A `REPLY`/`CANCEL` that names a UID with no match here is a 5.2
    /// `PermFail` (spec §4.6).
    async fn find_by_uid(&self, account: &CalAddress, uid: &str) -> trc::Result<Option<StoredEvent>>;

    /// Creates a new stored event (an incoming `REQUEST` with no prior UID
    /// match).
    async fn create(&self, account: &CalAddress, ical: ICalendar) -> trc::Result<DocumentId>;

    /// Overwrites a stored event after C6 merges a delivery into it.
    async fn save(&self, account: &CalAddress, event: StoredEvent) -> trc::Result<()>;

    /// Deletes the stored event entirely (a `CANCEL` of the whole series).
    async fn delete(&self, account: &CalAddress, document_id: DocumentId) -> trc::Result<()>;

    /// Drops a scheduling notification into `account`'s Scheduling Inbox
    /// collection, independent of whether the merge into the calendar
    /// itself succeeded — attendees/organizers always get a record of what
    /// arrived.
    async fn write_inbox_item(&self, account: &CalAddress, ical: ICalendar) -> trc::Result<()>;

    /// Every busy/tentative/confirmed interval of `account`'s calendar that
    /// overlaps `window`, for the local half of C7's `VFREEBUSY` federation.
    async fn busy_time(
        &self,
        account: &CalAddress,
        window: TimeRange,
    ) -> trc::Result<Vec<BusyInterval>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub range: TimeRange,
    pub status: BusyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyStatus {
    Busy,
    BusyTentative,
    BusyUnavailable,
}

#[cfg(any(test, feature = "test_mode"))]
pub mod test_support {
    use super::*;
    use ahash::AHashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeEventStore {
        events: Mutex<AHashMap<(String, DocumentId), StoredEvent>>,
        inbox: Mutex<AHashMap<String, Vec<ICalendar>>>,
        busy: Mutex<AHashMap<String, Vec<BusyInterval>>>,
        next_id: Mutex<DocumentId>,
    }

    impl FakeEventStore {
        pub async fn inbox_of(&self, account: &CalAddress) -> Vec<ICalendar> {
            self.inbox
                .lock()
                .await
                .get(account.as_str())
                .cloned()
                .unwrap_or_default()
        }

        pub async fn set_busy(&self, account: &CalAddress, intervals: Vec<BusyInterval>) {
            self.busy
                .lock()
                .await
                .insert(account.as_str().to_string(), intervals);
        }
    }

    #[async_trait::async_trait]
    impl EventStore for FakeEventStore {
        async fn find_by_uid(
            &self,
            account: &CalAddress,
            uid: &str,
        ) -> trc::Result<Option<StoredEvent>> {
            use calcard::icalendar::{ICalendarProperty, ICalendarValue};

            let events = self.events.lock().await;
            Ok(events
                .iter()
                .find(|((acc, _), event)| {
                    acc == account.as_str()
                        && event.ical.components.iter().any(|c| {
                            c.entries.iter().any(|entry| {
                                entry.name == ICalendarProperty::Uid
                                    && entry
                                        .values
                                        .iter()
                                        .any(|v| matches!(v, ICalendarValue::Text(t) if t == uid))
                            })
                        })
                })
                .map(|(_, event)| event.clone()))
        }

        async fn create(&self, account: &CalAddress, ical: ICalendar) -> trc::Result<DocumentId> {
            let mut next_id = self.next_id.lock().await;
            let id = *next_id;
            *next_id += 1;
            self.events
                .lock()
                .await
                .insert((account.as_str().to_string(), id), StoredEvent { document_id: id, ical });
            Ok(id)
        }

        async fn save(&self, account: &CalAddress, event: StoredEvent) -> trc::Result<()> {
            self.events
                .lock()
                .await
                .insert((account.as_str().to_string(), event.document_id), event);
            Ok(())
        }

        async fn delete(&self, account: &CalAddress, document_id: DocumentId) -> trc::Result<()> {
            self.events
                .lock()
                .await
                .remove(&(account.as_str().to_string(), document_id));
            Ok(())
        }

        async fn write_inbox_item(&self, account: &CalAddress, ical: ICalendar) -> trc::Result<()> {
            self.inbox
                .lock()
                .await
                .entry(account.as_str().to_string())
                .or_default()
                .push(ical);
            Ok(())
        }

        async fn busy_time(
            &self,
            account: &CalAddress,
            window: TimeRange,
        ) -> trc::Result<Vec<BusyInterval>> {
            Ok(self
                .busy
                .lock()
                .await
                .get(account.as_str())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|i| window.overlaps(i.range.start, i.range.end))
                .collect())
        }
    }
}

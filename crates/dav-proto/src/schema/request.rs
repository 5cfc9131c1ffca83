use types::TimeRange;

/// A `CALDAV:free-busy-query` REPORT body (RFC 4791 §7.10): an optional
/// `time-range` restricting the window a `VFREEBUSY` is computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeBusyQuery {
    pub range: Option<TimeRange>,
}

impl FreeBusyQuery {
    pub fn window(&self) -> TimeRange {
        self.range.unwrap_or_default()
    }
}

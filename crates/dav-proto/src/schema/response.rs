use std::fmt::{self, Display};

use types::address::CalAddress;

use crate::schema::Href;

/// Body of an iSchedule/iMIP-free-busy POST response, or of a
/// `CALDAV:schedule-response` returned from a `POST` against a scheduling
/// Outbox (RFC 6638 §3.2.1, Appendix C.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResponse {
    pub items: Vec<ScheduleResponseItem>,
}

/// One recipient's outcome within a `ScheduleResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleResponseItem {
    pub recipient: CalAddress,
    /// The `REQUEST-STATUS` text, e.g. `"2.0;Success"` or `"3.7;No user"`.
    pub request_status: String,
    /// Present for a free-busy reply: the computed `VFREEBUSY` text.
    pub calendar_data: Option<String>,
}

impl Display for ScheduleResponseItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::responses::{XmlCdataEscape, XmlEscape};

        write!(f, "<B:response>")?;
        write!(
            f,
            "<B:recipient>{}</B:recipient>",
            Href(self.recipient.to_string())
        )?;

        write!(f, "<B:request-status>")?;
        self.request_status.write_escaped_to(f)?;
        write!(f, "</B:request-status>")?;

        if let Some(calendar_data) = &self.calendar_data {
            write!(f, "<B:calendar-data>")?;
            calendar_data.write_cdata_escaped_to(f)?;
            write!(f, "</B:calendar-data>")?;
        }
        write!(f, "</B:response>")
    }
}

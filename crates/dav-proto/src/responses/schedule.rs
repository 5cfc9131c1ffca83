use std::fmt::Display;

use crate::schema::{response::ScheduleResponse, Namespaces};

const NAMESPACE: Namespaces = Namespaces { caldav: true };

impl Display for ScheduleResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        write!(f, "<B:schedule-response {NAMESPACE}>")?;
        for item in &self.items {
            write!(f, "{item}")?;
        }
        write!(f, "</B:schedule-response>")
    }
}

pub mod request;
pub mod response;

use std::fmt::Display;

/// `href` element content: a server-relative path, e.g. `/cal/jdoe/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Href(pub String);

impl Display for Href {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use crate::responses::XmlEscape;

        write!(f, "<A:href>")?;
        self.0.write_escaped_to(f)?;
        write!(f, "</A:href>")
    }
}

/// Namespace declarations for the root element of a response document.
/// Only the CalDAV scheduling namespace is ever needed here; WebDAV's
/// base `DAV:` namespace is bound to the `A:` prefix unconditionally.
#[derive(Debug, Clone, Copy)]
pub struct Namespaces {
    pub caldav: bool,
}

impl Display for Namespaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xmlns:A=\"DAV:\"")?;
        if self.caldav {
            write!(f, " xmlns:B=\"urn:ietf:params:xml:ns:caldav\"")?;
        }
        Ok(())
    }
}

//! Wire-level schema for the external interfaces of spec §6 that are in
//! scope here: the iSchedule POST request/response body (RFC 6638 Appendix
//! C), a free-busy query, and the iSchedule capabilities/domain-key
//! documents. Trimmed from the full WebDAV/CalDAV/CardDAV protocol surface
//! to the scheduling-relevant slice; no HTTP server sits behind it.

pub mod capabilities;
pub mod responses;
pub mod schema;

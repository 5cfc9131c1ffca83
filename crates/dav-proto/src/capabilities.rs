//! Document builders for the two read-only iSchedule GET endpoints (spec
//! §6). No server sits behind these; they exist so the scheduling engine
//! owns the wire contract it would otherwise have to re-derive at the HTTP
//! layer.

/// `GET /.well-known/ischedule?action=capabilities` (RFC 6638 Appendix C.1):
/// an XML `query-result/capabilities` document enumerating supported
/// versions, scheduling methods per component, and data types.
///
/// `serial_number` should track the deployment's config/build serial so the
/// response's `ETag` stays stable across restarts that change nothing.
pub fn capabilities_document(serial_number: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<query-result xmlns=\"urn:ietf:params:xml:ns:ischedule\">\
<capability-set>\
<serial-number>{serial_number}</serial-number>\
<versions><version>1.0</version></versions>\
<scheduling-messages>\
<component name=\"VEVENT\">\
<method name=\"REQUEST\"/><method name=\"REPLY\"/><method name=\"CANCEL\"/>\
</component>\
<component name=\"VTODO\">\
<method name=\"REQUEST\"/><method name=\"REPLY\"/><method name=\"CANCEL\"/>\
</component>\
<component name=\"VFREEBUSY\"><method name=\"REQUEST\"/></component>\
</scheduling-messages>\
<calendar-data-types>\
<calendar-data-type content-type=\"text/calendar\" version=\"2.0\"/>\
</calendar-data-types>\
<attachments><inline/></attachments>\
</capability-set>\
</query-result>"
    )
}

/// `ETag` for a `capabilities_document` response: just the serial number
/// quoted, since the document's content is a pure function of it.
pub fn capabilities_etag(serial_number: &str) -> String {
    format!("\"{serial_number}\"")
}

/// How a peer should reach this server's DKIM public key, mirroring the
/// `q=` tag on an inbound `DKIM-Signature` header (RFC 6638 Appendix C.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainKeyQueryType {
    PrivateExchange,
    HttpWellKnown,
}

impl DomainKeyQueryType {
    fn as_tag(self) -> &'static str {
        match self {
            Self::PrivateExchange => "private-exchange",
            Self::HttpWellKnown => "http/well-known",
        }
    }
}

/// `GET /.well-known/domainkey/<domain>/<selector>`: a `text/plain` DKIM
/// public key record, formatted as a standard DNS `TXT` record body so a
/// peer resolving it over HTTP gets byte-identical content to a DNS
/// lookup of `<selector>._domainkey.<domain>`.
pub fn domain_key_record(query_type: DomainKeyQueryType, public_key_base64: &str) -> String {
    format!(
        "v=DKIM1; q={}; k=rsa; p={public_key_base64}",
        query_type.as_tag()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_document_lists_scheduling_methods() {
        let doc = capabilities_document("42");
        assert!(doc.contains("<serial-number>42</serial-number>"));
        assert!(doc.contains("<method name=\"REQUEST\"/>"));
        assert!(doc.contains("VFREEBUSY"));
    }

    #[test]
    fn capabilities_etag_quotes_the_serial() {
        assert_eq!(capabilities_etag("42"), "\"42\"");
    }

    #[test]
    fn domain_key_record_uses_private_exchange_tag() {
        let record = domain_key_record(DomainKeyQueryType::PrivateExchange, "MIIBIjANBg==");
        assert_eq!(record, "v=DKIM1; q=private-exchange; k=rsa; p=MIIBIjANBg==");
    }

    #[test]
    fn domain_key_record_uses_http_well_known_tag() {
        let record = domain_key_record(DomainKeyQueryType::HttpWellKnown, "abc");
        assert!(record.contains("q=http/well-known"));
    }
}

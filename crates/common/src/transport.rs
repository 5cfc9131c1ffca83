use types::address::CalAddress;

/// An outbound iMIP delivery: a `METHOD:REQUEST`/`REPLY`/`CANCEL` etc.
/// wrapped for SMTP per RFC 6047, built by C6 and handed to whatever
/// actually talks SMTP (out of scope here).
#[derive(Debug, Clone)]
pub struct ImipMessage {
    pub from: CalAddress,
    pub to: CalAddress,
    /// `Subject:` line — summarizes the method and the event's `SUMMARY`.
    pub subject: String,
    /// Serialized `text/calendar` body.
    pub ical: String,
    /// `method` parameter on the `text/calendar` Content-Type, e.g. `"REQUEST"`.
    pub method: &'static str,
}

#[async_trait::async_trait]
pub trait ImipTransport: Send + Sync {
    async fn send(&self, message: ImipMessage) -> trc::Result<()>;
}

/// An outbound iSchedule POST to a peer deployment's
/// `.well-known/ischedule` endpoint (RFC 6638 Appendix C).
#[derive(Debug, Clone)]
pub struct IScheduleRequest {
    pub originator: CalAddress,
    pub recipients: Vec<CalAddress>,
    pub ical: String,
}

#[derive(Debug, Clone)]
pub struct IScheduleResponseItem {
    pub recipient: CalAddress,
    pub request_status: String,
    pub calendar_data: Option<String>,
}

#[async_trait::async_trait]
pub trait IScheduleTransport: Send + Sync {
    /// POSTs `request` to `base_url`, following at most one redirect per
    /// RFC 6638 Appendix C.2.1, and returns the parsed per-recipient
    /// `schedule-response`.
    async fn post(
        &self,
        base_url: &str,
        request: IScheduleRequest,
    ) -> trc::Result<Vec<IScheduleResponseItem>>;
}

/// The DKIM canonicalization/signing contract an outbound iSchedule request
/// is signed with (RFC 6376 relaxed/relaxed, SHA-256). Key management and
/// the actual cryptography are out of scope; this is the seam C6 calls
/// through to get a `DKIM-Signature` header value.
pub trait DkimSigner: Send + Sync {
    fn sign(&self, selector: &str, domain: &str, body: &[u8]) -> trc::Result<String>;
}

#[cfg(any(test, feature = "test_mode"))]
pub mod test_support {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub struct FakeImipTransport {
        pub sent: Mutex<Vec<ImipMessage>>,
        pub fail: bool,
    }

    #[async_trait::async_trait]
    impl ImipTransport for FakeImipTransport {
        async fn send(&self, message: ImipMessage) -> trc::Result<()> {
            if self.fail {
                return Err(trc::Error::new(trc::CalendarEvent::DeliveryFailed)
                    .details("fake transport configured to fail")
                    .caused_by(trc::location!()));
            }
            self.sent.lock().await.push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeIScheduleTransport {
        pub responses: Mutex<Vec<IScheduleResponseItem>>,
    }

    #[async_trait::async_trait]
    impl IScheduleTransport for FakeIScheduleTransport {
        async fn post(
            &self,
            _base_url: &str,
            request: IScheduleRequest,
        ) -> trc::Result<Vec<IScheduleResponseItem>> {
            Ok(request
                .recipients
                .into_iter()
                .map(|recipient| IScheduleResponseItem {
                    recipient,
                    request_status: "2.0;Success".to_string(),
                    calendar_data: None,
                })
                .collect())
        }
    }

    pub struct FakeDkimSigner;

    impl DkimSigner for FakeDkimSigner {
        fn sign(&self, selector: &str, domain: &str, _body: &[u8]) -> trc::Result<String> {
            Ok(format!("v=1; a=rsa-sha256; d={domain}; s={selector}; b=fake"))
        }
    }
}

//! Structured error and event logging for the scheduling engine.
//!
//! Plays the role the teacher's own `trc` crate plays (a single
//! context-chained `Error` type plus leveled structured events), but is
//! implemented directly on `tracing`/`thiserror` rather than `trc`'s own
//! code-genned event catalog, which isn't available outside the full
//! deployment this engine was distilled from.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The event taxonomy scheduling code raises. Kept narrow and specific to
/// this engine rather than the teacher's deployment-wide catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarEvent {
    ResolveFailed,
    ItipMessageError,
    DeliveryFailed,
    MergeRejected,
    FreebusyFederationError,
}

impl CalendarEvent {
    pub const fn default_level(self) -> Level {
        match self {
            Self::ResolveFailed => Level::Warn,
            Self::ItipMessageError => Level::Error,
            Self::DeliveryFailed => Level::Warn,
            Self::MergeRejected => Level::Warn,
            Self::FreebusyFederationError => Level::Warn,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ResolveFailed => "calendar.resolve_failed",
            Self::ItipMessageError => "calendar.itip_message_error",
            Self::DeliveryFailed => "calendar.delivery_failed",
            Self::MergeRejected => "calendar.merge_rejected",
            Self::FreebusyFederationError => "calendar.freebusy_federation_error",
        }
    }
}

/// A single context key/value attached to an [`Error`] as it propagates.
#[derive(Debug, Clone)]
pub struct Ctx {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug)]
pub struct Error {
    event: CalendarEvent,
    context: Vec<Ctx>,
    details: Option<String>,
}

impl Error {
    pub fn new(event: CalendarEvent) -> Self {
        Error {
            event,
            context: Vec::new(),
            details: None,
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn ctx(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.context.push(Ctx {
            key,
            value: value.to_string(),
        });
        self
    }

    pub fn account_id(self, id: u32) -> Self {
        self.ctx("account_id", id)
    }

    pub fn document_id(self, id: u32) -> Self {
        self.ctx("document_id", id)
    }

    pub fn event(&self) -> CalendarEvent {
        self.event
    }

    /// Attaches the call site, the way `AddContext::caused_by` does in the
    /// teacher, and emits a tracing event at the error's default level.
    pub fn caused_by(self, location: &'static str) -> Self {
        let err = self.ctx("at", location);
        err.emit();
        err
    }

    fn emit(&self) {
        match self.event.default_level() {
            Level::Trace => tracing::trace!(event = self.event.name(), ?self.context, details = ?self.details),
            Level::Debug => tracing::debug!(event = self.event.name(), ?self.context, details = ?self.details),
            Level::Info => tracing::info!(event = self.event.name(), ?self.context, details = ?self.details),
            Level::Warn => tracing::warn!(event = self.event.name(), ?self.context, details = ?self.details),
            Level::Error => tracing::error!(event = self.event.name(), ?self.context, details = ?self.details),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.event.name())?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        for ctx in &self.context {
            write!(f, " {}={}", ctx.key, ctx.value)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Mirrors the teacher's `AddContext` trait: attach the call site to any
/// `Result` crossing a collaborator boundary (store, directory, transport).
pub trait AddContext<T> {
    fn caused_by(self, location: &'static str) -> Result<T>;
}

impl<T> AddContext<T> for Result<T> {
    fn caused_by(self, location: &'static str) -> Result<T> {
        self.map_err(|e| e.caused_by(location))
    }
}

#[macro_export]
macro_rules! location {
    () => {
        concat!(module_path!(), ":", line!())
    };
}

/// Structured event logging for points in the engine that don't return an
/// `Err` but still need an audit trail (a successful delivery, a federation
/// round trip). Usage: `trc::event!(Level::Info, "delivered", recipient = %addr, status = %code);`
#[macro_export]
macro_rules! event {
    ($level:expr, $name:expr $(, $($field:tt)*)?) => {
        match $level {
            $crate::Level::Trace => tracing::trace!(event = $name $(, $($field)*)?),
            $crate::Level::Debug => tracing::debug!(event = $name $(, $($field)*)?),
            $crate::Level::Info => tracing::info!(event = $name $(, $($field)*)?),
            $crate::Level::Warn => tracing::warn!(event = $name $(, $($field)*)?),
            $crate::Level::Error => tracing::error!(event = $name $(, $($field)*)?),
        }
    };
}

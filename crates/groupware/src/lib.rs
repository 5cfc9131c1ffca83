//! The seven scheduling components (spec C1-C7): address resolution, event
//! diffing, iTIP assembly, request/reply planning and delivery routing,
//! plus busy-time federation.

pub mod scheduling;

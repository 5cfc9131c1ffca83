//! Configuration and collaborator interfaces shared by the scheduling
//! engine's components. A trimmed stand-in for the deployment's `common`
//! crate: only the configuration fields and storage/directory/transport
//! seams that C1-C7 actually call through.

pub mod auth;
pub mod config;
pub mod directory;
pub mod store;
pub mod transport;

pub use auth::{Acl, AuthContext, Privilege};
pub use config::{ClusterNode, SchedulingConfig};
pub use directory::{Directory, Principal};
pub use store::{BusyInterval, BusyStatus, EventStore, StoredEvent};
pub use transport::{
    DkimSigner, IScheduleRequest, IScheduleResponseItem, IScheduleTransport, ImipMessage,
    ImipTransport,
};

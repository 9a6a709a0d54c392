//! Detection of external notebook changes and the reload/keep decision around them.

pub mod conflict;
pub mod file_transport;
pub mod file_watcher;
pub mod host;
pub mod http;
pub mod poller;
mod save;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use conflict::ConflictResolver;
pub use file_transport::FileTransport;
pub use file_watcher::FileWatcher;
pub use host::{DirtyFlag, DirtyTracker, SyncHost};
pub use http::HttpTransport;
pub use poller::{CheckOutcome, PollerPhase, SyncPoller};
pub use transport::SyncTransport;

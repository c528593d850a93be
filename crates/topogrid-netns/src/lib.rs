//! topogrid-netns — network namespace plumbing for stopped nodes.
//!
//! - [`parking_netns_name`] names the namespace that holds a stopped
//!   node's dataplane interfaces
//! - [`NamespaceOps`] is the set of namespace operations the lifecycle
//!   controller needs
//! - [`NetlinkNamespaces`] implements them over rtnetlink, pinning a
//!   dedicated thread into the target namespace for every operation

pub mod error;
pub mod naming;
pub mod netlink;
pub mod ops;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{NetnsError, NetnsResult};
pub use naming::{MAX_NETNS_NAME_LEN, PARKING_PREFIX, parking_netns_name};
pub use netlink::NetlinkNamespaces;
pub use ops::{MoveOutcome, NamespaceOps};

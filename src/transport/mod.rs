//! Transport boundary: the abstract `Link` collaborator and the adaptive
//! MTU cache the session adapter consults when fragmenting.

pub mod mtu;
pub mod traits;

pub use mtu::MtuCache;
pub use traits::{Link, LinkEventHandler};

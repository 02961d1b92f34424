//! bitmesh-core: an offline-first, peer-to-peer secure messaging mesh
//! transport engine.
//!
//! The crate is organized around the pipeline a message actually travels:
//! a [`crypto`] layer establishes an authenticated, forward-secret channel
//! to each peer ([`crypto::noise`]); [`protocol`] fragments and frames
//! payloads for that channel's MTU; [`mesh`] decides whether a message is
//! spam, a duplicate, or needs relaying on to another hop, and holds it
//! durably while the destination is offline; [`session`] glues a peer's
//! handshake, fragmentation, and codec into one adapter; and [`transport`]
//! / [`storage`] are the abstract boundaries a host application fills in
//! with a concrete radio and a concrete database.
//!
//! Nothing in this crate talks to BLE or a disk directly — see
//! [`transport::Link`], [`storage::Store`], and [`crypto::IdentityVault`]
//! for the three external collaborators a host must provide.

pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod mesh;
pub mod protocol;
pub mod session;
pub mod storage;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};

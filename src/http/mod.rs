//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (HTTP/1.1 with upgrades, CONNECT split)
//!     → CONNECT: tunnel.rs (blocklist, outbound connect, splice)
//!     → otherwise: dispatcher.rs
//!         → request.rs (resolve target, request ID)
//!         → cache (validators, tee, replay)
//!         → response.rs (hop-by-hop stripping, canned replies)
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;
pub mod tunnel;

pub use dispatcher::ProxyState;
pub use request::{RequestId, RequestTarget};
pub use server::HttpServer;
pub use tunnel::{Tunnel, TunnelPhase};

//! Network plumbing: transport, overlay routing, and pub/sub

pub mod overlay;
pub mod topics;
pub mod transport;

pub use overlay::{Overlay, RoutingTable};
pub use topics::{TopicHandler, Topics};
pub use transport::{HttpTransport, RpcEndpoint, RpcServer};

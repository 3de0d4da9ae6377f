pub mod connection;
pub mod request;

pub use connection::{ConnectionDescriptor, ConnectionUrlResponse, Scheme};
pub use request::{RequestContext, RewriteContext};

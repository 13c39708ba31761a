//! Forwarding resolver: sends queries to configured upstreams over UDP, retrying
//! over TCP when an answer comes back truncated.

mod request;
mod resolver;
mod tcp;
mod udp;
mod upstream;

pub use resolver::{ForwardConfig, ForwardResolver};

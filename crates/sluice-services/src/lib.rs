//! sluice-services — live toxic chains, per-proxy toxic collections and
//! the TCP proxy that drives them.

pub mod collection;
pub mod link;
pub mod proxy;

pub use collection::{LinkPair, ToxicCollection};
pub use link::{LinkError, ToxicLink};
pub use proxy::{new_proxy_table, Proxy, ProxyTable};

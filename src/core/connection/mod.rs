//! Connections (C1) and pools (C2): spec §3 "Connection"/"Pool", §4.1.

pub mod connection;
pub mod endpoint;
pub mod pool;
pub mod stream;
pub mod tls;

pub use connection::{Connection, ConnectionState};
pub use endpoint::{Credentials, Endpoint, IdentityNatMapper, NatMapper};
pub use pool::{Pool, PoolConfig, PoolRole};

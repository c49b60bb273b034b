//! Everything between an accepted client request and a usable upstream response.

pub mod challenge;
pub mod classifier;
pub mod executor;
pub mod request;
pub mod tls;
pub mod transport;

pub use classifier::{Eviction, HostClassifier};
pub use executor::{FetchExecutor, Fetched, RetryConfig, Strategy};
pub use request::{OutboundBuilder, OutboundRequest};
pub use transport::{
    ReqwestTransport, TransportError, TransportErrorKind, UpstreamBody, UpstreamResponse,
    UpstreamTransport,
};

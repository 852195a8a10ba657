//! Client Module
//!
//! Transport boundary and the reqwest-backed HTTP transport.

pub mod http;
pub mod transport;

pub use http::HttpClient;
pub use transport::{
    ByteStream, Endpoint, RequestOptions, ResponseBody, ResponseMode, Transport, TransportError,
    TransportRequest, TransportResponse,
};

//! Remote worker transports implementing `DelegateClient`.

pub mod http;

pub use http::HttpDelegateClient;

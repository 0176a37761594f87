pub mod http;

pub use http::HttpFormDriver;

pub mod admission;
pub mod headers;
pub mod request;

pub use request::handle_gateway_request;

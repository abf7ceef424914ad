pub mod http_client;
pub mod spotify;
pub mod throttle;

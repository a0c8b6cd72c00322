pub mod bgapi;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod router;
pub mod transport;
pub mod types;
pub mod write;

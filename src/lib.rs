pub mod client;
pub mod config;
pub mod document;
pub mod logging;
pub mod message;
pub mod ot;
pub mod registry;
pub mod selection;
pub mod server;

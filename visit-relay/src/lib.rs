pub mod config;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod websocket;

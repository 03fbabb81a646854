// Collaborative document synchronization server: the CRDT engine, the
// presence tracker, the commit store, the access gate, and the axum
// HTTP/WebSocket surface that ties them together.

pub mod access;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod presence;
pub mod rpc;
pub mod store;

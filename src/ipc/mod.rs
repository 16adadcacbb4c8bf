//! IPC server for client communication

pub mod protocol;
pub mod server;

pub use server::IpcServer;

pub mod icy_server;
pub mod harness;

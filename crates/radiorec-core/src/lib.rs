pub mod collection;
pub mod config;
pub mod context;
pub mod error;
pub mod finalize;
pub mod icy;
pub mod mpeg;
pub mod node;
pub mod platform;
pub mod program;
pub mod record;
pub mod schedule;
pub mod session;
pub mod station;
pub mod stations_file;
pub mod window;

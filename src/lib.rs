pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod fuse_daemon;
pub mod inode;
pub mod resolver;
pub mod snapshot;

pub use config::Config;
pub use error::{Error, Result};
pub use fs::RedisFs;
pub use fuse_daemon::FuseDaemon;

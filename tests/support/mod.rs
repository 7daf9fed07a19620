#![allow(dead_code)]

pub mod dirs;
pub mod harness;
pub mod http_utils;
pub mod net;
pub mod origin;

pub use dirs::TestDirs;
pub use harness::ProxyHarness;
pub use http_utils::*;
pub use net::{find_free_port, wait_for_listener};
pub use origin::MockOrigin;

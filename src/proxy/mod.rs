pub mod cache;
pub mod connection;
pub mod engine;
pub mod inspect;
pub mod listener;
pub mod origin;
pub mod request;
pub mod response;

use std::sync::Arc;

use crate::settings::Settings;

pub use engine::{Decision, Engine, Outcome};
pub use listener::{ProxyServer, StopHandle};

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub engine: Arc<Engine>,
}

impl AppContext {
    pub fn new(settings: Arc<Settings>, engine: Arc<Engine>) -> Self {
        Self { settings, engine }
    }
}

use std::sync::Arc;

use crate::server::Server;

/// Extension hooked into a running server.
///
/// Plugins are linked into the binary and handed to
/// [`Server::register_plugin`]; `enable` is where they register event
/// handlers and commands.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn enable(&self, server: &Arc<Server>);
    fn disable(&self, server: &Arc<Server>);
}

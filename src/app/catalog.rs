// Tailgate - app/catalog.rs
//
// Id → LogSource lookup.
//
// Configured sources resolve by exact id to one shared record. Files beneath
// a configured remote directory are addressed as
// `<server name>/<dir name>/<relative path>` and rebuilt on every lookup;
// resolution is a pure function of the id, so nothing is cached for ids a
// caller makes up. The relative part must name a file the directory's
// pattern (and depth) would list. Resolution never touches the network and
// never checks access: the security gate runs when the source is tailed or
// cleared.

use crate::core::model::{LogSource, RemoteDirectory, ServerProfile};
use glob::Pattern;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Catalog {
    sources: HashMap<String, Arc<LogSource>>,
    /// Configured ids in config order, for listing.
    order: Vec<String>,
    servers: Vec<Arc<ServerProfile>>,
    directories: Vec<RemoteDirectory>,
}

impl Catalog {
    /// Build the catalog. Later duplicates of an id are ignored; config
    /// loading already reports them.
    pub fn new(
        sources: Vec<LogSource>,
        servers: Vec<Arc<ServerProfile>>,
        directories: Vec<RemoteDirectory>,
    ) -> Self {
        let mut map = HashMap::with_capacity(sources.len());
        let mut order = Vec::with_capacity(sources.len());
        for source in sources {
            if map.contains_key(&source.id) {
                continue;
            }
            order.push(source.id.clone());
            map.insert(source.id.clone(), Arc::new(source));
        }
        Self {
            sources: map,
            order,
            servers,
            directories,
        }
    }

    /// Look up `id`: configured sources first, then files beneath configured
    /// remote directories (first matching directory in config order wins).
    pub fn resolve(&self, id: &str) -> Option<Arc<LogSource>> {
        if let Some(source) = self.sources.get(id) {
            return Some(Arc::clone(source));
        }

        let source = self.directories.iter().find_map(|dir| {
            let prefix = format!("{}/{}/", dir.server.name, dir.name);
            let relative = id.strip_prefix(&prefix)?.trim_start_matches('/');
            if !lists(dir, relative) {
                return None;
            }
            let path = format!("{}/{relative}", dir.path.trim_end_matches('/'));
            Some(Arc::new(LogSource::remote(
                id,
                path,
                dir.encoding.clone(),
                Arc::clone(&dir.server),
            )))
        })?;

        tracing::debug!(id, path = %source.path.display(), "Resolved remote directory entry");
        Some(source)
    }

    /// Configured sources in config order.
    pub fn sources(&self) -> Vec<Arc<LogSource>> {
        self.order
            .iter()
            .filter_map(|id| self.sources.get(id).cloned())
            .collect()
    }

    pub fn directories(&self) -> &[RemoteDirectory] {
        &self.directories
    }

    /// Find a server by display name or `host:port` id.
    pub fn server(&self, name: &str) -> Option<Arc<ServerProfile>> {
        self.servers
            .iter()
            .find(|s| s.name == name || s.id == name)
            .cloned()
    }

    pub fn servers(&self) -> &[Arc<ServerProfile>] {
        &self.servers
    }
}

/// Whether a listing of `dir` could return the file at `relative`: the file
/// name matches the directory pattern, and nested paths need a recursive
/// directory.
fn lists(dir: &RemoteDirectory, relative: &str) -> bool {
    let (nested, name) = match relative.rsplit_once('/') {
        Some((_, name)) => (true, name),
        None => (false, relative),
    };
    if name.is_empty() || (nested && !dir.recursive) {
        return false;
    }
    Pattern::new(&dir.pattern).is_ok_and(|p| p.matches(name))
}

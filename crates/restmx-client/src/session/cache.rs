//! Per-resource URL cache
//!
//! Four concurrent maps keyed by resource name: the descriptor URL, the
//! attribute collection URL, and the per-name attribute and operation URLs.
//! Entries hold [`DeferredUrl`]s, so nothing needs to be invalidated when the
//! active endpoint changes; entries only go away when the server says the
//! resource moved or vanished.

use dashmap::DashMap;
use restmx_common::{ObjectInstanceLink, ObjectName, ResourceInfoLinks};
use std::collections::{HashMap, HashSet};

use crate::deferred_url::DeferredUrl;
use crate::endpoint::{ActiveEndpoint, Scheme};

/// Result of looking up a child URL of a resource.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(DeferredUrl),
    /// The resource descriptor is cached but has no such child.
    Missing,
    /// Nothing is cached for the resource yet.
    Unknown,
}

pub struct ResourceUrlCache {
    active: ActiveEndpoint,
    scheme: Scheme,
    info: DashMap<ObjectName, DeferredUrl>,
    attributes: DashMap<ObjectName, DeferredUrl>,
    attribute: DashMap<ObjectName, HashMap<String, DeferredUrl>>,
    operation: DashMap<ObjectName, HashMap<String, DeferredUrl>>,
}

impl ResourceUrlCache {
    pub fn new(active: ActiveEndpoint, scheme: Scheme) -> Self {
        Self {
            active,
            scheme,
            info: DashMap::new(),
            attributes: DashMap::new(),
            attribute: DashMap::new(),
            operation: DashMap::new(),
        }
    }

    fn deferred(&self, path: &str) -> DeferredUrl {
        DeferredUrl::new(path, self.active.clone(), self.scheme)
    }

    pub fn info_url(&self, name: &ObjectName) -> Option<DeferredUrl> {
        self.info.get(name).map(|entry| entry.value().clone())
    }

    pub fn attributes_url(&self, name: &ObjectName) -> Option<DeferredUrl> {
        self.attributes.get(name).map(|entry| entry.value().clone())
    }

    pub fn attribute_url(&self, name: &ObjectName, attribute: &str) -> CacheLookup {
        Self::child(&self.attribute, name, attribute)
    }

    pub fn operation_url(&self, name: &ObjectName, operation: &str) -> CacheLookup {
        Self::child(&self.operation, name, operation)
    }

    fn child(map: &DashMap<ObjectName, HashMap<String, DeferredUrl>>, name: &ObjectName, child: &str) -> CacheLookup {
        match map.get(name) {
            Some(children) => match children.get(child) {
                Some(url) => CacheLookup::Hit(url.clone()),
                None => CacheLookup::Missing,
            },
            None => CacheLookup::Unknown,
        }
    }

    /// Records the descriptor URLs carried by a resource listing.
    ///
    /// A `complete` listing (no name or class filter) also purges every
    /// resource it does not mention. A resource whose descriptor URL changed
    /// loses its child URLs before the new descriptor is stored.
    pub fn process_listing(&self, links: &[ObjectInstanceLink], complete: bool) {
        if complete {
            let listed: HashSet<&ObjectName> = links.iter().map(|link| &link.object_name).collect();
            let stale: Vec<ObjectName> = self
                .info
                .iter()
                .filter(|entry| !listed.contains(entry.key()))
                .map(|entry| entry.key().clone())
                .collect();
            for name in stale {
                self.purge(&name);
            }
        }

        for link in links {
            self.record_info_url(&link.object_name, &link.url);
        }
    }

    /// Stores a descriptor URL, purging the resource first if it moved.
    pub fn record_info_url(&self, name: &ObjectName, path: &str) {
        let url = self.deferred(path);
        let moved = match self.info.get(name) {
            Some(existing) if existing.path() == url.path() => return,
            Some(_) => true,
            None => false,
        };
        if moved {
            self.purge(name);
        }
        self.info.insert(name.clone(), url);
    }

    /// Replaces the child URLs of a resource from its descriptor response.
    pub fn process_info(&self, name: &ObjectName, links: &ResourceInfoLinks) {
        self.attributes.insert(name.clone(), self.deferred(&links.attributes_url));
        self.attribute
            .insert(name.clone(), self.children(&links.attribute_urls));
        self.operation
            .insert(name.clone(), self.children(&links.operation_urls));
    }

    fn children(&self, source: &HashMap<String, String>) -> HashMap<String, DeferredUrl> {
        source
            .iter()
            .map(|(child, path)| (child.clone(), self.deferred(path)))
            .collect()
    }

    pub fn purge(&self, name: &ObjectName) {
        self.info.remove(name);
        self.attributes.remove(name);
        self.attribute.remove(name);
        self.operation.remove(name);
    }

    /// Number of resources with a cached descriptor URL.
    pub fn len(&self) -> usize {
        self.info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }
}

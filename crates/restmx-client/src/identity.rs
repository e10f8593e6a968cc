//! Identity ids for client-side filter and handback objects
//!
//! Server-resident listener registrations cannot carry client objects by
//! value, so each filter and handback travels as a small integer that stays
//! stable for as long as the object is alive. The registry only holds weak
//! references: once the last `Arc` to an object is dropped its entry is swept
//! on the next access.

use restmx_common::{RestmxError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Id reported for "no object".
pub const NULL_ID: u32 = 0;

trait Liveness: Send + Sync {
    fn is_live(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_live(&self) -> bool {
        self.strong_count() > 0
    }
}

struct Entry {
    referent: Box<dyn Liveness>,
    id: u32,
}

struct Inner {
    // keyed by the address of the referent
    entries: HashMap<usize, Entry>,
    next_id: u32,
}

/// Assigns stable ids to objects by reference identity.
pub struct IdentityRegistry {
    inner: Mutex<Inner>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::starting_at(NULL_ID + 1)
    }

    fn starting_at(next_id: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_id,
            }),
        }
    }

    /// Returns the id of `object`, assigning a fresh one on first sight.
    ///
    /// # Example
    ///
    /// ```
    /// use restmx_client::identity::{IdentityRegistry, NULL_ID};
    /// use std::sync::Arc;
    ///
    /// let registry = IdentityRegistry::new();
    /// let a = Arc::new("filter");
    /// let b = Arc::new("filter");
    ///
    /// let id_a = registry.identity_of(Some(&a)).unwrap();
    /// assert_eq!(registry.identity_of(Some(&a)).unwrap(), id_a);
    /// assert_ne!(registry.identity_of(Some(&b)).unwrap(), id_a);
    /// assert_eq!(registry.identity_of::<&str>(None).unwrap(), NULL_ID);
    /// ```
    pub fn identity_of<T>(&self, object: Option<&Arc<T>>) -> Result<u32>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let Some(object) = object else {
            return Ok(NULL_ID);
        };
        let key = Arc::as_ptr(object) as *const () as usize;

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.retain(|_, entry| entry.referent.is_live());

        if let Some(entry) = inner.entries.get(&key) {
            return Ok(entry.id);
        }

        let id = inner.next_id;
        inner.next_id = id.checked_add(1).ok_or(RestmxError::IdentitySpaceExhausted)?;
        inner.entries.insert(
            key,
            Entry {
                referent: Box::new(Arc::downgrade(object)),
                id,
            },
        );
        Ok(id)
    }

    /// Number of live entries after sweeping dead ones.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.retain(|_, entry| entry.referent.is_live());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

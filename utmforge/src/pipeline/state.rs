//! Shared build state passed between steps.

use crate::driver::SharedDriver;
use std::any::{Any, type_name};
use std::collections::HashMap;
use utmforge_shared::constants::state_keys;
use utmforge_shared::errors::{UtmforgeError, UtmforgeResult};

/// String-keyed bag of typed values visible to every step of one build.
///
/// Earlier steps write intermediate results (paths, identifiers, flags) that
/// later steps read back with the type they were written with. A missing or
/// mistyped key is a programming error and surfaces as
/// [`UtmforgeError::Internal`].
///
/// The terminal build error lives in a dedicated slot rather than in the
/// value map so it can be moved out without knowing its type.
///
/// Not `Clone`: each pipeline owns its own bag.
#[derive(Default)]
pub struct StateBag {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    error: Option<UtmforgeError>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn put<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Read a value that an earlier step must have written.
    pub fn get<T: Any>(&self, key: &str) -> UtmforgeResult<&T> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| UtmforgeError::Internal(format!("state key '{}' is not set", key)))?;
        value.downcast_ref::<T>().ok_or_else(|| {
            UtmforgeError::Internal(format!(
                "state key '{}' does not hold a {}",
                key,
                type_name::<T>()
            ))
        })
    }

    /// Read an optional value. Mistyped values read as absent.
    pub fn get_ok<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains(&self, key: &str) -> bool {
        if key == state_keys::ERROR {
            return self.error.is_some();
        }
        self.values.contains_key(key)
    }

    /// Remove a value, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// Record the terminal build error.
    ///
    /// Only the first error is kept; later ones are logged and dropped.
    pub fn record_error(&mut self, err: UtmforgeError) {
        match &self.error {
            Some(first) => {
                tracing::warn!(first = %first, "Ignoring additional build error: {}", err);
            }
            None => self.error = Some(err),
        }
    }

    pub fn error(&self) -> Option<&UtmforgeError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<UtmforgeError> {
        self.error.take()
    }

    pub fn driver(&self) -> UtmforgeResult<SharedDriver> {
        self.get::<SharedDriver>(state_keys::DRIVER).cloned()
    }

    pub fn vm_id(&self) -> UtmforgeResult<String> {
        self.get::<String>(state_keys::VM_ID).cloned()
    }
}

impl std::fmt::Debug for StateBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("StateBag")
            .field("keys", &keys)
            .field("error", &self.error)
            .finish()
    }
}

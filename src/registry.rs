//! Name -> factory lookup for YAML-named components (`rate_limiter_type`,
//! scheduler `type`), mirroring the source system's
//! `Extension<T>::instance()->RegisterOrDie(name, obj)` / `->Find(name)`.
//! Populated once at startup; looking up an unregistered name is a config
//! error, never a panic.

use crate::error::RelayError;
use std::collections::HashMap;

/// A generic string-keyed registry of factories producing `T`.
///
/// Registration happens once, before any config is parsed. `create` clones
/// a fresh `T` from the registered factory closure for every call, so two
/// windows naming the same `rate_limiter_type` each get their own instance.
pub struct Registry<T> {
    factories: HashMap<&'static str, Box<dyn Fn() -> T + Send + Sync>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factories.insert(name, Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<T, RelayError> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(RelayError::config(format!(
                "no extension registered for name '{}'",
                name
            ))),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_registered_factory() {
        let mut reg: Registry<i32> = Registry::new();
        reg.register("answer", || 42);
        assert_eq!(reg.create("answer").unwrap(), 42);
    }

    #[test]
    fn unregistered_name_is_config_error() {
        let reg: Registry<i32> = Registry::new();
        match reg.create("missing") {
            Err(RelayError::Config(_)) => {}
            other => panic!("expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn each_create_is_independent() {
        let mut reg: Registry<Vec<u8>> = Registry::new();
        reg.register("buf", Vec::new);
        let mut a = reg.create("buf").unwrap();
        a.push(1);
        let b = reg.create("buf").unwrap();
        assert!(b.is_empty());
    }
}

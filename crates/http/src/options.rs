//! Typed, immutable connection options.
//!
//! An [`HttpOption`] is a global key identified by its namespace, its name and the type of
//! its value. An [`OptionMap`] holds values for any number of keys; it is immutable, and
//! cloning it only bumps a reference count, so one map is shared by every connection and
//! exchange of a server. Changes go through [`OptionMapBuilder`].
//!
//! ```
//! use conduit_http::options::{OptionMap, MAX_ENTITY_SIZE, IDLE_TIMEOUT};
//!
//! let options = OptionMap::builder().set(&MAX_ENTITY_SIZE, 1024).set(&IDLE_TIMEOUT, 30_000).build();
//! assert_eq!(options.get_or(&MAX_ENTITY_SIZE, 0), 1024);
//!
//! let relaxed = options.to_builder().remove(&IDLE_TIMEOUT).build();
//! assert!(!relaxed.contains(&IDLE_TIMEOUT));
//! assert!(options.contains(&IDLE_TIMEOUT));
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub const DEFAULT_MAX_HEADER_SIZE: usize = 50 * 1024;
pub const DEFAULT_MAX_ENTITY_SIZE: u64 = 10 * 1024 * 1024;

const NAMESPACE: &str = "conduit_http";

/// Largest request head, request line and fields together, in bytes.
pub static MAX_HEADER_SIZE: HttpOption<usize> = HttpOption::new(NAMESPACE, "MAX_HEADER_SIZE");

/// Largest request body, in bytes.
pub static MAX_ENTITY_SIZE: HttpOption<u64> = HttpOption::new(NAMESPACE, "MAX_ENTITY_SIZE");

/// Parse pipelined requests ahead and coalesce their responses into fewer writes.
pub static BUFFER_PIPELINED_DATA: HttpOption<bool> = HttpOption::new(NAMESPACE, "BUFFER_PIPELINED_DATA");

/// Milliseconds without incoming bytes before the connection is closed. Unset means never.
pub static IDLE_TIMEOUT: HttpOption<u64> = HttpOption::new(NAMESPACE, "IDLE_TIMEOUT");

/// Add a `Date` header to responses that lack one.
pub static ALWAYS_SET_DATE: HttpOption<bool> = HttpOption::new(NAMESPACE, "ALWAYS_SET_DATE");

pub struct HttpOption<T> {
    namespace: &'static str,
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> HttpOption<T> {
    pub const fn new(namespace: &'static str, name: &'static str) -> Self {
        Self { namespace, name, _value: PhantomData }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> HttpOption<T> {
    fn id(&self) -> OptionId {
        OptionId { namespace: self.namespace, name: self.name, value_type: TypeId::of::<T>() }
    }
}

impl<T> fmt::Debug for HttpOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct OptionId {
    namespace: &'static str,
    name: &'static str,
    value_type: TypeId,
}

type OptionValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone, Default)]
pub struct OptionMap {
    values: Arc<HashMap<OptionId, OptionValue>>,
}

impl OptionMap {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> OptionMapBuilder {
        OptionMapBuilder::default()
    }

    /// A builder holding every value of this map.
    pub fn to_builder(&self) -> OptionMapBuilder {
        OptionMapBuilder { values: self.values.as_ref().clone() }
    }

    pub fn get<T>(&self, option: &HttpOption<T>) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.values.get(&option.id()).and_then(|value| value.downcast_ref())
    }

    pub fn get_or<T>(&self, option: &HttpOption<T>, default: T) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get(option).cloned().unwrap_or(default)
    }

    pub fn contains<T: 'static>(&self, option: &HttpOption<T>) -> bool {
        self.values.contains_key(&option.id())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for OptionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys().map(|id| format!("{}.{}", id.namespace, id.name))).finish()
    }
}

#[derive(Default)]
pub struct OptionMapBuilder {
    values: HashMap<OptionId, OptionValue>,
}

impl OptionMapBuilder {
    pub fn set<T>(mut self, option: &HttpOption<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.values.insert(option.id(), Arc::new(value));
        self
    }

    /// Copies every value of `options`, replacing values already set for the same keys.
    pub fn set_all(mut self, options: &OptionMap) -> Self {
        self.values.extend(options.values.iter().map(|(id, value)| (*id, Arc::clone(value))));
        self
    }

    pub fn remove<T: 'static>(mut self, option: &HttpOption<T>) -> Self {
        self.values.remove(&option.id());
        self
    }

    pub fn build(self) -> OptionMap {
        OptionMap { values: Arc::new(self.values) }
    }
}

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A typed token naming one attachment slot of an exchange.
///
/// Keys are usually statics. Two keys only address the same slot when both their name
/// and their value type match.
pub struct AttachmentKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _value: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttachmentKey").field(&self.name).finish()
    }
}

#[derive(Default)]
pub(crate) struct Attachments {
    values: HashMap<(&'static str, TypeId), Box<dyn Any + Send + Sync>>,
}

impl Attachments {
    pub(crate) fn put<T: Send + Sync + 'static>(&mut self, key: &AttachmentKey<T>, value: T) -> Option<T> {
        let previous = self.values.insert((key.name, TypeId::of::<T>()), Box::new(value))?;
        previous.downcast().ok().map(|previous| *previous)
    }

    pub(crate) fn get<T: Send + Sync + 'static>(&self, key: &AttachmentKey<T>) -> Option<&T> {
        self.values.get(&(key.name, TypeId::of::<T>()))?.downcast_ref()
    }

    pub(crate) fn remove<T: Send + Sync + 'static>(&mut self, key: &AttachmentKey<T>) -> Option<T> {
        let value = self.values.remove(&(key.name, TypeId::of::<T>()))?;
        value.downcast().ok().map(|value| *value)
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys().map(|(name, _)| name)).finish()
    }
}

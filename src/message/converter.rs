//! Structured payload conversion.
//!
//! Every structured type is registered once under a type tag. Sending looks
//! the tag up by Rust type; receiving looks the converter up by the tag the
//! payload carries, so the receiver never guesses at the shape of the bytes.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::envelope::Payload;
use crate::utils::error::SerializationError;

trait Converter: Send + Sync {
    fn encode(&self, value: &dyn Any) -> Result<Vec<u8>, SerializationError>;
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any>, SerializationError>;
}

struct JsonConverter<T>(PhantomData<fn() -> T>);

impl<T> Converter for JsonConverter<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, value: &dyn Any) -> Result<Vec<u8>, SerializationError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(SerializationError::UnregisteredType(type_name::<T>()))?;
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any>, SerializationError> {
        let value: T = serde_json::from_slice(bytes)?;
        Ok(Box::new(value))
    }
}

/// Converters keyed by type tag.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    by_tag: HashMap<String, Arc<dyn Converter>>,
    tags: HashMap<TypeId, String>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as a JSON-encoded structured payload under `type_tag`.
    /// Registering the same type again replaces its tag; taking over a tag
    /// held by another type unregisters that type.
    pub fn register<T>(&mut self, type_tag: impl Into<String>) -> &mut Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let type_tag = type_tag.into();
        self.tags.retain(|_, tag| *tag != type_tag);
        if let Some(previous) = self.tags.insert(TypeId::of::<T>(), type_tag.clone()) {
            self.by_tag.remove(&previous);
        }
        self.by_tag
            .insert(type_tag, Arc::new(JsonConverter::<T>(PhantomData)));
        self
    }

    pub fn contains_tag(&self, type_tag: &str) -> bool {
        self.by_tag.contains_key(type_tag)
    }

    pub fn tag_of<T: 'static>(&self) -> Option<&str> {
        self.tags.get(&TypeId::of::<T>()).map(String::as_str)
    }

    pub fn to_payload<T: 'static>(&self, value: &T) -> Result<Payload, SerializationError> {
        let type_tag = self
            .tag_of::<T>()
            .ok_or(SerializationError::UnregisteredType(type_name::<T>()))?;
        let converter = self
            .by_tag
            .get(type_tag)
            .ok_or_else(|| SerializationError::UnknownTypeTag(type_tag.to_string()))?;

        Ok(Payload::Structured {
            type_tag: type_tag.to_string(),
            bytes: converter.encode(value)?,
        })
    }

    pub fn from_payload<T: 'static>(&self, payload: &Payload) -> Result<T, SerializationError> {
        let Payload::Structured { type_tag, bytes } = payload else {
            return Err(SerializationError::NotStructured);
        };
        let converter = self
            .by_tag
            .get(type_tag)
            .ok_or_else(|| SerializationError::UnknownTypeTag(type_tag.clone()))?;
        let expected = self
            .tag_of::<T>()
            .ok_or(SerializationError::UnregisteredType(type_name::<T>()))?;
        if expected != type_tag {
            return Err(SerializationError::TypeMismatch {
                expected: expected.to_string(),
                found: type_tag.clone(),
            });
        }

        converter
            .decode(bytes)?
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| SerializationError::TypeMismatch {
                expected: expected.to_string(),
                found: type_tag.clone(),
            })
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.by_tag.keys().collect();
        tags.sort();
        f.debug_struct("ConverterRegistry")
            .field("tags", &tags)
            .finish()
    }
}

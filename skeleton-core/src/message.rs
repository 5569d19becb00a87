//! Message codec and dispatch: the id/type registry that turns wire bytes
//! into typed values and routes them to a handler and/or a chanRPC server.
//!
//! The original keys its registry by the message value's runtime type. This
//! crate has no open-world reflection, so registration is by compile-time
//! type parameter instead (`Processor::register::<T>`), and the resulting
//! per-type glue (encode/decode/clone, each closing over `T`) is what gets
//! stored in the id and type indexes.

use crate::chanrpc::Server;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors surfaced by codecs and the processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// `register` was called with an id or type that already has a
    /// descriptor.
    #[error("message id or type already registered")]
    RepeatedRegister,
    /// `marshal`/`route` found no descriptor for the value's type.
    #[error("no descriptor registered for this type")]
    NotRegistered,
    /// `unmarshal` found no descriptor for the decoded id.
    #[error("no descriptor registered for message id {0}")]
    UnknownId(u16),
    /// A descriptor's encode/decode closure was handed a value of the wrong
    /// concrete type. Only possible if a caller bypasses the typed `route`
    /// helpers, which this crate's own API never does.
    #[error("message value does not match its registered descriptor")]
    TypeMismatch,
    /// Body shorter than the 2-byte id prefix requires.
    #[error("message body shorter than the id prefix")]
    TooShort,
    /// Body longer than the processor's configured maximum.
    #[error("message body exceeds the configured maximum length")]
    TooLong,
    /// The codec rejected the payload.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Endianness of the 2-byte message-id prefix. The frame length header in
/// `skeleton-net` carries its own, independently configurable, endianness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

impl Endianness {
    fn write_u16(self, id: u16) -> [u8; 2] {
        match self {
            Endianness::Big => id.to_be_bytes(),
            Endianness::Little => id.to_le_bytes(),
        }
    }

    fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            Endianness::Big => u16::from_be_bytes(bytes),
            Endianness::Little => u16::from_le_bytes(bytes),
        }
    }
}

/// A pluggable wire encoding. Kept deliberately narrow — `encode`/`decode`
/// work against a `serde_json::Value` intermediate rather than a generic
/// `Any`, which is what lets this stay object-safe while still supporting
/// non-JSON implementations a caller registers themselves.
pub trait Codec: Send + Sync {
    /// The name this codec is registered under (`"json"`, `"gob"`, ...).
    fn name(&self) -> &'static str;
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, MessageError>;
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, MessageError>;
}

/// The one codec this crate ships a real implementation of. `gob`,
/// `msgpack`, and `protocol` (protobuf) are named in the wire format but
/// left as registry slots for a caller's own [`Codec`].
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, MessageError> {
        serde_json::to_vec(value).map_err(|e| MessageError::Codec(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, MessageError> {
        serde_json::from_slice(bytes).map_err(|e| MessageError::Codec(e.to_string()))
    }
}

type CloneFn = dyn Fn(&(dyn Any + Send)) -> Box<dyn Any + Send> + Send + Sync;
type EncodeFn = dyn Fn(&(dyn Any + Send)) -> Result<Vec<u8>, MessageError> + Send + Sync;
type DecodeFn = dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, MessageError> + Send + Sync;
type HandlerFn<U> = dyn Fn(Box<dyn Any + Send>, U) + Send + Sync;

struct Descriptor<U> {
    id: u16,
    type_id: TypeId,
    clone_value: Arc<CloneFn>,
    encode: Arc<EncodeFn>,
    decode: Arc<DecodeFn>,
    router: Option<Server<TypeId>>,
    handler: Option<Arc<HandlerFn<U>>>,
}

impl<U> Clone for Descriptor<U> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            type_id: self.type_id,
            clone_value: self.clone_value.clone(),
            encode: self.encode.clone(),
            decode: self.decode.clone(),
            router: self.router.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// Message-ID <-> type registry, marshalling, and dispatch.
///
/// One processor owns exactly one [`Codec`] and one [`Endianness`] for its
/// id prefix, shared by every descriptor registered on it. `U` is whatever
/// per-connection user data a handler needs (typically a cloneable handle
/// onto the owning agent).
pub struct Processor<U> {
    codec: Arc<dyn Codec>,
    endianness: Endianness,
    by_id: RwLock<HashMap<u16, Descriptor<U>>>,
    by_type: RwLock<HashMap<TypeId, Descriptor<U>>>,
}

impl<U> Processor<U>
where
    U: Clone + Send + 'static,
{
    #[must_use]
    pub fn new(codec: Arc<dyn Codec>, endianness: Endianness) -> Self {
        Self {
            codec,
            endianness,
            by_id: RwLock::new(HashMap::new()),
            by_type: RwLock::new(HashMap::new()),
        }
    }

    /// Register message type `T` under `id`, with an optional router (a
    /// chanRPC server keyed by `TypeId`, receiving a fire-and-forget `Go`)
    /// and/or an optional direct handler. Fails if either index already has
    /// an entry for `id` or `T`.
    pub fn register<T>(
        &self,
        id: u16,
        router: Option<Server<TypeId>>,
        handler: Option<Arc<HandlerFn<U>>>,
    ) -> Result<(), MessageError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        {
            let by_id = self.by_id.read().unwrap();
            let by_type = self.by_type.read().unwrap();
            if by_id.contains_key(&id) || by_type.contains_key(&type_id) {
                return Err(MessageError::RepeatedRegister);
            }
        }

        let codec = self.codec.clone();
        let codec_decode = self.codec.clone();
        let encode: Arc<EncodeFn> = Arc::new(move |value| {
            let v = value
                .downcast_ref::<T>()
                .ok_or(MessageError::TypeMismatch)?;
            let json = serde_json::to_value(v).map_err(|e| MessageError::Codec(e.to_string()))?;
            codec.encode(&json)
        });
        let decode: Arc<DecodeFn> = Arc::new(move |bytes| {
            let json = codec_decode.decode(bytes)?;
            let v: T = serde_json::from_value(json).map_err(|e| MessageError::Codec(e.to_string()))?;
            Ok(Box::new(v) as Box<dyn Any + Send>)
        });
        let clone_value: Arc<CloneFn> = Arc::new(|value| {
            let v = value
                .downcast_ref::<T>()
                .expect("descriptor clone closure always matches its own T");
            Box::new(v.clone())
        });

        let descriptor = Descriptor {
            id,
            type_id,
            clone_value,
            encode,
            decode,
            router,
            handler,
        };

        let mut by_id = self.by_id.write().unwrap();
        let mut by_type = self.by_type.write().unwrap();
        if by_id.contains_key(&id) || by_type.contains_key(&type_id) {
            return Err(MessageError::RepeatedRegister);
        }
        by_id.insert(id, descriptor.clone());
        by_type.insert(type_id, descriptor);
        Ok(())
    }

    /// Encode `value` (looked up by its own runtime type) into `[id
    /// prefix][codec-encoded payload]`.
    pub fn marshal(&self, value: &(dyn Any + Send)) -> Result<Vec<u8>, MessageError> {
        let type_id = value.type_id();
        let descriptor = {
            let by_type = self.by_type.read().unwrap();
            by_type.get(&type_id).cloned().ok_or(MessageError::NotRegistered)?
        };
        let mut body = (descriptor.encode)(value)?;
        let mut out = Vec::with_capacity(2 + body.len());
        out.extend_from_slice(&self.endianness.write_u16(descriptor.id));
        out.append(&mut body);
        Ok(out)
    }

    /// Decode `[id prefix][codec-encoded payload]` into a type-erased value
    /// plus the `TypeId` it was registered under, for [`Processor::route`].
    pub fn unmarshal(&self, data: &[u8]) -> Result<(Box<dyn Any + Send>, TypeId), MessageError> {
        if data.len() < 2 {
            return Err(MessageError::TooShort);
        }
        let id = self.endianness.read_u16([data[0], data[1]]);
        let descriptor = {
            let by_id = self.by_id.read().unwrap();
            by_id.get(&id).cloned().ok_or(MessageError::UnknownId(id))?
        };
        let value = (descriptor.decode)(&data[2..])?;
        Ok((value, descriptor.type_id))
    }

    /// Dispatch a decoded value: if the descriptor has a handler, `spawn` it
    /// on the caller-supplied worker pool; if it has a router, enqueue a
    /// fire-and-forget `Go` keyed by the value's `TypeId`. Either, both, or
    /// (if the type was never registered) neither may run — an unregistered
    /// type is an error, a registered type with no router and no handler is
    /// a silent no-op, matching a caller that only wanted to decode.
    pub fn route(
        &self,
        type_id: TypeId,
        value: Box<dyn Any + Send>,
        user_data: U,
        spawn: &dyn Fn(Box<dyn FnOnce() + Send>),
    ) -> Result<(), MessageError> {
        let descriptor = {
            let by_type = self.by_type.read().unwrap();
            by_type.get(&type_id).cloned().ok_or(MessageError::NotRegistered)?
        };

        let for_router = if descriptor.handler.is_some() && descriptor.router.is_some() {
            Some((descriptor.clone_value)(&*value))
        } else {
            None
        };

        if let Some(handler) = descriptor.handler.clone() {
            // `for_router` already took its own clone above when both are
            // set, so the original `value` is free to move into the
            // handler regardless of whether a router also runs.
            let ud = user_data.clone();
            spawn(Box::new(move || handler(value, ud)));
            if let Some(router) = &descriptor.router {
                let routed = for_router.expect("cloned above when both handler and router are set");
                router.go(type_id, Box::new((routed, user_data)));
            }
        } else if let Some(router) = &descriptor.router {
            router.go(type_id, Box::new((value, user_data)));
        }

        Ok(())
    }
}

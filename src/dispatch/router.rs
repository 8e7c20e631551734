//! Name-based router over the [`Message`] envelope.

use std::collections::HashMap;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_bytes::ByteBuf;

use super::{encode_reply, Dispatcher, Fault, Message};
use crate::codec::MsgPackCodec;

enum Outcome {
    Reply(Result<Vec<u8>, Fault>),
    Silent,
}

type CallHandler<H> = Box<dyn FnMut(&mut H, &[u8]) -> Outcome + Send>;
type ReplyHandler<H> = Box<dyn FnMut(&mut H, Result<ByteBuf, Fault>) + Send>;

/// Dispatches [`Message`]s to typed closures by method name.
///
/// - `method`: request/response, always answered with a `Reply`
/// - `oneway`: fire-and-forget, answered only when it fails
/// - `on_reply`: consumes `Reply` messages sent back by the peer
pub struct Router<H> {
    calls: HashMap<String, CallHandler<H>>,
    replies: HashMap<String, ReplyHandler<H>>,
}

impl<H> Router<H> {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
            replies: HashMap::new(),
        }
    }

    /// Register a request/response method.
    ///
    /// Arguments that fail to decode as `T` are answered with
    /// [`Fault::BadArguments`] without calling `f`.
    pub fn method<T, R, F>(mut self, name: &str, mut f: F) -> Self
    where
        T: DeserializeOwned,
        R: Serialize,
        F: FnMut(&mut H, T) -> Result<R, Fault> + Send + 'static,
    {
        let method = name.to_string();
        let call = move |handler: &mut H, args: &[u8]| {
            let result = decode_args::<T>(&method, args)
                .and_then(|args| f(handler, args))
                .and_then(|value| {
                    MsgPackCodec::encode(&value)
                        .map_err(|e| Fault::application(format!("failed to encode result: {}", e)))
                });
            Outcome::Reply(result)
        };
        self.calls.insert(name.to_string(), Box::new(call));
        self
    }

    /// Register a one-way method. Nothing is sent back unless it fails.
    pub fn oneway<T, F>(mut self, name: &str, mut f: F) -> Self
    where
        T: DeserializeOwned,
        F: FnMut(&mut H, T) -> Result<(), Fault> + Send + 'static,
    {
        let method = name.to_string();
        let call = move |handler: &mut H, args: &[u8]| {
            match decode_args::<T>(&method, args).and_then(|args| f(handler, args)) {
                Ok(()) => Outcome::Silent,
                Err(fault) => Outcome::Reply(Err(fault)),
            }
        };
        self.calls.insert(name.to_string(), Box::new(call));
        self
    }

    /// Register a consumer for replies to calls of `name`.
    pub fn on_reply<R, F>(mut self, name: &str, mut f: F) -> Self
    where
        R: DeserializeOwned,
        F: FnMut(&mut H, Result<R, Fault>) + Send + 'static,
    {
        let method = name.to_string();
        let reply = move |handler: &mut H, result: Result<ByteBuf, Fault>| {
            let decoded = result.and_then(|bytes| {
                MsgPackCodec::decode::<R>(&bytes).map_err(|e| Fault::BadArguments {
                    method: method.clone(),
                    reason: e.to_string(),
                })
            });
            f(handler, decoded)
        };
        self.replies.insert(name.to_string(), Box::new(reply));
        self
    }

    /// Whether a call handler is registered for `name`.
    pub fn handles(&self, name: &str) -> bool {
        self.calls.contains_key(name)
    }
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> Dispatcher<H> for Router<H> {
    fn process(&mut self, handler: &mut H, input: Bytes) -> Option<Bytes> {
        let message: Message = match MsgPackCodec::decode(&input) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(len = input.len(), error = %e, "dropping undecodable frame");
                return None;
            }
        };

        match message {
            Message::Call { method, args } => {
                let outcome = match self.calls.get_mut(&method) {
                    Some(call) => call(handler, &args),
                    None => {
                        tracing::debug!(method = %method, "unknown method");
                        Outcome::Reply(Err(Fault::UnknownMethod(method.clone())))
                    }
                };

                let Outcome::Reply(result) = outcome else {
                    return None;
                };
                match encode_reply(&method, result) {
                    Ok(bytes) => Some(Bytes::from(bytes)),
                    Err(e) => {
                        tracing::error!(method = %method, error = %e, "failed to encode reply");
                        None
                    }
                }
            }
            Message::Reply { method, result } => {
                match self.replies.get_mut(&method) {
                    Some(reply) => reply(handler, result),
                    None => tracing::warn!(method = %method, "dropping reply with no consumer"),
                }
                None
            }
        }
    }
}

fn decode_args<T: DeserializeOwned>(method: &str, args: &[u8]) -> Result<T, Fault> {
    MsgPackCodec::decode(args).map_err(|e| Fault::BadArguments {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

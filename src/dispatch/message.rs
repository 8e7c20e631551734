//! Call/reply envelope.
//!
//! Arguments and results are MessagePack documents nested as binary blobs,
//! so the envelope can be decoded before the argument types are known.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;

use crate::codec::MsgPackCodec;
use crate::error::{Result, WirelinkError};
use crate::session::{RegistryError, SessionError};

/// Application-level failure carried in-band in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum Fault {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("bad arguments for '{method}': {reason}")]
    BadArguments { method: String, reason: String },

    #[error("{0}")]
    Application(String),
}

impl Fault {
    /// Shorthand for [`Fault::Application`].
    pub fn application(message: impl Into<String>) -> Self {
        Fault::Application(message.into())
    }
}

impl From<SessionError> for Fault {
    fn from(error: SessionError) -> Self {
        Fault::Application(error.to_string())
    }
}

impl From<RegistryError> for Fault {
    fn from(error: RegistryError) -> Self {
        Fault::Application(error.to_string())
    }
}

impl From<WirelinkError> for Fault {
    fn from(error: WirelinkError) -> Self {
        Fault::Application(error.to_string())
    }
}

/// One frame payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Invoke `method` with MessagePack-encoded `args`.
    Call {
        method: String,
        #[serde(with = "serde_bytes")]
        args: Vec<u8>,
    },
    /// Outcome of a call to `method`; `Ok` holds the encoded return value.
    Reply {
        method: String,
        result: std::result::Result<ByteBuf, Fault>,
    },
}

impl Message {
    /// Build a call, encoding `args`.
    pub fn call<A>(method: &str, args: &A) -> Result<Self>
    where
        A: Serialize + ?Sized,
    {
        Ok(Message::Call {
            method: method.to_string(),
            args: MsgPackCodec::encode(args)?,
        })
    }

    /// Method name this message refers to.
    pub fn method(&self) -> &str {
        match self {
            Message::Call { method, .. } | Message::Reply { method, .. } => method,
        }
    }
}

/// Encode a complete call payload, ready to be framed.
pub fn encode_call<A>(method: &str, args: &A) -> Result<Vec<u8>>
where
    A: Serialize + ?Sized,
{
    MsgPackCodec::encode(&Message::call(method, args)?)
}

/// Encode a reply payload from an already-encoded result.
pub fn encode_reply(method: &str, result: std::result::Result<Vec<u8>, Fault>) -> Result<Vec<u8>> {
    MsgPackCodec::encode(&Message::Reply {
        method: method.to_string(),
        result: result.map(ByteBuf::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_envelope() {
        let bytes = encode_call("add", &(20, 22)).unwrap();
        let message: Message = MsgPackCodec::decode(&bytes).unwrap();

        assert_eq!(message.method(), "add");
        let Message::Call { args, .. } = message else {
            panic!("expected call");
        };
        let (a, b): (i32, i32) = MsgPackCodec::decode(&args).unwrap();
        assert_eq!((a, b), (20, 22));
    }

    #[test]
    fn test_fault_reply_envelope() {
        let bytes = encode_reply("nope", Err(Fault::UnknownMethod("nope".into()))).unwrap();
        let message: Message = MsgPackCodec::decode(&bytes).unwrap();

        assert_eq!(
            message,
            Message::Reply {
                method: "nope".into(),
                result: Err(Fault::UnknownMethod("nope".into())),
            }
        );
    }

    #[test]
    fn test_session_error_becomes_application_fault() {
        let fault = Fault::from(SessionError::NameTaken("bob".into()));
        assert!(matches!(fault, Fault::Application(ref m) if m.contains("bob")));
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::BadArguments {
            method: "add".into(),
            reason: "expected 2 values".into(),
        };
        assert_eq!(fault.to_string(), "bad arguments for 'add': expected 2 values");
    }
}

//! Codec module - serialization of call arguments and replies.
//!
//! Frame payloads are opaque to the transport. The call envelope used by
//! [`Router`](crate::dispatch::Router) encodes its arguments with
//! [`MsgPackCodec`].
//!
//! # Example
//!
//! ```
//! use wirelink::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;

//! Dispatch boundary between framing and application code.
//!
//! The transport hands every complete inbound frame to a [`Dispatcher`],
//! together with the application handler. What the payload means is up to
//! the dispatcher: it can be any closure, or the ready-made [`Router`],
//! which speaks a small MessagePack call/reply envelope ([`Message`]).
//!
//! # Example
//!
//! ```
//! use wirelink::dispatch::{encode_call, Dispatcher, Fault, Message, Router};
//! use wirelink::codec::MsgPackCodec;
//!
//! struct Calculator;
//!
//! let mut router = Router::new().method("add", |_: &mut Calculator, (a, b): (i32, i32)| {
//!     Ok::<_, Fault>(a + b)
//! });
//!
//! let input = encode_call("add", &(20, 22)).unwrap();
//! let reply = router.process(&mut Calculator, input.into()).unwrap();
//!
//! match MsgPackCodec::decode::<Message>(&reply).unwrap() {
//!     Message::Reply { result, .. } => {
//!         let sum: i32 = MsgPackCodec::decode(&result.unwrap()).unwrap();
//!         assert_eq!(sum, 42);
//!     }
//!     Message::Call { .. } => unreachable!(),
//! }
//! ```

mod message;
mod peer;
mod router;

use bytes::Bytes;

pub use message::{encode_call, encode_reply, Fault, Message};
pub use peer::Peer;
pub use router::Router;

/// Turns one inbound frame payload into an optional reply payload.
///
/// Called on the connection owner with exclusive access to the handler.
/// Returning `Some` writes the bytes back as one frame (an empty reply still
/// writes a zero-length frame); `None` writes nothing. Failures inside the
/// dispatcher are the dispatcher's business and never close the connection.
pub trait Dispatcher<H> {
    fn process(&mut self, handler: &mut H, input: Bytes) -> Option<Bytes>;
}

impl<H, F> Dispatcher<H> for F
where
    F: FnMut(&mut H, Bytes) -> Option<Bytes>,
{
    fn process(&mut self, handler: &mut H, input: Bytes) -> Option<Bytes> {
        self(handler, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run<H, D>(dispatcher: &mut D, handler: &mut H, input: &'static [u8]) -> Option<Bytes>
    where
        D: Dispatcher<H>,
    {
        dispatcher.process(handler, Bytes::from_static(input))
    }

    #[test]
    fn test_closure_dispatcher() {
        let mut seen = Vec::new();
        let mut echo = |seen: &mut Vec<Bytes>, input: Bytes| {
            seen.push(input.clone());
            Some(input)
        };

        let reply = run(&mut echo, &mut seen, b"ping");

        assert_eq!(reply.as_deref(), Some(&b"ping"[..]));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_closure_dispatcher_without_reply() {
        let mut count = 0usize;
        let mut counter = |count: &mut usize, _input: Bytes| -> Option<Bytes> {
            *count += 1;
            None
        };

        assert!(run(&mut counter, &mut count, b"a").is_none());
        assert!(run(&mut counter, &mut count, b"b").is_none());
        assert_eq!(count, 2);
    }
}

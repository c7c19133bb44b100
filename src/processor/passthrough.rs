//! Decode-and-replace processing for streams whose frames are already the
//! values consumers want.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::Processor;
use crate::channel::StreamKind;
use crate::error::{Error, Result};
use crate::state::Publisher;

/// Replaces the consumer-visible value with each decoded frame. Used for
/// traffic and memory.
#[derive(Debug)]
pub struct PassthroughProcessor<T> {
    kind: StreamKind,
    _payload: PhantomData<fn() -> T>,
}

impl<T> PassthroughProcessor<T> {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            _payload: PhantomData,
        }
    }
}

/// Decode a JSON payload for `kind`.
pub(crate) fn decode<T: DeserializeOwned>(kind: StreamKind, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Decode {
        stream: kind,
        reason: e.to_string(),
    })
}

#[async_trait]
impl<T> Processor for PassthroughProcessor<T>
where
    T: DeserializeOwned + Clone + Default + Debug + Send + Sync + 'static,
{
    type State = T;

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn on_payload(&mut self, text: &str, out: &Publisher<T>) -> Result<()> {
        let value = decode(self.kind, text)?;
        out.replace(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_publisher as publisher;
    use streamwatch_types::{MemorySample, TrafficSample};

    #[test]
    fn replaces_value() {
        let (out, rx) = publisher::<TrafficSample>();
        let mut processor = PassthroughProcessor::<TrafficSample>::new(StreamKind::Traffic);

        processor.on_payload(r#"{"up":100,"down":200}"#, &out).unwrap();
        processor.on_payload(r#"{"up":7,"down":0}"#, &out).unwrap();

        assert_eq!(rx.borrow().data, TrafficSample::new(7, 0));
    }

    #[test]
    fn memory_without_limit() {
        let (out, rx) = publisher::<MemorySample>();
        let mut processor = PassthroughProcessor::<MemorySample>::new(StreamKind::Memory);

        processor.on_payload(r#"{"inuse":4096}"#, &out).unwrap();
        assert_eq!(rx.borrow().data, MemorySample::new(4096));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let (out, rx) = publisher::<TrafficSample>();
        let mut processor = PassthroughProcessor::<TrafficSample>::new(StreamKind::Traffic);
        processor.on_payload(r#"{"up":1,"down":1}"#, &out).unwrap();

        let err = processor.on_payload(r#"{"up":"fast"}"#, &out).unwrap_err();
        assert!(matches!(err, Error::Decode { stream: StreamKind::Traffic, .. }));
        assert_eq!(rx.borrow().data, TrafficSample::new(1, 1));
    }
}

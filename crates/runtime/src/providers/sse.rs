//! Minimal server-sent-events decoding for streamed provider responses.

use crate::model::ModelError;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::pin::Pin;

struct Decoder<S> {
    body: Pin<Box<S>>,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl<S> Decoder<S> {
    /// Move every complete line's `data:` payload into `ready`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\n', '\r']);
        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim();
            if !payload.is_empty() && payload != "[DONE]" {
                self.ready.push_back(payload.to_string());
            }
        }
    }
}

/// Decode an SSE byte stream into one JSON value per `data:` event.
pub(crate) fn json_events<T, S, B, E>(body: S) -> BoxStream<'static, Result<T, ModelError>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let decoder = Decoder {
        body: Box::pin(body),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::try_unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(payload) = decoder.ready.pop_front() {
                let event = serde_json::from_str::<T>(&payload)
                    .map_err(|e| ModelError::InvalidResponse(format!("{e}: {payload}")))?;
                return Ok(Some((event, decoder)));
            }
            if decoder.finished {
                return Ok(None);
            }
            match decoder.body.next().await {
                Some(Ok(bytes)) => {
                    decoder.buffer.extend_from_slice(bytes.as_ref());
                    decoder.drain_lines();
                }
                Some(Err(e)) => return Err(ModelError::Network(e.to_string())),
                None => {
                    decoder.finished = true;
                    let rest = std::mem::take(&mut decoder.buffer);
                    decoder.push_line(&rest);
                }
            }
        }
    })
    .boxed()
}

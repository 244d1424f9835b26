//! Purpose: Stream the entries of one large JSON object as keyed records.
//! Exports: `Decoder`, `RecordStream`, `DecodeSummary`, `StreamEnd`.
//! Role: Producer side of the load pipeline; runs on its own thread.
//! Invariants: The document is read key by key; only one entry is held at a time.
//! Invariants: Every emitted record carries its object key as id (never empty).
//! Invariants: The stream ends exactly once and its terminal state is always reported.
//! Notes: Cancellation is checked between keys only; an entry is never cut short.
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;

use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, Visitor};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::cancel::CancelSignal;
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{Keyed, Record};

// Capacity of the decoder -> puller hand-off.
const HANDOFF_CAPACITY: usize = 1;

pub struct Decoder<R, T = Record> {
    reader: R,
    buffer_size: usize,
    cancel: Option<CancelSignal>,
    _record: PhantomData<fn() -> T>,
}

impl<R> Decoder<R>
where
    R: Read + Send + 'static,
{
    pub fn new(reader: R, buffer_size: usize) -> Self {
        Self::for_type(reader, buffer_size)
    }
}

impl<R, T> Decoder<R, T>
where
    R: Read + Send + 'static,
    T: Keyed,
{
    /// Decoder for any keyed record type. `buffer_size` only sets read-ahead.
    pub fn for_type(reader: R, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer_size: buffer_size.max(1),
            cancel: None,
            _record: PhantomData,
        }
    }

    /// Signal used by `produce(None)` and by the loader.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Starts decoding on a background thread and returns the consume-once stream.
    ///
    /// An explicit `cancel` takes precedence over one set with `with_cancel`.
    pub fn produce(self, cancel: Option<CancelSignal>) -> RecordStream<T> {
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (end_tx, end_rx) = oneshot::channel();
        let Decoder {
            reader,
            buffer_size,
            cancel: configured,
            ..
        } = self;
        let cancel = cancel.or(configured);

        let spawned = thread::Builder::new()
            .name("record-decoder".to_string())
            .spawn(move || {
                let summary = decode_object(reader, buffer_size, cancel.as_ref(), &tx);
                tracing::debug!(
                    records = summary.records,
                    end = summary.end.label(),
                    "decoder finished"
                );
                // Published before `tx` drops so it is ready once the stream yields `None`.
                let _ = end_tx.send(summary);
            });

        let end = match spawned {
            Ok(_) => Terminal::Pending(end_rx),
            Err(err) => Terminal::Ready(DecodeSummary {
                records: 0,
                end: StreamEnd::Failed(
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start decoder thread")
                        .with_source(err),
                ),
            }),
        };

        RecordStream {
            inner: ReceiverStream::new(rx),
            end,
        }
    }
}

/// How a decoded stream terminated.
#[derive(Debug)]
pub enum StreamEnd {
    /// Every key of the object was emitted.
    Exhausted,
    Cancelled,
    /// Structural or I/O failure; records emitted before it stand.
    Failed(Error),
    /// The consumer dropped the stream before the decoder finished.
    Abandoned,
}

impl StreamEnd {
    pub fn label(&self) -> &'static str {
        match self {
            StreamEnd::Exhausted => "exhausted",
            StreamEnd::Cancelled => "cancelled",
            StreamEnd::Failed(_) => "failed",
            StreamEnd::Abandoned => "abandoned",
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            StreamEnd::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct DecodeSummary {
    /// Records handed to the stream.
    pub records: u64,
    pub end: StreamEnd,
}

enum Terminal {
    Pending(oneshot::Receiver<DecodeSummary>),
    Ready(DecodeSummary),
}

/// Consume-once sequence of decoded records.
pub struct RecordStream<T> {
    inner: ReceiverStream<T>,
    end: Terminal,
}

impl<T> RecordStream<T> {
    /// Drops any unread records and reports how decoding ended.
    ///
    /// Calling this before the stream is drained does not interrupt the decoder
    /// thread. It notices at its next hand-off and ends with `StreamEnd::Abandoned`
    /// (unless it finished first), so this waits for that hand-off. A source that
    /// stalls inside `read` keeps this pending until the read returns.
    pub async fn finish(self) -> DecodeSummary {
        let RecordStream { inner, end } = self;
        drop(inner);
        match end {
            Terminal::Ready(summary) => summary,
            Terminal::Pending(rx) => rx.await.unwrap_or_else(|_| DecodeSummary {
                records: 0,
                end: StreamEnd::Failed(
                    Error::new(ErrorKind::Internal).with_message("decoder stopped unexpectedly"),
                ),
            }),
        }
    }
}

impl<T> Stream for RecordStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

fn decode_object<R, T>(
    reader: R,
    buffer_size: usize,
    cancel: Option<&CancelSignal>,
    tx: &mpsc::Sender<T>,
) -> DecodeSummary
where
    R: Read,
    T: Keyed,
{
    let mut reader = BufReader::with_capacity(buffer_size, reader);
    match has_content(&mut reader) {
        Ok(true) => {}
        Ok(false) => {
            return DecodeSummary {
                records: 0,
                end: StreamEnd::Exhausted,
            };
        }
        Err(err) => {
            return DecodeSummary {
                records: 0,
                end: StreamEnd::Failed(
                    Error::new(ErrorKind::Io)
                        .with_message("failed to read input")
                        .with_source(err),
                ),
            };
        }
    }

    let mut de = serde_json::Deserializer::from_reader(reader);
    let mut emitter = Emitter {
        tx,
        cancel,
        records: 0,
        halt: None,
        failed_key: None,
    };
    let result = (&mut emitter).deserialize(&mut de);
    let records = emitter.records;

    let end = match (emitter.halt, result) {
        (Some(Halt::Cancelled), _) => StreamEnd::Cancelled,
        (Some(Halt::Abandoned), _) => StreamEnd::Abandoned,
        (None, Err(err)) => StreamEnd::Failed(decode_error(err, emitter.failed_key.take())),
        (None, Ok(())) => match de.end() {
            Ok(()) => StreamEnd::Exhausted,
            Err(err) => StreamEnd::Failed(decode_error(err, None)),
        },
    };
    DecodeSummary { records, end }
}

/// Skips leading whitespace; `false` means the input holds nothing else.
fn has_content<R: Read>(reader: &mut BufReader<R>) -> io::Result<bool> {
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if available.is_empty() {
            return Ok(false);
        }
        let skip = available
            .iter()
            .take_while(|byte| byte.is_ascii_whitespace())
            .count();
        let done = skip < available.len();
        reader.consume(skip);
        if done {
            return Ok(true);
        }
    }
}

fn decode_error(err: serde_json::Error, key: Option<String>) -> Error {
    let (kind, message) = if err.is_io() {
        (ErrorKind::Io, "failed to read input")
    } else {
        (ErrorKind::Decode, "input is not a valid record object")
    };
    let mut error = Error::new(kind).with_message(message);
    if let Some(key) = key {
        error = error.with_record(key);
    }
    error.with_source(err)
}

#[derive(Clone, Copy)]
enum Halt {
    Cancelled,
    Abandoned,
}

struct Emitter<'a, T> {
    tx: &'a mpsc::Sender<T>,
    cancel: Option<&'a CancelSignal>,
    records: u64,
    halt: Option<Halt>,
    failed_key: Option<String>,
}

impl<'de, T: Keyed> DeserializeSeed<'de> for &mut Emitter<'_, T> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<(), D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de, T: Keyed> Visitor<'de> for &mut Emitter<'_, T> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object mapping record ids to records")
    }

    fn visit_map<A>(self, mut map: A) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        loop {
            if self.cancel.is_some_and(CancelSignal::is_fired) {
                self.halt = Some(Halt::Cancelled);
                return Ok(());
            }
            let Some(id) = map.next_key::<String>()? else {
                return Ok(());
            };
            if id.is_empty() {
                return Err(de::Error::custom("record id must not be empty"));
            }
            let mut record: T = match map.next_value() {
                Ok(record) => record,
                Err(err) => {
                    self.failed_key = Some(id);
                    return Err(err);
                }
            };
            record.assign_id(id);
            if self.tx.blocking_send(record).is_err() {
                self.halt = Some(Halt::Abandoned);
                return Ok(());
            }
            self.records += 1;
        }
    }
}

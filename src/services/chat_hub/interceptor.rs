//! Response interception for streamed chat turns.
//!
//! [`InterceptedSink`] sits between the execution engine and the HTTP response.
//! Every text write passes through a transform before it reaches the client,
//! and the sink reports its own lifecycle through `finish` and `close` hooks.

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// Rewrites one outgoing text chunk.
pub type Transform = Box<dyn FnMut(&str) -> Result<String, TransformError> + Send>;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteChunk {
    Text(String),
    Binary(Bytes),
}

/// The raw transport a response is written to.
pub trait ResponseSink: Send {
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> io::Result<()>;

    fn write(&mut self, chunk: WriteChunk) -> io::Result<()>;

    fn end(&mut self) -> io::Result<()>;
}

/// What the execution engine writes node output to.
pub trait OutputSink: Send + Sync {
    fn write(&self, chunk: WriteChunk) -> io::Result<()>;

    fn end(&self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Open,
    Finished,
    Closed,
}

struct Inner<S> {
    sink: S,
    transform: Transform,
    state: StreamState,
}

#[derive(Default)]
struct Hooks {
    finish: Vec<Hook>,
    close: Vec<Hook>,
}

pub struct InterceptedSink<S> {
    inner: Mutex<Inner<S>>,
    hooks: Mutex<Hooks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response stream is closed")
}

impl<S: ResponseSink> InterceptedSink<S> {
    pub fn wrap(sink: S, transform: Transform) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sink,
                transform,
                state: StreamState::Open,
            }),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Registers a hook fired when the stream is ended normally.
    pub fn on_finish(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.hooks).finish.push(Box::new(hook));
    }

    /// Registers a hook fired when the stream goes away, whether ended or disconnected.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.hooks).close.push(Box::new(hook));
    }

    pub fn write_head(&self, status: StatusCode, headers: HeaderMap) -> io::Result<()> {
        let result = {
            let mut inner = lock(&self.inner);
            if inner.state != StreamState::Open {
                return Err(closed_error());
            }
            let result = inner.sink.write_head(status, headers);
            if result.is_err() {
                inner.state = StreamState::Closed;
            }
            result
        };

        if result.is_err() {
            self.fire_close();
        }
        result
    }

    /// Marks the stream closed by the transport and fires the close hooks.
    pub fn close(&self) {
        {
            let mut inner = lock(&self.inner);
            if inner.state != StreamState::Open {
                return;
            }
            inner.state = StreamState::Closed;
        }
        self.fire_close();
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner).state == StreamState::Open
    }

    /// True when the transport went away before the stream was ended.
    pub fn is_disconnected(&self) -> bool {
        lock(&self.inner).state == StreamState::Closed
    }

    fn fire_finish(&self) {
        let hooks = std::mem::take(&mut lock(&self.hooks).finish);
        for hook in hooks {
            hook();
        }
    }

    fn fire_close(&self) {
        let hooks = std::mem::take(&mut lock(&self.hooks).close);
        for hook in hooks {
            hook();
        }
    }
}

impl<S: ResponseSink> OutputSink for InterceptedSink<S> {
    fn write(&self, chunk: WriteChunk) -> io::Result<()> {
        let result = {
            let mut guard = lock(&self.inner);
            let inner = &mut *guard;
            if inner.state != StreamState::Open {
                return Err(closed_error());
            }

            let chunk = match chunk {
                WriteChunk::Text(text) => match (inner.transform)(&text) {
                    Ok(transformed) => WriteChunk::Text(transformed),
                    Err(e) => {
                        tracing::warn!(error = %e, "[ChatHub] Stream transform failed, forwarding chunk as is");
                        WriteChunk::Text(text)
                    }
                },
                binary => binary,
            };

            let result = inner.sink.write(chunk);
            if result.is_err() {
                inner.state = StreamState::Closed;
            }
            result
        };

        if result.is_err() {
            self.fire_close();
        }
        result
    }

    fn end(&self) -> io::Result<()> {
        let result = {
            let mut inner = lock(&self.inner);
            if inner.state != StreamState::Open {
                return Ok(());
            }
            inner.state = StreamState::Finished;
            inner.sink.end()
        };

        self.fire_finish();
        self.fire_close();
        result
    }
}

// ============================================================================
// CHANNEL TRANSPORT
// ============================================================================

/// Frames sent from a turn to the HTTP handler that serves it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFrame {
    Head { status: StatusCode, headers: HeaderMap },
    Data(Bytes),
    End,
}

/// Sending half of a streamed HTTP response.
#[derive(Debug, Clone)]
pub struct ResponseChannel {
    tx: mpsc::UnboundedSender<ResponseFrame>,
}

/// Receiving half, owned by the handler.
#[derive(Debug)]
pub struct ResponseReceiver {
    rx: mpsc::UnboundedReceiver<ResponseFrame>,
}

pub fn response_channel() -> (ResponseChannel, ResponseReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ResponseChannel { tx }, ResponseReceiver { rx })
}

impl ResponseChannel {
    fn send(&self, frame: ResponseFrame) -> io::Result<()> {
        self.tx.send(frame).map_err(|_| closed_error())
    }

    /// Resolves once the receiving side has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl ResponseSink for ResponseChannel {
    fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> io::Result<()> {
        self.send(ResponseFrame::Head { status, headers })
    }

    fn write(&mut self, chunk: WriteChunk) -> io::Result<()> {
        let bytes = match chunk {
            WriteChunk::Text(text) => Bytes::from(text),
            WriteChunk::Binary(bytes) => bytes,
        };
        self.send(ResponseFrame::Data(bytes))
    }

    fn end(&mut self) -> io::Result<()> {
        self.send(ResponseFrame::End)
    }
}

impl ResponseReceiver {
    /// Waits for the response head. `None` means the turn finished without streaming.
    pub async fn recv_head(&mut self) -> Option<(StatusCode, HeaderMap)> {
        loop {
            match self.rx.recv().await? {
                ResponseFrame::Head { status, headers } => return Some((status, headers)),
                ResponseFrame::End => return None,
                ResponseFrame::Data(_) => continue,
            }
        }
    }

    /// Body frames up to the end of the response.
    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        UnboundedReceiverStream::new(self.rx)
            .take_while(|frame| futures::future::ready(!matches!(frame, ResponseFrame::End)))
            .filter_map(|frame| async move {
                match frame {
                    ResponseFrame::Data(bytes) => Some(Ok(bytes)),
                    _ => None,
                }
            })
    }

    /// Collects the remaining body as text.
    pub async fn read_body(self) -> String {
        let chunks: Vec<Result<Bytes, Infallible>> = self.into_body_stream().collect().await;
        chunks
            .into_iter()
            .flatten()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .collect()
    }
}

//! Request bodies.
//!
//! A [`RequestBody`] is either empty, an in-memory buffer, or a stream with a
//! declared length. Buffers can always be replayed. A stream can be replayed
//! only when it was created from an [`UploadSource`] that knows how to reopen
//! itself; a plain stream is one-shot.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, TryStreamExt};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use tokio::sync::Notify;
use tokio_util::io::ReaderStream;

use crate::error::{BodyLengthMismatch, BoxError, HttpError};

/// Something an upload can be read from, possibly more than once.
#[async_trait]
pub trait UploadSource: Send + Sync + 'static {
    /// Number of bytes every call to [`open`](Self::open) yields
    fn content_length(&self) -> u64;

    /// Opens a fresh stream positioned at the first byte.
    async fn open(&self) -> std::io::Result<BoxStream<'static, std::io::Result<Bytes>>>;
}

/// A file on disk. Reopened from the start on every attempt.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    /// # Errors
    /// Returns the I/O error when the file metadata cannot be read.
    pub async fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn content_length(&self) -> u64 {
        self.len
    }

    async fn open(&self) -> std::io::Result<BoxStream<'static, std::io::Result<Bytes>>> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::pin(ReaderStream::new(file)))
    }
}

#[derive(Clone)]
enum Replay {
    Empty,
    Bytes(Bytes),
    Source(Arc<dyn UploadSource>),
    OneShot,
}

/// Body of an outgoing request
pub struct RequestBody {
    inner: UnsyncBoxBody<Bytes, BoxError>,
    length: Option<u64>,
    replay: Replay,
}

impl RequestBody {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync(),
            length: Some(0),
            replay: Replay::Empty,
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            inner: full(bytes.clone()),
            length: Some(bytes.len() as u64),
            replay: Replay::Bytes(bytes),
        }
    }

    /// One-shot stream with a declared length. Never replayed.
    pub fn from_stream<S>(stream: S, length: u64) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: checked_stream(Box::pin(stream), length),
            length: Some(length),
            replay: Replay::OneShot,
        }
    }

    /// Opens a replayable body from an upload source.
    ///
    /// # Errors
    /// Returns [`HttpError::Rewind`] when the source cannot be opened.
    pub async fn from_source(source: Arc<dyn UploadSource>) -> Result<Self, HttpError> {
        let length = source.content_length();
        let stream = source.open().await.map_err(HttpError::Rewind)?;
        Ok(Self {
            inner: checked_stream(stream, length),
            length: Some(length),
            replay: Replay::Source(source),
        })
    }

    /// Declared length in bytes, if known
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.length
    }

    /// Whether [`replay`](Self::replay) can produce a fresh copy
    #[must_use]
    pub fn is_rewindable(&self) -> bool {
        !matches!(self.replay, Replay::OneShot)
    }

    /// Produces a fresh body with the same content, positioned at the start.
    ///
    /// Resolves to `Ok(None)` for one-shot streams. The returned future does
    /// not borrow `self`, so it can be awaited while the body is in flight.
    ///
    /// # Errors
    /// Resolves to [`HttpError::Rewind`] when an upload source fails to reopen.
    pub fn replay(
        &self,
    ) -> impl Future<Output = Result<Option<Self>, HttpError>> + Send + 'static + use<> {
        let replay = self.replay.clone();
        async move {
            match replay {
                Replay::Empty => Ok(Some(Self::empty())),
                Replay::Bytes(bytes) => Ok(Some(Self::from_bytes(bytes))),
                Replay::Source(source) => Self::from_source(source).await.map(Some),
                Replay::OneShot => Ok(None),
            }
        }
    }

    /// Wraps the body so that every frame read is added to `counter`.
    #[must_use]
    pub fn counted(self, counter: Arc<TransferCounter>) -> Self {
        let counting = CountingBody {
            inner: self.inner,
            counter,
        };
        Self {
            inner: counting.boxed_unsync(),
            length: self.length,
            replay: self.replay,
        }
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("length", &self.length)
            .field("rewindable", &self.is_rewindable())
            .finish_non_exhaustive()
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        match self.length {
            Some(len) => SizeHint::with_exact(len),
            None => self.inner.size_hint(),
        }
    }
}

fn full(bytes: Bytes) -> UnsyncBoxBody<Bytes, BoxError> {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

fn checked_stream(
    stream: BoxStream<'static, std::io::Result<Bytes>>,
    declared: u64,
) -> UnsyncBoxBody<Bytes, BoxError> {
    let body = StreamBody::new(stream.map_ok(Frame::data).map_err(BoxError::from));
    LengthChecked {
        inner: body.boxed_unsync(),
        declared,
        produced: 0,
    }
    .boxed_unsync()
}

pin_project_lite::pin_project! {
    /// Fails the body when it produces more or fewer bytes than declared.
    struct LengthChecked<B> {
        #[pin]
        inner: B,
        declared: u64,
        produced: u64,
    }
}

impl<B> Body for LengthChecked<B>
where
    B: Body<Data = Bytes, Error = BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.produced += data.len() as u64;
                    if *this.produced > *this.declared {
                        return Poll::Ready(Some(Err(Box::new(BodyLengthMismatch {
                            declared: *this.declared,
                            produced: *this.produced,
                        }))));
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) if *this.produced != *this.declared => {
                Poll::Ready(Some(Err(Box::new(BodyLengthMismatch {
                    declared: *this.declared,
                    produced: *this.produced,
                }))))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.declared)
    }
}

/// Byte counter shared between a body being transferred and whoever reports
/// progress on it.
#[derive(Debug)]
pub struct TransferCounter {
    transferred: AtomicU64,
    total: u64,
    finished: AtomicBool,
    notify: Notify,
}

impl TransferCounter {
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            transferred: AtomicU64::new(0),
            total,
            finished: AtomicBool::new(total == 0),
            notify: Notify::new(),
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn add(&self, n: u64) {
        let now = self.transferred.fetch_add(n, Ordering::AcqRel) + n;
        if now >= self.total {
            self.finish();
        }
    }

    fn finish(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Resolves once every declared byte has been transferred.
    pub async fn finished(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }
}

pin_project_lite::pin_project! {
    /// Adds the size of every data frame to a [`TransferCounter`].
    pub struct CountingBody<B> {
        #[pin]
        inner: B,
        counter: Arc<TransferCounter>,
    }
}

impl<B> CountingBody<B> {
    pub fn new(inner: B, counter: Arc<TransferCounter>) -> Self {
        Self { inner, counter }
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.counter.add(data.len() as u64);
                }
            }
            Poll::Ready(None) => this.counter.finish(),
            _ => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(body: RequestBody) -> Result<Bytes, BoxError> {
        body.collect().await.map(http_body_util::Collected::to_bytes)
    }

    type Chunks = futures::stream::Iter<std::vec::IntoIter<std::io::Result<Bytes>>>;

    fn chunks(parts: &[&'static [u8]]) -> Chunks {
        let items: Vec<std::io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        futures::stream::iter(items)
    }

    #[tokio::test]
    async fn bytes_body_replays() {
        let body = RequestBody::from_bytes("hello");
        assert_eq!(body.content_length(), Some(5));
        assert!(body.is_rewindable());

        let again = body.replay().await.unwrap().unwrap();
        assert_eq!(collect(body).await.unwrap(), "hello");
        assert_eq!(collect(again).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn one_shot_stream_does_not_replay() {
        let body = RequestBody::from_stream(chunks(&[b"ab", b"cd"]), 4);
        assert!(!body.is_rewindable());
        assert!(body.replay().await.unwrap().is_none());
        assert_eq!(collect(body).await.unwrap(), "abcd");
    }

    #[tokio::test]
    async fn stream_longer_than_declared_fails() {
        let body = RequestBody::from_stream(chunks(&[b"abc", b"def"]), 4);
        let err = collect(body).await.unwrap_err();
        let mismatch = err.downcast_ref::<BodyLengthMismatch>().unwrap();
        assert_eq!(mismatch.declared, 4);
        assert_eq!(mismatch.produced, 6);
    }

    #[tokio::test]
    async fn stream_shorter_than_declared_fails() {
        let body = RequestBody::from_stream(chunks(&[b"abc"]), 10);
        let err = collect(body).await.unwrap_err();
        assert!(err.to_string().contains("declared 10 bytes, produced 3 bytes"));
    }

    #[tokio::test]
    async fn file_source_reopens_from_start() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"product bundle bytes").unwrap();
        let source = FileSource::new(file.path()).await.unwrap();
        assert_eq!(source.content_length(), 20);

        let body = RequestBody::from_source(Arc::new(source)).await.unwrap();
        let again = body.replay().await.unwrap().unwrap();
        assert_eq!(collect(body).await.unwrap(), "product bundle bytes");
        assert_eq!(collect(again).await.unwrap(), "product bundle bytes");
    }

    #[tokio::test]
    async fn counted_body_reports_every_byte() {
        let counter = Arc::new(TransferCounter::new(4));
        let body = RequestBody::from_stream(chunks(&[b"ab", b"cd"]), 4).counted(counter.clone());
        assert!(!counter.is_finished());

        collect(body).await.unwrap();
        assert_eq!(counter.transferred(), 4);
        assert!(counter.is_finished());
        counter.finished().await;
    }

    #[test]
    fn zero_total_counts_as_finished() {
        assert!(TransferCounter::new(0).is_finished());
    }

    #[test]
    fn size_hint_is_exact() {
        let body = RequestBody::from_stream(chunks(&[b"ab"]), 2);
        assert_eq!(body.size_hint().exact(), Some(2));
        assert_eq!(RequestBody::empty().size_hint().exact(), Some(0));
    }
}

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Request, Response};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use tokio::time::Instant;

use super::render::{SilentProgress, TerminalLiveWriter, TerminalProgressBar};
use super::{DEFAULT_POLLING_INTERVAL, LiveWriter, PollingInterval, ProgressBar};
use crate::body::{RequestBody, TransferCounter};
use crate::error::{BoxError, HttpError};
use crate::executor::HttpExecutor;
use crate::response::ResponseBody;

const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(10);

/// Executor wrapper that reports transfer progress.
///
/// Requests with a non-empty body are uploads: the bar follows the bytes
/// read from the body and ends when the last byte is out, after which a
/// heartbeat line is written on every polling tick until the response
/// arrives. Requests without a body are downloads: the heartbeat runs while
/// waiting for the response headers and the bar then follows the response
/// body as the caller reads it.
///
/// All reporting happens inside the `execute` future. When that future
/// completes, fails, panics or is dropped, the bar is ended and the live
/// writer stopped before control returns to the caller.
pub struct ProgressClient<E> {
    inner: E,
    bar: Arc<dyn ProgressBar>,
    live: Arc<dyn LiveWriter>,
    polling_interval: Duration,
}

impl<E> ProgressClient<E> {
    pub fn new(inner: E, bar: Arc<dyn ProgressBar>, live: Arc<dyn LiveWriter>) -> Self {
        Self {
            inner,
            bar,
            live,
            polling_interval: DEFAULT_POLLING_INTERVAL,
        }
    }

    /// Renders on stderr when it is a terminal and stays silent otherwise.
    pub fn for_terminal(inner: E) -> Self {
        if SilentProgress::stderr_is_terminal() {
            Self::new(
                inner,
                Arc::new(TerminalProgressBar::new()),
                Arc::new(TerminalLiveWriter::new()),
            )
        } else {
            Self::new(inner, Arc::new(SilentProgress), Arc::new(SilentProgress))
        }
    }

    #[must_use]
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    fn interval_for(&self, request: &Request<RequestBody>) -> Duration {
        request
            .extensions()
            .get::<PollingInterval>()
            .map_or(self.polling_interval, |p| p.0)
            .max(MIN_POLLING_INTERVAL)
    }
}

impl<E> std::fmt::Debug for ProgressClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressClient")
            .field("polling_interval", &self.polling_interval)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<E> HttpExecutor for ProgressClient<E>
where
    E: HttpExecutor,
{
    async fn execute(
        &self,
        request: Request<RequestBody>,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let interval = self.interval_for(&request);
        match request.body().content_length() {
            Some(total) if total > 0 => self.upload(request, total, interval).await,
            _ => self.download(request, interval).await,
        }
    }
}

impl<E> ProgressClient<E>
where
    E: HttpExecutor,
{
    async fn upload(
        &self,
        request: Request<RequestBody>,
        total: u64,
        interval: Duration,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let counter = Arc::new(TransferCounter::new(total));
        let request = request.map(|body| body.counted(Arc::clone(&counter)));

        self.bar.set_total(total);
        self.bar.kickoff();
        let teardown = Teardown::new(&*self.bar, &*self.live, true);

        tokio::select! {
            biased;
            result = self.inner.execute(request) => result,
            never = teardown.track_upload(&counter, interval) => match never {},
        }
    }

    async fn download(
        &self,
        request: Request<RequestBody>,
        interval: Duration,
    ) -> Result<Response<ResponseBody>, HttpError> {
        let response = {
            let teardown = Teardown::new(&*self.bar, &*self.live, false);
            tokio::select! {
                biased;
                result = self.inner.execute(request) => result,
                never = teardown.wait_for_response(interval) => match never {},
            }
        }?;

        if !response.status().is_success() {
            return Ok(response);
        }

        let total = declared_length(response.headers());
        self.bar.set_total(total);
        self.bar.kickoff();
        let bar = Arc::clone(&self.bar);
        Ok(response.map(|body| ProgressBody::new(body, bar, interval).boxed()))
    }
}

fn declared_length(headers: &HeaderMap) -> u64 {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Rounds to whole seconds, halves up.
fn round_to_secs(elapsed: Duration) -> Duration {
    Duration::from_secs(elapsed.as_secs() + u64::from(elapsed.subsec_millis() >= 500))
}

/// Ends the bar and stops the live writer when dropped.
struct Teardown<'a> {
    bar: &'a dyn ProgressBar,
    live: &'a dyn LiveWriter,
    bar_running: AtomicBool,
    live_running: AtomicBool,
}

impl<'a> Teardown<'a> {
    fn new(bar: &'a dyn ProgressBar, live: &'a dyn LiveWriter, bar_running: bool) -> Self {
        Self {
            bar,
            live,
            bar_running: AtomicBool::new(bar_running),
            live_running: AtomicBool::new(false),
        }
    }

    fn end_bar(&self) {
        if self.bar_running.swap(false, Ordering::AcqRel) {
            self.bar.end();
        }
    }

    /// Follows the upload counter, then switches to the heartbeat.
    async fn track_upload(&self, counter: &TransferCounter, interval: Duration) -> Infallible {
        loop {
            tokio::select! {
                () = counter.finished() => break,
                () = tokio::time::sleep(interval) => self.bar.set_position(counter.transferred()),
            }
        }
        self.bar.set_position(counter.total());
        self.end_bar();
        self.wait_for_response(interval).await
    }

    async fn wait_for_response(&self, interval: Duration) -> Infallible {
        self.live_running.store(true, Ordering::Release);
        self.live.start();

        let start = Instant::now();
        let mut ticks = tokio::time::interval_at(start + interval, interval);
        loop {
            let tick = ticks.tick().await;
            let elapsed = round_to_secs(tick.saturating_duration_since(start));
            self.live.write_line(&format!(
                "{} elapsed, waiting for response from server...",
                humantime::format_duration(elapsed)
            ));
        }
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        self.end_bar();
        if self.live_running.swap(false, Ordering::AcqRel) {
            self.live.stop();
        }
    }
}

/// Response body that moves the bar as it is read and ends it on EOF,
/// error or drop.
struct ProgressBody {
    inner: ResponseBody,
    bar: Arc<dyn ProgressBar>,
    running: bool,
    position: u64,
    interval: Duration,
    last_update: Instant,
}

impl ProgressBody {
    fn new(inner: ResponseBody, bar: Arc<dyn ProgressBar>, interval: Duration) -> Self {
        Self {
            inner,
            bar,
            running: true,
            position: 0,
            interval,
            last_update: Instant::now(),
        }
    }

    fn finish(&mut self) {
        if std::mem::take(&mut self.running) {
            self.bar.set_position(self.position);
            self.bar.end();
        }
    }
}

impl Body for ProgressBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.position += data.len() as u64;
                    let now = Instant::now();
                    if now.saturating_duration_since(this.last_update) >= this.interval {
                        this.last_update = now;
                        this.bar.set_position(this.position);
                    }
                }
            }
            Poll::Ready(None | Some(Err(_))) => this.finish(),
            Poll::Pending => {}
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

impl Drop for ProgressBody {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::progress::testing::{ProgressEvent, ProgressRecorder};
    use crate::response::full_body;
    use futures::stream;

    const MIB: usize = 1024 * 1024;
    const CHUNK: usize = 64 * 1024;

    /// Reads the request body at a fixed pace, then waits before answering.
    #[derive(Clone)]
    struct SlowServer {
        per_frame: Duration,
        frames_to_read: Option<usize>,
        then_wait: Duration,
        status: u16,
        explode: bool,
    }

    impl Default for SlowServer {
        fn default() -> Self {
            Self {
                per_frame: Duration::ZERO,
                frames_to_read: None,
                then_wait: Duration::ZERO,
                status: 200,
                explode: false,
            }
        }
    }

    #[async_trait]
    impl HttpExecutor for SlowServer {
        async fn execute(
            &self,
            request: Request<RequestBody>,
        ) -> Result<Response<ResponseBody>, HttpError> {
            let mut body = request.into_body();
            let mut read = 0;
            while self.frames_to_read.is_none_or(|n| read < n) {
                tokio::time::sleep(self.per_frame).await;
                match body.frame().await {
                    Some(frame) => {
                        frame.map_err(HttpError::Body)?;
                        read += 1;
                    }
                    None => break,
                }
            }
            tokio::time::sleep(self.then_wait).await;
            assert!(!self.explode, "server exploded");
            Ok(Response::builder()
                .status(self.status)
                .header("content-length", "2")
                .body(full_body("{}"))
                .unwrap())
        }
    }

    fn upload_request(total: usize) -> Request<RequestBody> {
        let chunks: Vec<std::io::Result<Bytes>> = (0..total.div_ceil(CHUNK))
            .map(|_| Ok(Bytes::from(vec![0u8; CHUNK])))
            .collect();
        Request::post("/api/v0/available_products")
            .body(RequestBody::from_stream(stream::iter(chunks), total as u64))
            .unwrap()
    }

    fn client(server: SlowServer, recorder: &ProgressRecorder) -> ProgressClient<SlowServer> {
        ProgressClient::new(server, Arc::new(recorder.clone()), Arc::new(recorder.clone()))
    }

    #[tokio::test(start_paused = true)]
    async fn upload_with_long_tail_writes_heartbeat_per_tick() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            per_frame: Duration::from_micros(62_500),
            then_wait: Duration::from_millis(3500),
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let response = client.execute(upload_request(MIB)).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        assert_eq!(
            recorder.lines(),
            vec![
                "1s elapsed, waiting for response from server...",
                "2s elapsed, waiting for response from server...",
                "3s elapsed, waiting for response from server...",
            ]
        );
        let events = recorder.events();
        assert_eq!(events[0], ProgressEvent::SetTotal(MIB as u64));
        assert_eq!(events[1], ProgressEvent::Kickoff);
        assert_eq!(recorder.count(&ProgressEvent::End), 1);
        assert!(
            recorder.position_of(&ProgressEvent::End) < recorder.position_of(&ProgressEvent::LiveStart)
        );
        assert_eq!(events.last(), Some(&ProgressEvent::LiveStop));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.events(), events);
    }

    #[tokio::test(start_paused = true)]
    async fn early_response_tears_down_without_heartbeat() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            per_frame: Duration::from_millis(100),
            frames_to_read: Some(1),
            status: 408,
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let response = client.execute(upload_request(MIB)).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            recorder.events(),
            vec![
                ProgressEvent::SetTotal(MIB as u64),
                ProgressEvent::Kickoff,
                ProgressEvent::End
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn interval_longer_than_call_writes_no_lines() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            then_wait: Duration::from_millis(300),
            ..SlowServer::default()
        };
        let client = client(server, &recorder).with_polling_interval(Duration::from_secs(10));

        client.execute(upload_request(CHUNK * 3)).await.unwrap();
        assert!(recorder.lines().is_empty());
        assert_eq!(recorder.count(&ProgressEvent::Kickoff), 1);
        assert_eq!(recorder.count(&ProgressEvent::End), 1);
        assert_eq!(recorder.events().last(), Some(&ProgressEvent::LiveStop));
    }

    #[tokio::test(start_paused = true)]
    async fn request_extension_overrides_interval() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            then_wait: Duration::from_millis(5500),
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let mut request = upload_request(CHUNK);
        request
            .extensions_mut()
            .insert(PollingInterval(Duration::from_secs(2)));
        client.execute(request).await.unwrap();

        assert_eq!(
            recorder.lines(),
            vec![
                "2s elapsed, waiting for response from server...",
                "4s elapsed, waiting for response from server...",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn panic_in_call_still_stops_live_writer() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            then_wait: Duration::from_millis(1500),
            explode: true,
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let joined = tokio::spawn(async move { client.execute(upload_request(CHUNK)).await }).await;
        assert!(joined.unwrap_err().is_panic());
        assert_eq!(recorder.lines().len(), 1);
        assert_eq!(recorder.count(&ProgressEvent::End), 1);
        assert_eq!(recorder.events().last(), Some(&ProgressEvent::LiveStop));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_stops_live_writer() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            then_wait: Duration::from_secs(3600),
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let result =
            tokio::time::timeout(Duration::from_millis(2500), client.execute(upload_request(CHUNK)))
                .await;
        assert!(result.is_err());
        assert_eq!(recorder.lines().len(), 2);
        assert_eq!(recorder.events().last(), Some(&ProgressEvent::LiveStop));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recorder.lines().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn download_follows_response_body() {
        let recorder = ProgressRecorder::new();
        let server = SlowServer {
            then_wait: Duration::from_millis(1200),
            ..SlowServer::default()
        };
        let client = client(server, &recorder);

        let request = Request::get("/api/v0/installation_asset_collection")
            .body(RequestBody::empty())
            .unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(recorder.lines().len(), 1);
        assert_eq!(recorder.events().last(), Some(&ProgressEvent::Kickoff));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, "{}");

        let events = recorder.events();
        assert_eq!(
            &events[events.len() - 4..],
            &[
                ProgressEvent::SetTotal(2),
                ProgressEvent::Kickoff,
                ProgressEvent::Position(2),
                ProgressEvent::End
            ]
        );
        assert_eq!(recorder.count(&ProgressEvent::LiveStop), 1);
    }

    #[tokio::test]
    async fn dropped_download_body_ends_bar() {
        let recorder = ProgressRecorder::new();
        let client = client(SlowServer::default(), &recorder);

        let request = Request::get("/download").body(RequestBody::empty()).unwrap();
        let response = client.execute(request).await.unwrap();
        drop(response);
        assert_eq!(recorder.count(&ProgressEvent::End), 1);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(round_to_secs(Duration::from_millis(1499)), Duration::from_secs(1));
        assert_eq!(round_to_secs(Duration::from_millis(1500)), Duration::from_secs(2));
    }
}

//! Transport channel to a Flight service
//!
//! Wraps a tonic [`Channel`] and the generated [`FlightServiceClient`].
//! Calls never retry. Every in-flight call registers an abort handle so
//! that [`FlightChannel::close`] can cut it short.
//!
//! Concurrency: clones share one HTTP/2 connection, and every call runs
//! on its own HTTP/2 stream, so a channel may be used from many tasks at
//! once without external locking.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arrow_flight::flight_service_client::FlightServiceClient;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use futures::Stream;
use parking_lot::Mutex;
use tableflight_core::{ClientConfig, ServiceAddress};
use tonic::transport::{Channel, Endpoint};
use tokio::time::Sleep;
use tonic::{Response, Status, Streaming};
use tracing::{debug, info};

use crate::error::FlightError;
use crate::Result;

#[derive(Default)]
struct CallRegistry {
    next_id: u64,
    handles: HashMap<u64, AbortHandle>,
}

struct ChannelState {
    closed: AtomicBool,
    calls: Mutex<CallRegistry>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            calls: Mutex::new(CallRegistry::default()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) -> usize {
        let mut calls = self.calls.lock();
        self.closed.store(true, Ordering::Release);
        let aborted = calls.handles.len();
        for (_, handle) in calls.handles.drain() {
            handle.abort();
        }
        aborted
    }
}

/// Registration of one call; unregisters itself when dropped
struct CallGuard {
    state: Arc<ChannelState>,
    id: u64,
}

impl CallGuard {
    fn register(state: &Arc<ChannelState>) -> Result<(Self, AbortRegistration)> {
        let mut calls = state.calls.lock();
        // checked under the lock so close() cannot miss this call
        if state.is_closed() {
            return Err(FlightError::ConnectionClosedError);
        }
        let (handle, registration) = AbortHandle::new_pair();
        let id = calls.next_id;
        calls.next_id += 1;
        calls.handles.insert(id, handle);
        let guard = Self {
            state: state.clone(),
            id,
        };
        Ok((guard, registration))
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.state.calls.lock().handles.remove(&self.id);
    }
}

/// Connection to one Flight service
#[derive(Clone)]
pub struct FlightChannel {
    client: FlightServiceClient<Channel>,
    address: ServiceAddress,
    request_timeout: Option<Duration>,
    state: Arc<ChannelState>,
}

impl FlightChannel {
    /// Connect with default settings
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with_config(&ClientConfig::new(address)).await
    }

    /// Connect eagerly, failing with `ConnectionError` when the address is
    /// malformed or nothing answers there
    pub async fn connect_with_config(config: &ClientConfig) -> Result<Self> {
        let address = config.service_address()?;
        info!("Connecting to Flight service at {}", address);

        let mut endpoint = Endpoint::from_shared(address.uri())
            .map_err(|e| connection_error(&address, &e))?
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(config.tcp_keepalive());
        if let Some(timeout) = config.request_timeout() {
            endpoint = endpoint.timeout(timeout);
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| connection_error(&address, &e))?;

        let client = FlightServiceClient::new(channel)
            .max_decoding_message_size(config.max_message_size);

        Ok(Self {
            client,
            address,
            request_timeout: config.request_timeout(),
            state: Arc::new(ChannelState::new()),
        })
    }

    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Close the channel for every clone, aborting in-flight calls
    pub fn close(&self) {
        if self.state.is_closed() {
            return;
        }
        let aborted = self.state.close();
        info!(
            "Closed Flight channel to {} ({} calls aborted)",
            self.address, aborted
        );
    }

    /// Issue a unary call
    pub async fn unary<F, Fut, R>(&self, rpc: &'static str, call: F) -> Result<R>
    where
        F: FnOnce(FlightServiceClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<R>, Status>>,
    {
        let (_guard, registration) = CallGuard::register(&self.state)?;
        debug!("{} -> {}", rpc, self.address);

        match Abortable::new(call(self.client.clone()), registration).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(FlightError::RpcError { rpc, status }),
            Err(_) => Err(FlightError::ConnectionClosedError),
        }
    }

    /// Issue a server-streaming call and return its response frames
    pub async fn streaming<F, Fut, T>(&self, rpc: &'static str, call: F) -> Result<FrameStream<T>>
    where
        F: FnOnce(FlightServiceClient<Channel>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Streaming<T>>, Status>>,
    {
        let streaming = self.unary(rpc, call).await?;

        // the open call's registration is gone; the stream gets its own
        let (guard, registration) = CallGuard::register(&self.state)?;
        debug!("{} stream opened on {}", rpc, self.address);

        Ok(FrameStream {
            inner: Box::pin(Abortable::new(streaming, registration)),
            guard: Some(guard),
            state: self.state.clone(),
            rpc,
            frames: 0,
            frame_timeout: self.request_timeout,
            deadline: None,
        })
    }
}

impl std::fmt::Debug for FlightChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightChannel")
            .field("address", &self.address)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn connection_error(address: &ServiceAddress, err: &dyn std::error::Error) -> FlightError {
    // tonic's transport error hides the cause behind `source()`
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    FlightError::ConnectionError {
        address: address.to_string(),
        reason,
    }
}

/// Response frames of one streaming call, in arrival order
///
/// Finite and single-pass. Dropping it cancels the underlying gRPC
/// stream. After the channel is closed it yields `ConnectionClosedError`
/// once and then ends. With a request timeout configured, waiting longer
/// than that for the next frame fails with `DEADLINE_EXCEEDED`.
pub struct FrameStream<T> {
    inner: Pin<Box<Abortable<Streaming<T>>>>,
    guard: Option<CallGuard>,
    state: Arc<ChannelState>,
    rpc: &'static str,
    frames: usize,
    frame_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<T> FrameStream<T> {
    pub fn rpc(&self) -> &'static str {
        self.rpc
    }

    /// Frames received so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    fn finish(&mut self) {
        self.deadline = None;
        if self.guard.take().is_some() {
            debug!("{} stream finished after {} frames", self.rpc, self.frames);
        }
    }
}

impl<T> Stream for FrameStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.guard.is_none() {
            return Poll::Ready(None);
        }

        let polled = match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(polled) => polled,
            Poll::Pending => {
                let Some(timeout) = this.frame_timeout else {
                    return Poll::Pending;
                };
                let deadline = this
                    .deadline
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
                if deadline.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                this.finish();
                let status = Status::deadline_exceeded(format!(
                    "no frame within {:?} after {} frames",
                    timeout, this.frames
                ));
                return Poll::Ready(Some(Err(FlightError::RpcError {
                    rpc: this.rpc,
                    status,
                })));
            }
        };
        // the next frame gets a fresh deadline
        this.deadline = None;

        match polled {
            Some(Ok(frame)) => {
                this.frames += 1;
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(status)) => {
                this.finish();
                Poll::Ready(Some(Err(FlightError::RpcError {
                    rpc: this.rpc,
                    status,
                })))
            }
            None => {
                this.finish();
                if this.state.is_closed() {
                    Poll::Ready(Some(Err(FlightError::ConnectionClosedError)))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}

impl<T> std::fmt::Debug for FrameStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("rpc", &self.rpc)
            .field("frames", &self.frames)
            .field("finished", &self.is_finished())
            .finish()
    }
}

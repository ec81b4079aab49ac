//! Flight discovery
//!
//! `ListFlights` streams one `FlightInfo` per response frame. The listing
//! is lazy: nothing beyond the first frame is pulled until it is polled.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow_flight::{Criteria, FlightDescriptor, FlightInfo};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tracing::debug;

use crate::channel::{FlightChannel, FrameStream};
use crate::Result;

/// Flights advertised by a service, in arrival order
#[derive(Debug)]
pub struct FlightListing {
    frames: FrameStream<FlightInfo>,
}

impl FlightListing {
    /// Drain the listing
    pub async fn collect_all(self) -> Result<Vec<FlightInfo>> {
        let flights: Vec<FlightInfo> = self.try_collect().await?;
        debug!("Listed {} flights", flights.len());
        Ok(flights)
    }
}

impl Stream for FlightListing {
    type Item = Result<FlightInfo>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().frames).poll_next(cx)
    }
}

/// Start a `ListFlights` call; `None` lists everything
pub async fn list_flights(
    channel: &FlightChannel,
    criteria: Option<Criteria>,
) -> Result<FlightListing> {
    let criteria = criteria.unwrap_or_default();
    let frames = channel
        .streaming("ListFlights", |mut client| async move {
            client.list_flights(criteria).await
        })
        .await?;
    Ok(FlightListing { frames })
}

/// Criteria carrying an opaque filter expression
pub fn criteria(expression: impl Into<Bytes>) -> Criteria {
    Criteria {
        expression: expression.into(),
    }
}

/// Human-readable form of a descriptor
pub fn describe_descriptor(descriptor: Option<&FlightDescriptor>) -> String {
    match descriptor {
        None => "<none>".to_string(),
        Some(d) if !d.cmd.is_empty() => format!("cmd: {}", String::from_utf8_lossy(&d.cmd)),
        Some(d) => format!("path: {}", d.path.join("/")),
    }
}

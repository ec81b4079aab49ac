//! Endpoint selection and ticket resolution
//!
//! A flight may be served from several endpoints. Which one to read is a
//! policy, expressed as an [`EndpointSelector`]; [`FirstEndpoint`] is the
//! default.

use arrow_flight::{FlightEndpoint, FlightInfo, Ticket};

use crate::error::FlightError;
use crate::Result;

/// Chooses the endpoint a flight is read from
pub trait EndpointSelector: Send + Sync {
    fn select<'a>(&self, info: &'a FlightInfo) -> Result<&'a FlightEndpoint>;
}

/// Always the first endpoint in list order
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstEndpoint;

impl EndpointSelector for FirstEndpoint {
    fn select<'a>(&self, info: &'a FlightInfo) -> Result<&'a FlightEndpoint> {
        info.endpoint.first().ok_or(FlightError::NoEndpointError)
    }
}

/// Selector backed by a function returning an endpoint index
pub struct SelectByIndex<F>(pub F);

impl<F> EndpointSelector for SelectByIndex<F>
where
    F: Fn(&FlightInfo) -> Option<usize> + Send + Sync,
{
    fn select<'a>(&self, info: &'a FlightInfo) -> Result<&'a FlightEndpoint> {
        (self.0)(info)
            .and_then(|index| info.endpoint.get(index))
            .ok_or(FlightError::NoEndpointError)
    }
}

/// Ticket of an endpoint
pub fn endpoint_ticket(endpoint: &FlightEndpoint) -> Result<&Ticket> {
    endpoint
        .ticket
        .as_ref()
        .ok_or(FlightError::MissingTicketError)
}

/// Ticket of the endpoint chosen by `selector`
pub fn select_ticket<'a>(
    selector: &dyn EndpointSelector,
    info: &'a FlightInfo,
) -> Result<&'a Ticket> {
    endpoint_ticket(selector.select(info)?)
}

/// Ticket of the first endpoint
pub fn first_ticket(info: &FlightInfo) -> Result<&Ticket> {
    select_ticket(&FirstEndpoint, info)
}

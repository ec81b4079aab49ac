//! Arrow Flight client facade
//!
//! Ties the channel, discovery, endpoint selection and retrieval together:
//! list flights, pick one, fetch its table.

use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow_flight::{Action, ActionType, Criteria, Empty, FlightDescriptor, FlightInfo, Ticket};
use bytes::Bytes;
use futures::TryStreamExt;
use tableflight_core::{ClientConfig, ServiceAddress, Table, TableAssembler};
use tracing::info;

use crate::channel::FlightChannel;
use crate::directory::{self, FlightListing};
use crate::error::FlightError;
use crate::reader::{self, RecordBatchReader};
use crate::ticket::{select_ticket, EndpointSelector, FirstEndpoint};
use crate::Result;

/// Flight client bound to one service
pub struct FlightClient {
    channel: FlightChannel,
    assembler: TableAssembler,
    selector: Arc<dyn EndpointSelector>,
}

impl FlightClient {
    /// Connect to a Flight service
    pub async fn connect(address: &str) -> Result<Self> {
        Self::connect_with_config(&ClientConfig::new(address)).await
    }

    pub async fn connect_with_config(config: &ClientConfig) -> Result<Self> {
        let channel = FlightChannel::connect_with_config(config).await?;
        let assembler = TableAssembler::new().require_non_empty(config.require_non_empty);
        Ok(Self::from_channel(channel).with_assembler(assembler))
    }

    /// Wrap an existing channel; clones of it stay usable elsewhere
    pub fn from_channel(channel: FlightChannel) -> Self {
        Self {
            channel,
            assembler: TableAssembler::new(),
            selector: Arc::new(FirstEndpoint),
        }
    }

    /// Use a different endpoint selection policy
    pub fn with_selector(mut self, selector: impl EndpointSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    pub fn with_assembler(mut self, assembler: TableAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn channel(&self) -> &FlightChannel {
        &self.channel
    }

    pub fn address(&self) -> &ServiceAddress {
        self.channel.address()
    }

    /// Lazily list the flights matching `criteria`
    pub async fn list_flights(&self, criteria: Option<Criteria>) -> Result<FlightListing> {
        directory::list_flights(&self.channel, criteria).await
    }

    /// Open a record batch stream for `ticket`
    pub async fn do_get(&self, ticket: &Ticket) -> Result<RecordBatchReader> {
        reader::do_get(&self.channel, ticket).await
    }

    /// Retrieve the whole stream for `ticket` as a table
    pub async fn fetch_table(&self, ticket: &Ticket) -> Result<Table> {
        let reader = self.do_get(ticket).await?;
        let table = reader.read_all(&self.assembler).await?;
        info!(
            "Fetched {} rows in {} batches from {}",
            table.num_rows(),
            table.num_batches(),
            self.address()
        );
        Ok(table)
    }

    /// Retrieve a flight through the configured endpoint selector
    pub async fn fetch_flight(&self, info: &FlightInfo) -> Result<Table> {
        let ticket = select_ticket(self.selector.as_ref(), info)?;
        self.fetch_table(ticket).await
    }

    /// Get flight info for a descriptor
    pub async fn get_flight_info(&self, descriptor: FlightDescriptor) -> Result<FlightInfo> {
        self.channel
            .unary("GetFlightInfo", |mut client| async move {
                client.get_flight_info(descriptor).await
            })
            .await
    }

    /// Get the schema of a flight without retrieving it
    pub async fn get_schema(&self, descriptor: FlightDescriptor) -> Result<SchemaRef> {
        let result = self
            .channel
            .unary("GetSchema", |mut client| async move {
                client.get_schema(descriptor).await
            })
            .await?;
        let schema = Schema::try_from(&result).map_err(FlightError::ArrowError)?;
        Ok(Arc::new(schema))
    }

    /// List the actions the service supports
    pub async fn list_actions(&self) -> Result<Vec<ActionType>> {
        let frames = self
            .channel
            .streaming("ListActions", |mut client| async move {
                client.list_actions(Empty {}).await
            })
            .await?;
        frames.try_collect().await
    }

    /// Run an action and collect its result bodies
    pub async fn do_action(&self, action: Action) -> Result<Vec<Bytes>> {
        info!("Running action '{}' on {}", action.r#type, self.address());
        let frames = self
            .channel
            .streaming("DoAction", |mut client| async move {
                client.do_action(action).await
            })
            .await?;
        frames.map_ok(|result| result.body).try_collect().await
    }

    /// Close the underlying channel
    pub fn close(&self) {
        self.channel.close();
    }
}

/// List every flight a service advertises
pub async fn list_flights(address: &str) -> Result<Vec<FlightInfo>> {
    let client = FlightClient::connect(address).await?;
    let flights = client.list_flights(None).await?.collect_all().await;
    client.close();
    flights
}

/// Retrieve the stream for `ticket` as a table
pub async fn fetch_table(address: &str, ticket: &Ticket) -> Result<Table> {
    let client = FlightClient::connect(address).await?;
    let table = client.fetch_table(ticket).await;
    client.close();
    table
}

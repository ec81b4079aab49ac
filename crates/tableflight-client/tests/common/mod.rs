//! In-memory Flight service for integration tests
//!
//! Serves registered datasets over a real tonic server bound to an
//! ephemeral port on 127.0.0.1.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arrow::array::{Float64Array, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaAsIpc, SchemaResult, Ticket,
};
use arrow_ipc::writer::IpcWriteOptions;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

/// A dataset served under one ticket
#[derive(Clone)]
struct Dataset {
    descriptor: FlightDescriptor,
    schema: SchemaRef,
    /// Consecutive batches sharing a schema are encoded together; a new
    /// group starts a new schema message
    groups: Vec<Vec<RecordBatch>>,
    advertised: bool,
}

#[derive(Default)]
struct DatasetStore {
    by_ticket: HashMap<Bytes, Dataset>,
    order: Vec<Bytes>,
}

/// Flight service backed by in-memory datasets
#[derive(Clone, Default)]
pub struct TestFlightService {
    datasets: Arc<RwLock<DatasetStore>>,
    endless_ticket: Arc<RwLock<Option<Bytes>>>,
    stalled_ticket: Arc<RwLock<Option<Bytes>>>,
    blocked_path: Arc<RwLock<Option<String>>>,
    blocked_entered: Arc<Notify>,
    released: Arc<AtomicBool>,
    do_get_calls: Arc<AtomicUsize>,
}

impl TestFlightService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `name` with one endpoint holding `ticket`
    pub fn register(&self, name: &str, ticket: impl Into<Bytes>, batches: Vec<RecordBatch>) {
        let schema = batches[0].schema();
        self.insert(name, ticket.into(), schema, group_by_schema(batches), true);
    }

    /// Serve `ticket` without listing it
    pub fn register_hidden(&self, ticket: impl Into<Bytes>, batches: Vec<RecordBatch>) {
        let schema = batches[0].schema();
        self.insert("hidden", ticket.into(), schema, group_by_schema(batches), false);
    }

    /// Serve `ticket` with a stream that never ends
    pub fn register_endless(&self, ticket: impl Into<Bytes>) {
        *self.endless_ticket.write() = Some(ticket.into());
    }

    /// Serve `ticket` with one batch, then never send another frame
    pub fn register_stalled(&self, ticket: impl Into<Bytes>) {
        *self.stalled_ticket.write() = Some(ticket.into());
    }

    /// Make `GetFlightInfo` for `name` hang; returns a notifier fired once
    /// the call reaches the service
    pub fn block_flight_info(&self, name: &str) -> Arc<Notify> {
        *self.blocked_path.write() = Some(name.to_string());
        self.blocked_entered.clone()
    }

    /// Whether the endless stream was dropped by the server
    pub fn endless_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn do_get_calls(&self) -> usize {
        self.do_get_calls.load(Ordering::SeqCst)
    }

    fn insert(
        &self,
        name: &str,
        ticket: Bytes,
        schema: SchemaRef,
        groups: Vec<Vec<RecordBatch>>,
        advertised: bool,
    ) {
        let dataset = Dataset {
            descriptor: FlightDescriptor::new_path(vec![name.to_string()]),
            schema,
            groups,
            advertised,
        };
        let mut store = self.datasets.write();
        store.order.push(ticket.clone());
        store.by_ticket.insert(ticket, dataset);
    }

    fn flight_info(ticket: &Bytes, dataset: &Dataset) -> Result<FlightInfo, Status> {
        let rows: usize = dataset.groups.iter().flatten().map(|b| b.num_rows()).sum();
        let info = FlightInfo::new()
            .with_descriptor(dataset.descriptor.clone())
            .try_with_schema(&dataset.schema)
            .map_err(|e| Status::internal(e.to_string()))?
            .with_endpoint(
                FlightEndpoint::new()
                    .with_ticket(Ticket::new(ticket.clone()))
                    .with_location("grpc+tcp://127.0.0.1:0"),
            )
            .with_total_records(rows as i64);
        Ok(info)
    }

    fn find(&self, descriptor: &FlightDescriptor) -> Result<(Bytes, Dataset), Status> {
        let store = self.datasets.read();
        store
            .order
            .iter()
            .filter_map(|t| store.by_ticket.get(t).map(|d| (t, d)))
            .find(|(_, d)| d.descriptor.path == descriptor.path)
            .map(|(t, d)| (t.clone(), d.clone()))
            .ok_or_else(|| Status::not_found(format!("No flight for {:?}", descriptor.path)))
    }
}

fn group_by_schema(batches: Vec<RecordBatch>) -> Vec<Vec<RecordBatch>> {
    let mut groups: Vec<Vec<RecordBatch>> = Vec::new();
    for batch in batches {
        match groups.last_mut() {
            Some(group) if group[0].schema() == batch.schema() => group.push(batch),
            _ => groups.push(vec![batch]),
        }
    }
    groups
}

/// Sets a flag when the server drops the stream it belongs to
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tonic::async_trait]
impl FlightService for TestFlightService {
    type HandshakeStream = BoxStream<'static, Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, Result<PutResult, Status>>;
    type DoActionStream = BoxStream<'static, Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, Result<ActionType, Status>>;
    type DoExchangeStream = BoxStream<'static, Result<FlightData, Status>>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake"))
    }

    async fn list_flights(
        &self,
        request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        let prefix = String::from_utf8_lossy(&request.into_inner().expression).to_string();
        let store = self.datasets.read();

        let mut flights = Vec::new();
        for ticket in &store.order {
            let dataset = &store.by_ticket[ticket];
            let name = dataset.descriptor.path.join("/");
            if dataset.advertised && name.starts_with(&prefix) {
                flights.push(Self::flight_info(ticket, dataset));
            }
        }

        Ok(Response::new(stream::iter(flights).boxed()))
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        let descriptor = request.into_inner();
        let blocked = self.blocked_path.read().clone();
        if blocked.is_some_and(|name| descriptor.path == [name]) {
            self.blocked_entered.notify_one();
            return std::future::pending::<Result<Response<FlightInfo>, Status>>().await;
        }

        let (ticket, dataset) = self.find(&descriptor)?;
        Ok(Response::new(Self::flight_info(&ticket, &dataset)?))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info"))
    }

    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        let (_, dataset) = self.find(&request.into_inner())?;
        let options = IpcWriteOptions::default();
        let result: SchemaResult = SchemaAsIpc::new(&dataset.schema, &options)
            .try_into()
            .map_err(|e: arrow::error::ArrowError| Status::internal(e.to_string()))?;
        Ok(Response::new(result))
    }

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.do_get_calls.fetch_add(1, Ordering::SeqCst);
        let ticket = request.into_inner().ticket;

        if self.endless_ticket.read().as_ref() == Some(&ticket) {
            let flag = ReleaseFlag(self.released.clone());
            let batch = sales_batch(vec![1, 2, 3]);
            let endless = FlightDataEncoderBuilder::new()
                .build(stream::repeat(batch).map(Ok))
                .map(move |item| {
                    let _ = &flag;
                    item.map_err(|e| Status::internal(e.to_string()))
                });
            return Ok(Response::new(endless.boxed()));
        }

        if self.stalled_ticket.read().as_ref() == Some(&ticket) {
            let first = stream::iter(vec![Ok(sales_batch(vec![1, 2, 3]))]);
            let stalled = FlightDataEncoderBuilder::new()
                .build(first.chain(stream::pending()))
                .map_err(|e| Status::internal(e.to_string()));
            return Ok(Response::new(stalled.boxed()));
        }

        let dataset = self
            .datasets
            .read()
            .by_ticket
            .get(&ticket)
            .cloned()
            .ok_or_else(|| Status::not_found("Unknown ticket"))?;

        let frames = stream::iter(dataset.groups)
            .flat_map(|group| {
                FlightDataEncoderBuilder::new().build(stream::iter(group.into_iter().map(Ok)))
            })
            .map_err(|e| Status::internal(e.to_string()));

        Ok(Response::new(frames.boxed()))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("do_put"))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();
        match action.r#type.as_str() {
            "echo" => {
                let result = arrow_flight::Result { body: action.body };
                Ok(Response::new(stream::once(async { Ok(result) }).boxed()))
            }
            _ => Err(Status::unimplemented(format!(
                "Unknown action: {}",
                action.r#type
            ))),
        }
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let actions = vec![Ok(ActionType {
            r#type: "echo".to_string(),
            description: "Return the action body".to_string(),
        })];
        Ok(Response::new(stream::iter(actions).boxed()))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange"))
    }
}

/// A running test server
pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(service: TestFlightService) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let incoming = Box::pin(stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.map(|(socket, _)| socket);
            Some((accepted, listener))
        }));

        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(FlightServiceServer::new(service))
                .serve_with_incoming(incoming)
                .await
                .unwrap();
        });

        Self { addr, handle }
    }

    /// Flight location of the server
    pub fn address(&self) -> String {
        format!("grpc+tcp://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn sales_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("amount", DataType::Float64, false),
    ]))
}

pub fn sales_batch(ids: Vec<i32>) -> RecordBatch {
    let amounts: Vec<f64> = ids.iter().map(|id| *id as f64 * 2.5).collect();
    RecordBatch::try_new(
        sales_schema(),
        vec![
            Arc::new(Int32Array::from(ids)),
            Arc::new(Float64Array::from(amounts)),
        ],
    )
    .unwrap()
}

pub fn cities_batch(cities: Vec<&str>) -> RecordBatch {
    let lat: Vec<f64> = cities.iter().map(|_| 53.8).collect();
    let schema = Arc::new(Schema::new(vec![
        Field::new("city", DataType::Utf8, false),
        Field::new("lat", DataType::Float64, false),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(cities)),
            Arc::new(Float64Array::from(lat)),
        ],
    )
    .unwrap()
}

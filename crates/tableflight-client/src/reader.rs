//! Record batch retrieval
//!
//! `DoGet` answers a ticket with a stream of `FlightData` frames. There is
//! no separate schema negotiation: the first schema frame fixes the schema
//! for the whole stream.
//!
//! ```text
//! Uninitialized --schema--> SchemaEstablished --batch--> Streaming
//!       |                          |                         |
//!       +--------------------------+-------------------------+--> Closed
//! ```
//!
//! A schema frame or batch that disagrees with the established schema ends
//! the stream with `SchemaMismatchError`.

use std::pin::Pin;
use std::task::{Context, Poll};

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::decode::{DecodedPayload, FlightDataDecoder};
use arrow_flight::{FlightData, Ticket};
use futures::{Stream, StreamExt};
use tableflight_core::{Table, TableAssembler};
use tracing::{debug, warn};

use crate::channel::FlightChannel;
use crate::error::FlightError;
use crate::Result;

/// Where a [`RecordBatchReader`] is in its stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    /// No frame decoded yet
    Uninitialized,
    /// Schema known, no batch yet
    SchemaEstablished,
    /// At least one batch delivered
    Streaming,
    /// Exhausted, failed or mismatched; yields nothing more
    Closed,
}

/// Record batches of one `DoGet` stream, in arrival order
pub struct RecordBatchReader {
    decoder: Option<Pin<Box<FlightDataDecoder>>>,
    state: ReaderState,
    schema: Option<SchemaRef>,
    batches_read: usize,
    rows_read: usize,
}

impl RecordBatchReader {
    /// Decode a stream of `FlightData` frames
    pub fn new<S>(frames: S) -> Self
    where
        S: Stream<Item = Result<FlightData>> + Send + 'static,
    {
        let frames = frames.map(|frame| frame.map_err(arrow_flight::error::FlightError::from));
        Self {
            decoder: Some(Box::pin(FlightDataDecoder::new(frames))),
            state: ReaderState::Uninitialized,
            schema: None,
            batches_read: 0,
            rows_read: 0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Schema of the stream once its first schema frame arrived
    pub fn schema(&self) -> Option<SchemaRef> {
        self.schema.clone()
    }

    pub fn batches_read(&self) -> usize {
        self.batches_read
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Drain the stream into a table
    pub async fn read_all(mut self, assembler: &TableAssembler) -> Result<Table> {
        let table = assembler.assemble(&mut self).await?;
        match self.schema.take() {
            Some(schema) if table.num_batches() == 0 => Ok(Table::empty(schema)),
            _ => Ok(table),
        }
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            debug!(
                "DoGet stream closed after {} batches ({} rows)",
                self.batches_read, self.rows_read
            );
        }
        self.state = ReaderState::Closed;
    }

    fn on_schema(&mut self, schema: SchemaRef) -> Result<()> {
        match &self.schema {
            None => {
                debug!("DoGet schema established: {}", schema);
                self.schema = Some(schema);
                self.state = ReaderState::SchemaEstablished;
                Ok(())
            }
            Some(expected) if expected.as_ref() == schema.as_ref() => Ok(()),
            Some(expected) => Err(FlightError::SchemaMismatchError {
                index: self.batches_read,
                expected: expected.clone(),
                found: schema,
            }),
        }
    }

    fn on_batch(&mut self, batch: RecordBatch) -> Result<RecordBatch> {
        let found = batch.schema();
        let expected = self.schema.get_or_insert_with(|| found.clone());
        if expected.as_ref() != found.as_ref() {
            return Err(FlightError::SchemaMismatchError {
                index: self.batches_read,
                expected: expected.clone(),
                found,
            });
        }
        self.state = ReaderState::Streaming;
        self.batches_read += 1;
        self.rows_read += batch.num_rows();
        Ok(batch)
    }
}

impl Stream for RecordBatchReader {
    type Item = Result<RecordBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(decoder) = this.decoder.as_mut() else {
                return Poll::Ready(None);
            };

            let decoded = match decoder.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.close();
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.close();
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(Some(Ok(decoded))) => decoded,
            };

            let outcome = match decoded.payload {
                DecodedPayload::None => continue,
                DecodedPayload::Schema(schema) => match this.on_schema(schema) {
                    Ok(()) => continue,
                    Err(e) => Err(e),
                },
                DecodedPayload::RecordBatch(batch) => this.on_batch(batch),
            };

            if let Err(e) = &outcome {
                warn!("Closing DoGet stream: {}", e);
                this.close();
            }
            return Poll::Ready(Some(outcome));
        }
    }
}

impl std::fmt::Debug for RecordBatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBatchReader")
            .field("state", &self.state)
            .field("batches_read", &self.batches_read)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

/// Open a `DoGet` stream for `ticket`
///
/// A ticket the service rejects fails here with `RpcError`, before any
/// batch is produced.
pub async fn do_get(channel: &FlightChannel, ticket: &Ticket) -> Result<RecordBatchReader> {
    let ticket = ticket.clone();
    let frames = channel
        .streaming("DoGet", |mut client| async move {
            client.do_get(ticket).await
        })
        .await?;
    Ok(RecordBatchReader::new(frames))
}

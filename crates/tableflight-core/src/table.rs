//! In-memory tables assembled from record batch streams

use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::{pin_mut, Stream, TryStreamExt};

use crate::error::{Result, TableError};

/// A schema plus the record batches received for it, in arrival order
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    num_rows: usize,
}

impl Table {
    /// Create a table, checking that every batch carries `schema`
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for (index, batch) in batches.iter().enumerate() {
            check_schema(&schema, batch, index)?;
        }
        let num_rows = batches.iter().map(|b| b.num_rows()).sum();
        Ok(Self {
            schema,
            batches,
            num_rows,
        })
    }

    /// A table with no rows
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Concatenate all batches into one
    pub fn concat(&self) -> Result<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}

fn check_schema(expected: &SchemaRef, batch: &RecordBatch, index: usize) -> Result<()> {
    let found = batch.schema();
    if Arc::ptr_eq(expected, &found) || expected.as_ref() == found.as_ref() {
        return Ok(());
    }
    Err(TableError::SchemaMismatch {
        index,
        expected: expected.clone(),
        found,
    })
}

/// Collects batches into a [`Table`], rejecting schema changes
#[derive(Debug, Clone, Copy, Default)]
pub struct TableAssembler {
    require_non_empty: bool,
}

impl TableAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`TableError::EmptyStream`] when no batch arrives
    pub fn require_non_empty(mut self, require: bool) -> Self {
        self.require_non_empty = require;
        self
    }

    pub fn requires_non_empty(&self) -> bool {
        self.require_non_empty
    }

    /// Drain `batches` into a table; the first batch fixes the schema
    pub async fn assemble<S, E>(&self, batches: S) -> std::result::Result<Table, E>
    where
        S: Stream<Item = std::result::Result<RecordBatch, E>>,
        E: From<TableError>,
    {
        self.assemble_with_schema(None, batches).await
    }

    /// Like [`assemble`](Self::assemble), with the schema known up front
    pub async fn assemble_with_schema<S, E>(
        &self,
        schema: Option<SchemaRef>,
        batches: S,
    ) -> std::result::Result<Table, E>
    where
        S: Stream<Item = std::result::Result<RecordBatch, E>>,
        E: From<TableError>,
    {
        pin_mut!(batches);
        let mut accumulator = Accumulator::new(schema);
        while let Some(batch) = batches.try_next().await? {
            accumulator.push(batch)?;
        }
        Ok(accumulator.finish(self.require_non_empty)?)
    }

    /// Assemble batches that are already in memory
    pub fn assemble_batches<I>(&self, batches: I) -> Result<Table>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        let mut accumulator = Accumulator::new(None);
        for batch in batches {
            accumulator.push(batch)?;
        }
        accumulator.finish(self.require_non_empty)
    }
}

struct Accumulator {
    schema: Option<SchemaRef>,
    batches: Vec<RecordBatch>,
    num_rows: usize,
}

impl Accumulator {
    fn new(schema: Option<SchemaRef>) -> Self {
        Self {
            schema,
            batches: Vec::new(),
            num_rows: 0,
        }
    }

    fn push(&mut self, batch: RecordBatch) -> Result<()> {
        let schema = self.schema.get_or_insert_with(|| batch.schema());
        check_schema(schema, &batch, self.batches.len())?;
        self.num_rows += batch.num_rows();
        self.batches.push(batch);
        Ok(())
    }

    fn finish(self, require_non_empty: bool) -> Result<Table> {
        if self.batches.is_empty() && require_non_empty {
            return Err(TableError::EmptyStream);
        }
        let schema = self.schema.unwrap_or_else(|| Arc::new(Schema::empty()));
        Ok(Table {
            schema,
            batches: self.batches,
            num_rows: self.num_rows,
        })
    }
}

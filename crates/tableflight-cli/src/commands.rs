use anyhow::{Context, Result};
use arrow::csv::Writer as CsvWriter;
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use arrow_flight::{FlightDescriptor, FlightInfo, Ticket};
use colored::Colorize;
use std::path::Path;
use std::time::Instant;
use tableflight_client::{criteria, describe_descriptor, FlightClient, Table};

use crate::config::{Config, OutputFormat};

pub async fn list_flights(client: &FlightClient, filter: Option<String>) -> Result<()> {
    let listing = client.list_flights(filter.map(criteria)).await?;
    let flights = listing.collect_all().await?;

    if flights.is_empty() {
        println!("{}", "No flights advertised".bright_black());
        return Ok(());
    }

    println!("{}", "Available flights:".bright_yellow().bold());
    for flight in &flights {
        print!("{}", describe_flight(flight));
    }
    Ok(())
}

pub async fn fetch(
    client: &FlightClient,
    ticket: Option<Ticket>,
    format: OutputFormat,
    max_rows: usize,
) -> Result<()> {
    let start = Instant::now();

    let table = match ticket {
        Some(ticket) => {
            println!("{} Fetching ticket {}", "→".bright_blue(), format_ticket(&ticket));
            client.fetch_table(&ticket).await?
        }
        None => {
            let flights = client.list_flights(None).await?.collect_all().await?;
            // Selecting among several flights is left to the caller; take the first
            let Some(first) = flights.first() else {
                println!("{}", "No flights advertised, nothing to fetch".bright_black());
                return Ok(());
            };
            println!(
                "{} Fetching first advertised flight ({})",
                "→".bright_blue(),
                describe_descriptor(first.flight_descriptor.as_ref()).bright_cyan()
            );
            client.fetch_flight(first).await?
        }
    };

    println!("{}", render_table(&table, format, max_rows)?);
    println!(
        "{} {} rows in {} batches ({:.2}ms)",
        "✓".bright_green(),
        table.num_rows(),
        table.num_batches(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

pub async fn describe_schema(client: &FlightClient, path: Vec<String>) -> Result<()> {
    let descriptor = FlightDescriptor::new_path(path);
    println!(
        "{} {}",
        "Schema for".bright_yellow(),
        describe_descriptor(Some(&descriptor)).bright_cyan()
    );

    let schema = client.get_schema(descriptor).await?;
    for field in schema.fields() {
        let nullable = if field.is_nullable() { "" } else { " not null" };
        println!("  {} : {:?}{}", field.name(), field.data_type(), nullable);
    }
    Ok(())
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    config.save(path)?;
    println!(
        "{} Configuration written to {}",
        "✓".bright_green(),
        path.display()
    );
    Ok(())
}

/// Ticket from its UTF-8 text or hex form
pub fn parse_ticket(text: Option<String>, hex_ticket: Option<String>) -> Result<Option<Ticket>> {
    match (text, hex_ticket) {
        (Some(_), Some(_)) => anyhow::bail!("Pass either --ticket or --hex, not both"),
        (Some(text), None) => Ok(Some(Ticket::new(text))),
        (None, Some(encoded)) => {
            let encoded = encoded.strip_prefix("0x").unwrap_or(encoded.as_str());
            let bytes = hex::decode(encoded)
                .with_context(|| format!("Invalid hex ticket '{}'", encoded))?;
            Ok(Some(Ticket::new(bytes)))
        }
        (None, None) => Ok(None),
    }
}

pub fn format_ticket(ticket: &Ticket) -> String {
    format!(
        "'{}' (0x{})",
        String::from_utf8_lossy(&ticket.ticket),
        hex::encode(&ticket.ticket)
    )
}

pub fn describe_flight(flight: &FlightInfo) -> String {
    let mut out = format!(
        "  {} {}\n",
        "descriptor:".bright_black(),
        describe_descriptor(flight.flight_descriptor.as_ref())
    );
    for (i, endpoint) in flight.endpoint.iter().enumerate() {
        let ticket = endpoint
            .ticket
            .as_ref()
            .map(format_ticket)
            .unwrap_or_else(|| "<none>".to_string());
        out.push_str(&format!("  {} [{}] ticket {}", "endpoint:".bright_black(), i, ticket));
        if !endpoint.location.is_empty() {
            let locations: Vec<&str> = endpoint.location.iter().map(|l| l.uri.as_str()).collect();
            out.push_str(&format!(" at {}", locations.join(", ")));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "  {} {}\n  {} {}\n\n",
        "total_records:".bright_black(),
        format_total(flight.total_records),
        "total_bytes:".bright_black(),
        format_total(flight.total_bytes)
    ));
    out
}

fn format_total(value: i64) -> String {
    if value < 0 {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

/// Render at most `max_rows` rows (0 = all) in the requested format
pub fn render_table(table: &Table, format: OutputFormat, max_rows: usize) -> Result<String> {
    let batches = take_rows(table.batches(), max_rows);

    let mut rendered = match format {
        OutputFormat::Table => {
            if batches.is_empty() {
                format!("(empty table, {} columns)", table.num_columns())
            } else {
                pretty_format_batches(&batches)?.to_string()
            }
        }
        OutputFormat::Json => {
            let mut writer = ArrayWriter::new(Vec::new());
            let refs: Vec<&RecordBatch> = batches.iter().collect();
            writer.write_batches(&refs)?;
            writer.finish()?;
            String::from_utf8(writer.into_inner())?
        }
        OutputFormat::Csv => {
            let mut buf = Vec::new();
            {
                let mut writer = CsvWriter::new(&mut buf);
                for batch in &batches {
                    writer.write(batch)?;
                }
            }
            String::from_utf8(buf)?
        }
    };

    let shown: usize = batches.iter().map(|b| b.num_rows()).sum();
    if shown < table.num_rows() && format == OutputFormat::Table {
        rendered.push_str(&format!("\n... {} more rows", table.num_rows() - shown));
    }
    Ok(rendered)
}

fn take_rows(batches: &[RecordBatch], max_rows: usize) -> Vec<RecordBatch> {
    if max_rows == 0 {
        return batches.to_vec();
    }

    let mut remaining = max_rows;
    let mut taken = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let rows = batch.num_rows().min(remaining);
        taken.push(batch.slice(0, rows));
        remaining -= rows;
    }
    taken
}

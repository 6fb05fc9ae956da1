use crate::measurement::{Measurement, MeasurementBuilder};
use crate::sink::{Encoding, FIELDS};
use crate::timestamp::parse_instant;
use crossbeam::queue::SegQueue;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("line {line}: invalid instant '{value}' for {field}: {source}")]
    Timestamp {
        line: usize,
        field: &'static str,
        value: String,
        source: chrono::ParseError,
    },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

fn set_field(
    b: MeasurementBuilder,
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<MeasurementBuilder, ReadError> {
    let t = parse_instant(value).map_err(|source| ReadError::Timestamp {
        line,
        field,
        value: value.to_string(),
        source,
    })?;
    Ok(match field {
        "start" => b.start(t),
        "connected" => b.connected(t),
        "serverReceived" => b.server_received(t),
        "firstResponse" => b.first_response(t),
        _ => b.completed(t),
    })
}

fn known_field(name: &str) -> Option<&'static str> {
    FIELDS.iter().find(|f| **f == name).copied()
}

/// Line oriented parser for the record layouts written by the sinks.
#[derive(Debug)]
pub struct RecordParser {
    encoding: Encoding,
    line: usize,
}

impl RecordParser {
    pub fn new(encoding: Encoding) -> RecordParser {
        RecordParser { encoding, line: 0 }
    }

    /// Parse the next line. Lines that carry no record (document framing,
    /// headers, blanks) yield `Ok(None)`.
    pub fn parse_line(&mut self, text: &str) -> Result<Option<Measurement>, ReadError> {
        self.line += 1;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        match self.encoding {
            Encoding::Xml => self.parse_xml(text),
            Encoding::Delimited => self.parse_delimited(text),
        }
    }

    fn parse_xml(&self, text: &str) -> Result<Option<Measurement>, ReadError> {
        let mut rest = match text.strip_prefix("<result") {
            Some(r) if r.starts_with(char::is_whitespace) || r.starts_with('/') => r,
            _ => return Ok(None),
        };
        let malformed = |reason: &str| ReadError::Malformed {
            line: self.line,
            reason: reason.to_string(),
        };
        let mut builder = Measurement::builder();
        loop {
            rest = rest.trim_start();
            if rest.starts_with("/>") || rest.starts_with('>') {
                break;
            }
            let eq = rest.find('=').ok_or_else(|| malformed("attribute without value"))?;
            let name = rest[..eq].trim();
            let after = rest[eq + 1..].trim_start();
            let after = after
                .strip_prefix('"')
                .ok_or_else(|| malformed("unquoted attribute value"))?;
            let end = after
                .find('"')
                .ok_or_else(|| malformed("unterminated attribute value"))?;
            if let Some(field) = known_field(name) {
                builder = set_field(builder, self.line, field, &after[..end])?;
            }
            rest = &after[end + 1..];
            if rest.is_empty() {
                return Err(malformed("unterminated element"));
            }
        }
        Ok(Some(builder.build()))
    }

    fn parse_delimited(&self, text: &str) -> Result<Option<Measurement>, ReadError> {
        if text == FIELDS.join(",") {
            return Ok(None);
        }
        let columns: Vec<&str> = text.split(',').collect();
        if columns.len() != FIELDS.len() {
            return Err(ReadError::Malformed {
                line: self.line,
                reason: format!("expected {} columns, found {}", FIELDS.len(), columns.len()),
            });
        }
        let mut builder = Measurement::builder();
        for (field, value) in FIELDS.iter().zip(columns) {
            if !value.is_empty() {
                builder = set_field(builder, self.line, *field, value)?;
            }
        }
        Ok(Some(builder.build()))
    }
}

pub fn read_records<R: BufRead>(input: R, encoding: Encoding) -> Result<Vec<Measurement>, ReadError> {
    let mut parser = RecordParser::new(encoding);
    let mut records = Vec::new();
    for line in input.lines() {
        if let Some(m) = parser.parse_line(&line?)? {
            records.push(m);
        }
    }
    Ok(records)
}

/// Read a result file, choosing the layout from its extension.
pub fn read_results<P: AsRef<Path>>(path: P) -> Result<Vec<Measurement>, ReadError> {
    let encoding = Encoding::from_path(path.as_ref());
    let f = File::open(path.as_ref())?;
    read_records(BufReader::new(f), encoding)
}

/// Records received from a stream, handed over in batches to whoever reports
/// on them.
#[derive(Debug, Default)]
pub struct ResultBuffer(Arc<SegQueue<Measurement>>);

impl Clone for ResultBuffer {
    fn clone(&self) -> ResultBuffer {
        ResultBuffer(self.0.clone())
    }
}

impl ResultBuffer {
    pub fn new() -> Self {
        ResultBuffer(Arc::new(SegQueue::new()))
    }

    pub fn push(&self, m: Measurement) {
        self.0.push(m);
    }

    /// Everything pushed since the previous call.
    pub fn take_intermediate(&self) -> Vec<Measurement> {
        let mut r = Vec::new();
        while let Some(m) = self.0.pop() {
            r.push(m);
        }
        r
    }
}

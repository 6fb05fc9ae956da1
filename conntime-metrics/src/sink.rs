use crate::measurement::Measurement;
use crate::timestamp::{format_instant, Timestamp};
use std::io::{self, Write};
use std::path::Path;

pub(crate) const FIELDS: [&str; 5] = [
    "start",
    "connected",
    "serverReceived",
    "firstResponse",
    "completed",
];

pub(crate) fn fields(m: &Measurement) -> [Option<Timestamp>; 5] {
    [
        m.start(),
        m.connected(),
        m.server_received(),
        m.first_response(),
        m.completed(),
    ]
}

/// Destination for result records. Records arrive one at a time, followed by
/// exactly one call to `finish`.
pub trait RecordSink {
    fn write_record(&mut self, m: &Measurement) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()>;
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn write_record(&mut self, m: &Measurement) -> io::Result<()> {
        (**self).write_record(m)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Xml,
    Delimited,
}

impl Encoding {
    /// `.csv` files are delimited, everything else is XML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Encoding {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Encoding::Delimited,
            _ => Encoding::Xml,
        }
    }

    pub fn sink<W: Write + Send + 'static>(self, out: W) -> io::Result<Box<dyn RecordSink + Send>> {
        Ok(match self {
            Encoding::Xml => Box::new(XmlSink::new(out)?),
            Encoding::Delimited => Box::new(DelimitedSink::new(out)?),
        })
    }
}

/// One empty `<result>` element per line inside a `<results>` document.
/// Absent instants are left out of the element.
pub struct XmlSink<W: Write> {
    out: W,
}

impl<W: Write> XmlSink<W> {
    pub fn new(mut out: W) -> io::Result<XmlSink<W>> {
        out.write_all(b"<?xml version=\"1.0\" ?>\n<results>\n")?;
        Ok(XmlSink { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for XmlSink<W> {
    fn write_record(&mut self, m: &Measurement) -> io::Result<()> {
        let mut line = String::from("<result");
        for (name, value) in FIELDS.iter().zip(fields(m).iter()) {
            if let Some(t) = value {
                line.push_str(&format!(" {}=\"{}\"", name, format_instant(t)));
            }
        }
        line.push_str("/>\n");
        self.out.write_all(line.as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.write_all(b"</results>\n")?;
        self.out.flush()
    }
}

/// Comma separated rows under a header line; absent instants are empty.
pub struct DelimitedSink<W: Write> {
    out: W,
}

impl<W: Write> DelimitedSink<W> {
    pub fn new(mut out: W) -> io::Result<DelimitedSink<W>> {
        writeln!(out, "{}", FIELDS.join(","))?;
        Ok(DelimitedSink { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for DelimitedSink<W> {
    fn write_record(&mut self, m: &Measurement) -> io::Result<()> {
        let row: Vec<String> = fields(m)
            .iter()
            .map(|t| t.as_ref().map(format_instant).unwrap_or_default())
            .collect();
        writeln!(self.out, "{}", row.join(","))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

//! Turning a filtered/mutated [`Payload`](crate::payload::Payload) pair
//! into an output row: CSV text, a raw binary record, or nothing at all
//! (`-q`).

use crate::payload::Payload;
use std::io::{self, Write};
use std::net::IpAddr;

/// One responder-side CSV row (§6): a request/response pair as observed by
/// the responder.
pub struct ResponderRow {
    pub key: u64,
    pub seq_num: u64,
    pub seq_len: u64,
    pub addr_req: IpAddr,
    pub port_req: u16,
    pub ttl_dep_req: u8,
    pub ttl_arr_res: u8,
    pub real_dep_req: u64,
    pub real_arr_res: u64,
    pub mono_dep_req: u64,
    pub mono_arr_res: u64,
}

/// One requester-side CSV row (§6): a request/response pair as observed by
/// the requester.
pub struct RequesterRow {
    pub key: u64,
    pub seq_num: u64,
    pub seq_len: u64,
    pub addr_res: IpAddr,
    pub ttl_dep_req: u8,
    pub ttl_arr_res: u8,
    pub ttl_dep_res: u8,
    pub ttl_arr_req: u8,
    pub real_dep_req: u64,
    pub real_arr_res: u64,
    pub real_arr_req: u64,
    pub mono_dep_req: u64,
    pub mono_arr_res: u64,
    pub mono_arr_req: u64,
}

/// Renders a hop-limit byte the way the CSV wants it: `"N/A"` when the
/// kernel never supplied one (see §8's hop-limit-extraction property),
/// otherwise the plain decimal value.
fn ttl_field(ttl: u8) -> String {
    if ttl == 0 {
        "N/A".to_string()
    } else {
        ttl.to_string()
    }
}

pub const RESPONDER_HEADER: &[&str] = &[
    "key",
    "seq_num",
    "seq_len",
    "addr_req",
    "port_req",
    "ttl_dep_req",
    "ttl_arr_res",
    "real_dep_req",
    "real_arr_res",
    "mono_dep_req",
    "mono_arr_res",
];

pub const REQUESTER_HEADER: &[&str] = &[
    "key",
    "seq_num",
    "seq_len",
    "addr_res",
    "ttl_dep_req",
    "ttl_arr_res",
    "ttl_dep_res",
    "ttl_arr_req",
    "real_dep_req",
    "real_arr_res",
    "real_arr_req",
    "mono_dep_req",
    "mono_arr_res",
    "mono_arr_req",
];

/// Destination for report rows. Implementations own their own flushing:
/// the core event loops never call `flush` directly (§1's framing that
/// flushing is a boundary responsibility).
pub trait ReportSink {
    fn write_responder_row(&mut self, row: &ResponderRow) -> io::Result<()>;
    fn write_requester_row(&mut self, row: &RequesterRow) -> io::Result<()>;
    /// The raw wire payload, used by binary-mode sinks; CSV/null sinks
    /// ignore it (they have already written their own row from the typed
    /// struct above).
    fn write_binary(&mut self, payload: &Payload) -> io::Result<()>;
}

/// Writes CSV text, with one header line up front.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
    responder: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W, responder: bool) -> Self {
        CsvSink {
            writer: csv::WriterBuilder::new().has_headers(false).from_writer(inner),
            header_written: false,
            responder,
        }
    }

    fn ensure_header(&mut self) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        let header = if self.responder { RESPONDER_HEADER } else { REQUESTER_HEADER };
        self.writer
            .write_record(header)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.header_written = true;
        Ok(())
    }
}

impl<W: Write> ReportSink for CsvSink<W> {
    fn write_responder_row(&mut self, row: &ResponderRow) -> io::Result<()> {
        self.ensure_header()?;
        self.writer
            .write_record(&[
                row.key.to_string(),
                row.seq_num.to_string(),
                row.seq_len.to_string(),
                row.addr_req.to_string(),
                row.port_req.to_string(),
                ttl_field(row.ttl_dep_req),
                ttl_field(row.ttl_arr_res),
                row.real_dep_req.to_string(),
                row.real_arr_res.to_string(),
                row.mono_dep_req.to_string(),
                row.mono_arr_res.to_string(),
            ])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.writer.flush()
    }

    fn write_requester_row(&mut self, row: &RequesterRow) -> io::Result<()> {
        self.ensure_header()?;
        self.writer
            .write_record(&[
                row.key.to_string(),
                row.seq_num.to_string(),
                row.seq_len.to_string(),
                row.addr_res.to_string(),
                ttl_field(row.ttl_dep_req),
                ttl_field(row.ttl_arr_res),
                ttl_field(row.ttl_dep_res),
                ttl_field(row.ttl_arr_req),
                row.real_dep_req.to_string(),
                row.real_arr_res.to_string(),
                row.real_arr_req.to_string(),
                row.mono_dep_req.to_string(),
                row.mono_arr_res.to_string(),
                row.mono_arr_req.to_string(),
            ])
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.writer.flush()
    }

    fn write_binary(&mut self, _payload: &Payload) -> io::Result<()> {
        unreachable!("CsvSink is never constructed in binary report mode")
    }
}

/// Writes the raw 88-byte wire encoding of each event, no separators, no
/// header.
pub struct BinarySink<W: Write> {
    writer: W,
}

impl<W: Write> BinarySink<W> {
    pub fn new(writer: W) -> Self {
        BinarySink { writer }
    }
}

impl<W: Write> ReportSink for BinarySink<W> {
    fn write_responder_row(&mut self, _row: &ResponderRow) -> io::Result<()> {
        unreachable!("BinarySink writes via write_binary, not typed rows")
    }

    fn write_requester_row(&mut self, _row: &RequesterRow) -> io::Result<()> {
        unreachable!("BinarySink writes via write_binary, not typed rows")
    }

    fn write_binary(&mut self, payload: &Payload) -> io::Result<()> {
        self.writer.write_all(&payload.encode())?;
        self.writer.flush()
    }
}

/// `-q`: drops every row.
pub struct NullSink;

impl ReportSink for NullSink {
    fn write_responder_row(&mut self, _row: &ResponderRow) -> io::Result<()> {
        Ok(())
    }
    fn write_requester_row(&mut self, _row: &RequesterRow) -> io::Result<()> {
        Ok(())
    }
    fn write_binary(&mut self, _payload: &Payload) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_responder_row() -> ResponderRow {
        ResponderRow {
            key: 7,
            seq_num: 0,
            seq_len: 1,
            addr_req: "127.0.0.1".parse().unwrap(),
            port_req: 40000,
            ttl_dep_req: 5,
            ttl_arr_res: 0,
            real_dep_req: 1,
            real_arr_res: 2,
            mono_dep_req: 3,
            mono_arr_res: 4,
        }
    }

    #[test]
    fn csv_sink_writes_header_once() {
        let mut buf = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buf, true);
            sink.write_responder_row(&sample_responder_row()).unwrap();
            sink.write_responder_row(&sample_responder_row()).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().starts_with("key,seq_num"));
    }

    #[test]
    fn missing_hop_limit_renders_as_na() {
        let mut buf = Vec::new();
        {
            let mut sink = CsvSink::new(&mut buf, true);
            sink.write_responder_row(&sample_responder_row()).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert!(text.lines().nth(1).unwrap().contains(",N/A,"));
    }

    #[test]
    fn null_sink_never_errors() {
        let mut sink = NullSink;
        assert!(sink.write_responder_row(&sample_responder_row()).is_ok());
    }
}

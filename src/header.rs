//! Header record codec.
//!
//! One header record is a single line of exactly ten comma-separated
//! fields: seven opaque metadata strings followed by `inputSize`,
//! `outputSize` and `payloadOffset`. Writers flush mid-record, so a line
//! that splits into any other number of fields is the canonical signal of
//! a torn trailing record and must not be consumed.

use anyhow::{bail, Context, Result};

/// A complete header record has exactly this many comma-separated fields.
pub const HEADER_FIELD_COUNT: usize = 10;

/// Number of leading opaque metadata fields.
pub const META_FIELD_COUNT: usize = 7;

/// One fully parsed header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    /// The seven opaque metadata fields, unused by the tailer itself.
    pub meta: Vec<String>,
    /// Payload input length in bytes.
    pub input_size: u64,
    /// Payload output length in bytes.
    pub output_size: u64,
    /// Byte offset of this entry in the payload file.
    pub payload_offset: u64,
}

impl HeaderRecord {
    /// End of this record's payload region: `payload_offset + input_size + output_size`.
    pub fn payload_end(&self) -> Result<u64> {
        self.payload_offset
            .checked_add(self.input_size)
            .and_then(|end| end.checked_add(self.output_size))
            .context("header sizes overflow the payload offset range")
    }
}

/// Outcome of parsing one header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    /// Ten fields with valid sizes: safe to consume.
    Complete(HeaderRecord),
    /// Not ten fields: the writer is mid-append, retry later.
    Incomplete,
}

/// Parse one header line (without its terminating newline).
///
/// Empty fields between adjacent commas are valid fields and preserved.
/// A field count other than [`HEADER_FIELD_COUNT`] means a torn record
/// ([`ParsedLine::Incomplete`]); ten fields whose trailing size/offset
/// fields do not parse as non-negative integers mean data corruption and
/// yield an error.
pub fn parse_line(line: &str) -> Result<ParsedLine> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != HEADER_FIELD_COUNT {
        return Ok(ParsedLine::Incomplete);
    }

    let input_size = parse_size(fields[7], "input size")?;
    let output_size = parse_size(fields[8], "output size")?;
    let payload_offset = parse_size(fields[9], "payload offset")?;

    let meta = fields[..META_FIELD_COUNT]
        .iter()
        .map(|field| field.to_string())
        .collect();

    Ok(ParsedLine::Complete(HeaderRecord {
        meta,
        input_size,
        output_size,
        payload_offset,
    }))
}

fn parse_size(field: &str, what: &str) -> Result<u64> {
    match field.parse::<u64>() {
        Ok(value) => Ok(value),
        Err(_) => bail!("corrupt header record: {what} field {field:?} is not a non-negative integer"),
    }
}

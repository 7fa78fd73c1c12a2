use pmu_data::{DataSource, SampleRecord};

use crate::Error;

/// `PERF_RECORD_LOST`
pub(crate) const RECORD_LOST: u32 = 2;
/// `PERF_RECORD_SAMPLE`
pub(crate) const RECORD_SAMPLE: u32 = 9;

const HEADER_SIZE: usize = 8;

// Sample payload for IP | ADDR | WEIGHT | DATA_SRC, in kernel order.
const SAMPLE_IP: usize = HEADER_SIZE;
const SAMPLE_ADDR: usize = SAMPLE_IP + 8;
const SAMPLE_WEIGHT: usize = SAMPLE_ADDR + 8;
const SAMPLE_DATA_SRC: usize = SAMPLE_WEIGHT + 8;
const SAMPLE_SIZE: usize = SAMPLE_DATA_SRC + 8;

// PERF_RECORD_LOST: { u64 id; u64 lost; }
const LOST_COUNT: usize = HEADER_SIZE + 8;

/// `struct perf_event_header`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub type_: u32,
    pub misc: u16,
    /// Record size in bytes, header included
    pub size: u16,
}

/// Bounds-checked walk over a contiguous run of kernel records.
pub struct RecordCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSamples {
    /// Samples in capture order
    pub samples: Vec<SampleRecord>,
    /// Samples the kernel reported as dropped
    pub lost: u64,
    /// Non-sample records stepped over
    pub skipped: usize,
}

impl<'a> RecordCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        RecordCursor { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.data.len()
    }

    pub fn read_header(&self) -> Result<RecordHeader, Error> {
        let bytes = self
            .data
            .get(self.offset..self.offset + HEADER_SIZE)
            .ok_or_else(|| self.malformed("truncated record header"))?;

        let header = RecordHeader {
            type_: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_ne_bytes([bytes[4], bytes[5]]),
            size: u16::from_ne_bytes([bytes[6], bytes[7]]),
        };

        let size = header.size as usize;
        if size < HEADER_SIZE {
            return Err(self.malformed("record smaller than its header"));
        }
        if self.offset + size > self.data.len() {
            return Err(self.malformed("record extends past head"));
        }

        Ok(header)
    }

    /// Reads a native-endian u64 at `field` bytes from the start of the
    /// current record, which must lie within the record.
    pub fn read_u64(&self, header: &RecordHeader, field: usize) -> Result<u64, Error> {
        if field + 8 > header.size as usize {
            return Err(self.malformed("field outside of record"));
        }

        let start = self.offset + field;
        self.data
            .get(start..start + 8)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_ne_bytes)
            .ok_or_else(|| self.malformed("field outside of buffer"))
    }

    pub fn advance(&mut self, header: &RecordHeader) {
        self.offset += header.size as usize;
    }

    fn malformed(&self, reason: &'static str) -> Error {
        Error::MalformedRecord {
            offset: self.offset,
            reason,
        }
    }
}

/// Decodes every record in `data`, which must end exactly on a record
/// boundary.
pub fn decode_records(data: &[u8]) -> Result<DecodedSamples, Error> {
    let mut cursor = RecordCursor::new(data);
    let mut decoded = DecodedSamples::default();

    while !cursor.is_exhausted() {
        let header = cursor.read_header()?;

        match header.type_ {
            RECORD_SAMPLE => {
                if (header.size as usize) < SAMPLE_SIZE {
                    return Err(cursor.malformed("sample shorter than configured fields"));
                }

                decoded.samples.push(SampleRecord {
                    ip: cursor.read_u64(&header, SAMPLE_IP)?,
                    addr: cursor.read_u64(&header, SAMPLE_ADDR)?,
                    weight: cursor.read_u64(&header, SAMPLE_WEIGHT)?,
                    data_source: DataSource::from_raw(cursor.read_u64(&header, SAMPLE_DATA_SRC)?),
                });
            }
            RECORD_LOST => {
                decoded.lost += cursor.read_u64(&header, LOST_COUNT)?;
                decoded.skipped += 1;
            }
            _ => decoded.skipped += 1,
        }

        cursor.advance(&header);
    }

    Ok(decoded)
}

/// Decodes the data area of a ring buffer given the `head` snapshot.
///
/// The reader never advances `data_tail`, so the kernel stops writing once
/// the next sample no longer fits and drops the rest without a trace. A head
/// within one sample of the end therefore means the capture overflowed, and
/// nothing is decoded.
pub fn decode_ring(data: &[u8], head: u64) -> Result<DecodedSamples, Error> {
    let capacity = data.len() as u64;
    if head + SAMPLE_SIZE as u64 > capacity {
        return Err(Error::CaptureOverflow { head, capacity });
    }

    decode_records(&data[..head as usize])
}

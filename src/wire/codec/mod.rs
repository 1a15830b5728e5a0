use std::fmt;
use std::io::{self, Read};

use crate::model::{parse_birth_date, Batch, Bet, BetError, BIRTH_DATE_LEN_BYTES};

/// Agency side of the protocol, used to drive the server from tests.
#[cfg(test)]
pub(crate) mod agency;

pub const FRAME_HEADER_SIZE_BYTES: usize = 2;
pub const BATCH_HEADER_SIZE_BYTES: usize = 4 + 1 + 2;
pub const ACK_SIZE_BYTES: usize = 4;
pub const WINNERS_HEADER_SIZE_BYTES: usize = 2;
pub const DOCUMENT_SIZE_BYTES: usize = 4;
pub const MAX_RECORDS_PER_MESSAGE: usize = u16::MAX as usize;

const FINAL_FLAG_MORE: u8 = 0;
const FINAL_FLAG_LAST: u8 = 1;

#[derive(Debug)]
pub enum CodecError {
    ConnectionClosed { expected: usize, received: usize },
    Io(io::Error),
    ZeroLengthFrame,
    #[cfg(test)]
    FrameTooLarge { size: usize, limit: usize },
    TooManyRecords { count: usize, limit: usize },
    Truncated { field: &'static str, offset: usize },
    TrailingData { remaining: usize },
    InvalidFinalFlag { value: u8 },
    InvalidUtf8 { field: &'static str },
    InvalidBet(BetError),
    #[cfg(test)]
    AckLengthMismatch { size: usize },
}

impl CodecError {
    /// Peer went away or the socket failed, as opposed to a malformed frame.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::Io(_))
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionClosed { expected, received } => write!(
                f,
                "connection closed by peer after {received} of {expected} expected bytes"
            ),
            Self::Io(source) => write!(f, "socket io error: {source}"),
            Self::ZeroLengthFrame => write!(f, "protocol error: frame length cannot be zero"),
            #[cfg(test)]
            Self::FrameTooLarge { size, limit } => write!(
                f,
                "protocol error: frame body of {size} bytes exceeds max {limit}"
            ),
            Self::TooManyRecords { count, limit } => write!(
                f,
                "protocol error: {count} records exceed the per-message limit of {limit}"
            ),
            Self::Truncated { field, offset } => write!(
                f,
                "protocol error: frame truncated while reading {field} at offset {offset}"
            ),
            Self::TrailingData { remaining } => write!(
                f,
                "protocol error: {remaining} trailing bytes after the last record"
            ),
            Self::InvalidFinalFlag { value } => write!(
                f,
                "protocol error: final flag must be 0 or 1, got {value}"
            ),
            Self::InvalidUtf8 { field } => write!(f, "protocol error: {field} is not valid UTF-8"),
            Self::InvalidBet(source) => write!(f, "protocol error: invalid bet: {source}"),
            #[cfg(test)]
            Self::AckLengthMismatch { size } => write!(
                f,
                "protocol error: ack must be {ACK_SIZE_BYTES} bytes, got {size}"
            ),
        }
    }
}

impl std::error::Error for CodecError {}

impl From<BetError> for CodecError {
    fn from(value: BetError) -> Self {
        Self::InvalidBet(value)
    }
}

/// Fills `buffer` completely or fails with `ConnectionClosed`; a short read
/// is never returned as success.
pub fn read_exact_or_closed<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<(), CodecError> {
    let mut received = 0;
    while received < buffer.len() {
        match reader.read(&mut buffer[received..]) {
            Ok(0) => {
                return Err(CodecError::ConnectionClosed {
                    expected: buffer.len(),
                    received,
                })
            }
            Ok(size) => received += size,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(CodecError::Io(error)),
        }
    }
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
    read_exact_or_closed(reader, &mut header)?;

    let declared_len = u16::from_be_bytes(header) as usize;
    if declared_len == 0 {
        return Err(CodecError::ZeroLengthFrame);
    }

    let mut body = vec![0_u8; declared_len];
    read_exact_or_closed(reader, &mut body)?;
    Ok(body)
}

pub fn decode_batch(body: &[u8]) -> Result<Batch, CodecError> {
    let mut cursor = ByteCursor::new(body);

    let agency_id = cursor.read_u32("agency id")?;
    let is_final = match cursor.read_u8("final flag")? {
        FINAL_FLAG_MORE => false,
        FINAL_FLAG_LAST => true,
        value => return Err(CodecError::InvalidFinalFlag { value }),
    };
    let record_count = cursor.read_u16("record count")? as usize;

    let mut bets = Vec::with_capacity(record_count);
    for _ in 0..record_count {
        bets.push(decode_bet(&mut cursor, agency_id)?);
    }

    if cursor.remaining() > 0 {
        return Err(CodecError::TrailingData {
            remaining: cursor.remaining(),
        });
    }

    Ok(Batch::new(agency_id, bets, is_final))
}

/// Record count announced by a batch body, readable even when the records
/// themselves turn out to be malformed.
pub fn peek_record_count(body: &[u8]) -> Option<u16> {
    body.get(5..BATCH_HEADER_SIZE_BYTES)
        .map(|raw| u16::from_be_bytes([raw[0], raw[1]]))
}

fn decode_bet(cursor: &mut ByteCursor<'_>, agency_id: u32) -> Result<Bet, CodecError> {
    let first_name = cursor.read_short_string("first name")?;
    let last_name = cursor.read_short_string("last name")?;
    let document = cursor.read_u32("document")?;
    let raw_birth = cursor.take(BIRTH_DATE_LEN_BYTES, "birth date")?;
    let raw_birth = std::str::from_utf8(raw_birth)
        .map_err(|_| CodecError::InvalidUtf8 { field: "birth date" })?;
    let birth_date = parse_birth_date(raw_birth)?;
    let number = cursor.read_u32("number")?;

    Ok(Bet::new(
        agency_id, first_name, last_name, document, birth_date, number,
    )?)
}

pub fn encode_ack(last_stored: Option<&Bet>) -> [u8; ACK_SIZE_BYTES] {
    last_stored.map_or(0, Bet::number).to_be_bytes()
}

pub fn encode_winners(documents: &[u32]) -> Result<Vec<u8>, CodecError> {
    if documents.len() > MAX_RECORDS_PER_MESSAGE {
        return Err(CodecError::TooManyRecords {
            count: documents.len(),
            limit: MAX_RECORDS_PER_MESSAGE,
        });
    }

    let mut message =
        Vec::with_capacity(WINNERS_HEADER_SIZE_BYTES + documents.len() * DOCUMENT_SIZE_BYTES);
    message.extend_from_slice(&(documents.len() as u16).to_be_bytes());
    for document in documents {
        message.extend_from_slice(&document.to_be_bytes());
    }
    Ok(message)
}

struct ByteCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::Truncated {
                field,
                offset: self.offset,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(1, field)?[0])
    }

    fn read_u16(&mut self, field: &'static str) -> Result<u16, CodecError> {
        let raw = self.take(2, field)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    fn read_u32(&mut self, field: &'static str) -> Result<u32, CodecError> {
        let raw = self.take(4, field)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_short_string(&mut self, field: &'static str) -> Result<String, CodecError> {
        let len = self.read_u8(field)? as usize;
        let raw = self.take(len, field)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { field })
    }
}

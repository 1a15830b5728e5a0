use std::io::Read;

use crate::model::{Batch, BIRTH_DATE_FORMAT};

use super::{
    read_exact_or_closed, ByteCursor, CodecError, ACK_SIZE_BYTES, BATCH_HEADER_SIZE_BYTES,
    DOCUMENT_SIZE_BYTES, FINAL_FLAG_LAST, FINAL_FLAG_MORE, FRAME_HEADER_SIZE_BYTES,
    MAX_RECORDS_PER_MESSAGE, WINNERS_HEADER_SIZE_BYTES,
};

pub const MAX_FRAME_BODY_BYTES: usize = u16::MAX as usize;

/// Encodes a full frame, length prefix included.
pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, CodecError> {
    if batch.bets.len() > MAX_RECORDS_PER_MESSAGE {
        return Err(CodecError::TooManyRecords {
            count: batch.bets.len(),
            limit: MAX_RECORDS_PER_MESSAGE,
        });
    }

    let mut body = Vec::with_capacity(BATCH_HEADER_SIZE_BYTES + batch.bets.len() * 48);
    body.extend_from_slice(&batch.agency_id.to_be_bytes());
    body.push(if batch.is_final {
        FINAL_FLAG_LAST
    } else {
        FINAL_FLAG_MORE
    });
    body.extend_from_slice(&(batch.bets.len() as u16).to_be_bytes());

    for bet in &batch.bets {
        encode_short_string(&mut body, bet.first_name());
        encode_short_string(&mut body, bet.last_name());
        body.extend_from_slice(&bet.document().to_be_bytes());
        body.extend_from_slice(bet.birth_date().format(BIRTH_DATE_FORMAT).to_string().as_bytes());
        body.extend_from_slice(&bet.number().to_be_bytes());
    }

    if body.len() > MAX_FRAME_BODY_BYTES {
        return Err(CodecError::FrameTooLarge {
            size: body.len(),
            limit: MAX_FRAME_BODY_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn encode_short_string(buffer: &mut Vec<u8>, value: &str) {
    // Bet construction caps names at 255 bytes.
    buffer.push(value.len() as u8);
    buffer.extend_from_slice(value.as_bytes());
}

/// `None` means the server rejected the batch or stopped.
pub fn decode_ack(ack: &[u8]) -> Result<Option<u32>, CodecError> {
    let bytes: [u8; ACK_SIZE_BYTES] = ack
        .try_into()
        .map_err(|_| CodecError::AckLengthMismatch { size: ack.len() })?;
    let number = u32::from_be_bytes(bytes);
    Ok((number != 0).then_some(number))
}

pub fn decode_winners(message: &[u8]) -> Result<Vec<u32>, CodecError> {
    let mut cursor = ByteCursor::new(message);
    let count = cursor.read_u16("winner count")? as usize;

    let mut documents = Vec::with_capacity(count);
    for _ in 0..count {
        documents.push(cursor.read_u32("winner document")?);
    }

    if cursor.remaining() > 0 {
        return Err(CodecError::TrailingData {
            remaining: cursor.remaining(),
        });
    }
    Ok(documents)
}

pub fn read_winners<R: Read>(reader: &mut R) -> Result<Vec<u32>, CodecError> {
    let mut header = [0_u8; WINNERS_HEADER_SIZE_BYTES];
    read_exact_or_closed(reader, &mut header)?;
    let count = u16::from_be_bytes(header) as usize;

    let mut message = vec![0_u8; WINNERS_HEADER_SIZE_BYTES + count * DOCUMENT_SIZE_BYTES];
    message[..WINNERS_HEADER_SIZE_BYTES].copy_from_slice(&header);
    read_exact_or_closed(reader, &mut message[WINNERS_HEADER_SIZE_BYTES..])?;
    decode_winners(&message)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::model::{Batch, Bet, MAX_NAME_LEN_BYTES};
    use crate::wire::codec::{decode_batch, read_frame, FRAME_HEADER_SIZE_BYTES};

    use super::{encode_batch, CodecError, MAX_FRAME_BODY_BYTES};

    fn bet_named(first_name: &str, last_name: &str, document: u32, number: u32) -> Bet {
        Bet::new(
            5,
            first_name,
            last_name,
            document,
            NaiveDate::from_ymd_opt(1978, 2, 28).expect("valid date"),
            number,
        )
        .expect("valid bet")
    }

    fn decoded(batch: &Batch) -> Batch {
        let frame = encode_batch(batch).expect("batch should encode");
        let body = read_frame(&mut frame.as_slice()).expect("frame should read");
        assert_eq!(body.len(), frame.len() - FRAME_HEADER_SIZE_BYTES);
        decode_batch(&body).expect("batch should decode")
    }

    #[test]
    fn name_edge_cases_decode_unchanged() {
        let longest = "x".repeat(MAX_NAME_LEN_BYTES);
        // 127 two-byte characters plus one ASCII byte: 255 bytes exactly.
        let multibyte_longest = format!("{}a", "ñ".repeat(127));
        assert_eq!(multibyte_longest.len(), MAX_NAME_LEN_BYTES);

        let batch = Batch::new(
            5,
            vec![
                bet_named("", "", 1, 1),
                bet_named(&longest, &longest, 2, 2),
                bet_named("José María", "Núñez 山田", 3, 3),
                bet_named(&multibyte_longest, "Ñandú", 4, 4),
            ],
            true,
        );

        assert_eq!(decoded(&batch), batch);
    }

    #[test]
    fn numeric_extremes_decode_unchanged() {
        let batch = Batch::new(
            5,
            vec![
                bet_named("Max", "Values", u32::MAX, u32::MAX),
                bet_named("Min", "Values", 0, 1),
            ],
            false,
        );

        let roundtrip = decoded(&batch);
        assert_eq!(roundtrip, batch);
        assert_eq!(roundtrip.bets[0].document(), u32::MAX);
        assert_eq!(roundtrip.bets[0].number(), u32::MAX);
    }

    #[test]
    fn batch_filling_the_body_limit_decodes_and_one_more_record_overflows() {
        let longest = "z".repeat(MAX_NAME_LEN_BYTES);
        let record_len = 1 + MAX_NAME_LEN_BYTES + 1 + MAX_NAME_LEN_BYTES + 4 + 10 + 4;
        let fitting = (MAX_FRAME_BODY_BYTES - 7) / record_len;

        let bets: Vec<Bet> = (0..fitting as u32)
            .map(|index| bet_named(&longest, &longest, index, index + 1))
            .collect();
        let batch = Batch::new(5, bets, true);
        let frame = encode_batch(&batch).expect("batch at the limit should encode");
        assert!(frame.len() - FRAME_HEADER_SIZE_BYTES > MAX_FRAME_BODY_BYTES - record_len);
        assert_eq!(decoded(&batch), batch);

        let mut bets = batch.bets;
        bets.push(bet_named(&longest, &longest, 9_999, 9_999));
        let error = encode_batch(&Batch::new(5, bets, true)).expect_err("overflow should fail");
        assert!(matches!(
            error,
            CodecError::FrameTooLarge {
                limit: MAX_FRAME_BODY_BYTES,
                ..
            }
        ));
    }
}

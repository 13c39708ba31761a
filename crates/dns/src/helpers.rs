use anyhow::ensure;

use crate::{message::HEADER_LEN, reader::DnsMessageReader};

/// OPT pseudo-records reuse the TTL field for EDNS flags.
const OPT_TYPE: u16 = 41;

/// Transaction ID of a raw message.
pub fn extract_transaction_id(data: &[u8]) -> Option<u16> {
    if data.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([data[0], data[1]]))
}

/// Whether the TC bit is set. `None` if the header is incomplete.
pub fn is_truncated(data: &[u8]) -> Option<bool> {
    if data.len() < HEADER_LEN {
        return None;
    }
    Some(data[2] & 0x02 != 0)
}

/// Whether the QR bit marks this as a response.
pub fn is_response(data: &[u8]) -> Option<bool> {
    if data.len() < HEADER_LEN {
        return None;
    }
    Some(data[2] & 0x80 != 0)
}

/// Overwrite the transaction ID in place.
pub fn set_transaction_id(data: &mut [u8], id: u16) {
    if data.len() >= 2 {
        data[..2].copy_from_slice(&id.to_be_bytes());
    }
}

/// Lower every record TTL above `max_ttl` to `max_ttl`, in place.
///
/// Only the TTL fields are touched, so compression and record data the codec
/// does not model survive unchanged.
pub fn cap_ttls(data: &mut [u8], max_ttl: u32) -> anyhow::Result<()> {
    ensure!(data.len() >= HEADER_LEN, "message shorter than header");

    let count = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]) as usize;
    let questions = count(4);
    let records = count(6) + count(8) + count(10);

    let mut ttl_offsets = Vec::with_capacity(records);
    {
        let mut reader = DnsMessageReader::new(data);
        reader.seek(HEADER_LEN)?;

        for _ in 0..questions {
            reader.read_qname()?;
            reader.read_bytes(4)?;
        }

        for _ in 0..records {
            reader.read_qname()?;
            let record_type = reader.read_u16()?;
            reader.read_u16()?;
            if record_type != OPT_TYPE {
                ttl_offsets.push(reader.position());
            }
            reader.read_u32()?;
            let rdlength = reader.read_u16()? as usize;
            reader.read_bytes(rdlength)?;
        }
    }

    for at in ttl_offsets {
        let ttl = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        if ttl > max_ttl {
            data[at..at + 4].copy_from_slice(&max_ttl.to_be_bytes());
        }
    }

    Ok(())
}

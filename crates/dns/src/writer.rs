use anyhow::ensure;
use bytes::{BufMut, Bytes, BytesMut};

use crate::{MAX_MESSAGE_SIZE, MIN_UDP_PAYLOAD, domain_name::DomainName};

/// Bounded writer for DNS messages. Names are written uncompressed.
pub struct DnsMessageWriter {
    buf: BytesMut,
    max_len: usize,
}

impl Default for DnsMessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsMessageWriter {
    pub fn new_with_max(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(max_len.min(MIN_UDP_PAYLOAD)),
            max_len,
        }
    }

    /// Writer bounded by the TCP message limit.
    pub fn new() -> Self {
        Self::new_with_max(MAX_MESSAGE_SIZE)
    }

    #[inline]
    fn ensure_space(&mut self, need: usize, what: &str) -> anyhow::Result<()> {
        let cur = self.buf.len();
        let new_len = cur
            .checked_add(need)
            .ok_or_else(|| anyhow::anyhow!("length overflow"))?;
        ensure!(
            new_len <= self.max_len,
            "buffer overflow while writing {}: need={} current_len={} max_len={}",
            what,
            need,
            cur,
            self.max_len
        );
        self.buf.reserve(need);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> anyhow::Result<()> {
        self.ensure_space(1, "u8")?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> anyhow::Result<()> {
        self.ensure_space(2, "u16")?;
        self.buf.put_u16(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> anyhow::Result<()> {
        self.ensure_space(4, "u32")?;
        self.buf.put_u32(value);
        Ok(())
    }

    pub fn write_qname(&mut self, qname: &DomainName) -> anyhow::Result<()> {
        if qname.is_root() {
            return self.write_u8(0);
        }

        // DomainName already enforces label and total length limits.
        let total = qname.len() + 2;
        self.ensure_space(total, "qname")?;
        for label in qname.labels() {
            self.buf.put_u8(label.len() as u8);
            self.buf.extend_from_slice(label.as_bytes());
        }
        self.buf.put_u8(0);
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> anyhow::Result<()> {
        self.ensure_space(data.len(), "raw bytes")?;
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Overwrite previously written bytes, used to patch RDLENGTH.
    pub fn overwrite_bytes(&mut self, pos: usize, data: &[u8]) -> anyhow::Result<()> {
        let end = pos
            .checked_add(data.len())
            .ok_or_else(|| anyhow::anyhow!("length overflow"))?;
        ensure!(end <= self.buf.len(), "overwrite out of bounds: end={} len={}", end, self.buf.len());
        self.buf[pos..end].copy_from_slice(data);
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Types that can be serialized straight into a message.
pub trait DnsWritable {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::DnsMessageReader;

    #[test]
    fn test_writer_reader() {
        let qname = DomainName::from_ascii("example.com").unwrap();

        let mut writer = DnsMessageWriter::new();
        writer.write_u8(42).unwrap();
        writer.write_u16(12345).unwrap();
        writer.write_u32(67890).unwrap();
        writer.write_qname(&qname).unwrap();
        let bytes = writer.into_bytes();

        let mut reader = DnsMessageReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 42);
        assert_eq!(reader.read_u16().unwrap(), 12345);
        assert_eq!(reader.read_u32().unwrap(), 67890);
        assert_eq!(reader.read_qname().unwrap(), qname);
    }

    #[test]
    fn test_max_len_enforced() {
        let mut writer = DnsMessageWriter::new_with_max(3);
        writer.write_u16(1).unwrap();
        assert!(writer.write_u16(2).is_err());
        writer.write_u8(3).unwrap();
        assert_eq!(writer.position(), 3);
    }

    #[test]
    fn test_overwrite_bytes() {
        let mut writer = DnsMessageWriter::new();
        writer.write_u16(0).unwrap();
        writer.overwrite_bytes(0, &[0xAB, 0xCD]).unwrap();
        assert!(writer.overwrite_bytes(1, &[0, 0]).is_err());
        assert_eq!(&writer.into_bytes()[..], &[0xAB, 0xCD]);
    }
}

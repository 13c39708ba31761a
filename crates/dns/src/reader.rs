use anyhow::{bail, ensure};

use crate::domain_name::DomainName;

/// Maximum compression pointers followed while reading one name.
const MAX_POINTER_HOPS: usize = 64;

/// Maximum wire length of a name, including length octets and the root label.
const MAX_WIRE_NAME_LEN: usize = 255;

/// Cursor over a DNS message buffer.
pub struct DnsMessageReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> DnsMessageReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Move to an absolute position inside the buffer.
    pub fn seek(&mut self, pos: usize) -> anyhow::Result<()> {
        let len = self.buffer.len();
        ensure!(pos <= len, "seek out of bounds: pos={} len={}", pos, len);
        self.position = pos;
        Ok(())
    }

    #[inline]
    fn need(&self, need: usize, what: &str) -> anyhow::Result<()> {
        let rem = self.remaining();
        ensure!(
            need <= rem,
            "buffer underflow at pos {} while reading {}: need {} bytes, have {}",
            self.position,
            what,
            need,
            rem
        );
        Ok(())
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        self.need(1, "u8")?;
        let byte = self.buffer[self.position];
        self.position += 1;
        Ok(byte)
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        self.need(2, "u16")?;
        let b = &self.buffer[self.position..self.position + 2];
        self.position += 2;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        self.need(4, "u32")?;
        let b = &self.buffer[self.position..self.position + 4];
        self.position += 4;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a possibly compressed domain name.
    ///
    /// Rejects pointer loops, forward jumps past the buffer and names whose
    /// expanded wire form exceeds 255 octets. Labels must be printable ASCII
    /// without `.`, so every accepted name has exactly one wire form.
    pub fn read_qname(&mut self) -> anyhow::Result<DomainName> {
        let mut pos = self.position;
        let mut jumped = false;
        let mut hops = 0usize;
        let mut wire_len = 0usize;
        let mut name = String::new();

        loop {
            if pos >= self.buffer.len() {
                bail!("qname out of bounds at pos {} (buf len {})", pos, self.buffer.len());
            }

            let length = self.buffer[pos];

            match length & 0xC0 {
                0xC0 => {
                    ensure!(pos + 2 <= self.buffer.len(), "truncated compression pointer at pos {}", pos);

                    hops += 1;
                    ensure!(hops <= MAX_POINTER_HOPS, "qname compression pointer loop at pos {}", pos);

                    let offset = (((length as usize) & 0x3F) << 8) | self.buffer[pos + 1] as usize;
                    ensure!(
                        offset < pos,
                        "compression pointer at {} does not point backwards (offset {})",
                        pos,
                        offset
                    );

                    if !jumped {
                        self.position = pos + 2;
                    }
                    pos = offset;
                    jumped = true;
                }
                0x00 if length == 0 => {
                    wire_len += 1;
                    ensure!(wire_len <= MAX_WIRE_NAME_LEN, "qname exceeds {} octets", MAX_WIRE_NAME_LEN);
                    if !jumped {
                        self.position = pos + 1;
                    }
                    break;
                }
                0x00 => {
                    let label_len = length as usize;
                    pos += 1;

                    ensure!(
                        pos + label_len <= self.buffer.len(),
                        "label overruns buffer at pos {}: need {} bytes, have {}",
                        pos,
                        label_len,
                        self.buffer.len().saturating_sub(pos)
                    );

                    wire_len += 1 + label_len;
                    ensure!(wire_len <= MAX_WIRE_NAME_LEN, "qname exceeds {} octets", MAX_WIRE_NAME_LEN);

                    let label = &self.buffer[pos..pos + label_len];
                    ensure!(
                        label.iter().all(|b| b.is_ascii_graphic() && *b != b'.'),
                        "label at pos {} is not a printable ASCII label",
                        pos
                    );
                    // Checked above: the bytes are ASCII.
                    name.extend(label.iter().map(|b| *b as char));
                    name.push('.');
                    pos += label_len;

                    if !jumped {
                        self.position = pos;
                    }
                }
                other => bail!("unsupported label type 0x{:02x} at pos {}", other, pos),
            }
        }

        if name.is_empty() {
            return Ok(DomainName::root());
        }

        name.pop();
        DomainName::from_ascii(name)
    }

    pub fn read_bytes(&mut self, length: usize) -> anyhow::Result<&'a [u8]> {
        self.need(length, "raw bytes")?;
        let data = &self.buffer[self.position..self.position + length];
        self.position += length;
        Ok(data)
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of unread bytes.
    ///
    /// ```
    /// use hush_dns::reader::DnsMessageReader;
    /// let buf = [0u8, 1, 2];
    /// let mut r = DnsMessageReader::new(&buf);
    /// assert_eq!(r.remaining(), 3);
    /// r.seek(1).unwrap();
    /// assert_eq!(r.remaining(), 2);
    /// ```
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// Types that can be parsed straight from a message.
pub trait DnsReadable: Sized {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self>;
}

use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::ensure;
use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{
    MAX_MESSAGE_SIZE,
    domain_name::DomainName,
    reader::{DnsMessageReader, DnsReadable},
    u16_wire_enum,
    writer::{DnsMessageWriter, DnsWritable},
};

/// Fixed header length.
pub const HEADER_LEN: usize = 12;

/// A decoded DNS message.
#[derive(Debug, Clone, PartialEq)]
pub struct DnsMessage {
    /// Transaction id
    pub id: u16,
    pub flags: DnsFlags,
    questions: Vec<DnsQuestion>,
    answers: Vec<DnsRecord>,
    authority_records: Vec<DnsRecord>,
    /// Additional records, including any OPT pseudo-record.
    additional_records: Vec<DnsRecord>,
}

impl DnsMessage {
    pub fn new(
        id: u16,
        flags: DnsFlags,
        questions: Vec<DnsQuestion>,
        answers: Vec<DnsRecord>,
        authority_records: Vec<DnsRecord>,
        additional_records: Vec<DnsRecord>,
    ) -> Self {
        Self {
            id,
            flags,
            questions,
            answers,
            authority_records,
            additional_records,
        }
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        ensure!(data.len() >= HEADER_LEN, "message shorter than header: {} bytes", data.len());
        ensure!(data.len() <= MAX_MESSAGE_SIZE, "message too large: {} bytes", data.len());

        let mut reader = DnsMessageReader::new(data);

        let id = reader.read_u16()?;
        let flags = DnsFlags::read_from(&mut reader)?;

        let qdcount = reader.read_u16()? as usize;
        let ancount = reader.read_u16()? as usize;
        let nscount = reader.read_u16()? as usize;
        let arcount = reader.read_u16()? as usize;

        let questions = read_section::<DnsQuestion>(&mut reader, qdcount)?;
        let answers = read_section::<DnsRecord>(&mut reader, ancount)?;
        let authority_records = read_section::<DnsRecord>(&mut reader, nscount)?;
        let additional_records = read_section::<DnsRecord>(&mut reader, arcount)?;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authority_records,
            additional_records,
        })
    }

    pub fn encode(&self) -> anyhow::Result<Bytes> {
        self.encode_with_max(MAX_MESSAGE_SIZE)
    }

    /// Encode, failing if the message does not fit in `max_len` bytes.
    pub fn encode_with_max(&self, max_len: usize) -> anyhow::Result<Bytes> {
        let mut writer = DnsMessageWriter::new_with_max(max_len);

        writer.write_u16(self.id)?;
        self.flags.write_to(&mut writer)?;

        writer.write_u16(section_len(&self.questions)?)?;
        writer.write_u16(section_len(&self.answers)?)?;
        writer.write_u16(section_len(&self.authority_records)?)?;
        writer.write_u16(section_len(&self.additional_records)?)?;

        for question in &self.questions {
            question.write_to(&mut writer)?;
        }

        for record in self
            .answers
            .iter()
            .chain(&self.authority_records)
            .chain(&self.additional_records)
        {
            record.write_to(&mut writer)?;
        }

        Ok(writer.into_bytes())
    }

    pub fn questions(&self) -> &[DnsQuestion] {
        &self.questions
    }

    /// The first (and in practice only) question.
    pub fn question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    pub fn answers(&self) -> &[DnsRecord] {
        &self.answers
    }

    pub fn authority_records(&self) -> &[DnsRecord] {
        &self.authority_records
    }

    pub fn additional_records(&self) -> &[DnsRecord] {
        &self.additional_records
    }

    /// UDP payload size advertised through an OPT record, if any.
    pub fn edns_udp_payload_size(&self) -> Option<u16> {
        self.additional_records
            .iter()
            .find(|r| r.record_type == RecordType::OPT)
            .map(|r| r.class.to_u16())
    }

    pub fn set_response_code(&mut self, response_code: DnsResponseCode) {
        self.flags.rcode_low = (response_code.to_u16() & 0x0F) as u8;
    }

    /// Response code from the header (extended rcodes are not combined in).
    pub fn response_code(&self) -> DnsResponseCode {
        DnsResponseCode::from(self.flags.rcode_low as u16)
    }
}

fn read_section<T: DnsReadable>(reader: &mut DnsMessageReader, count: usize) -> anyhow::Result<Vec<T>> {
    // counts come off the wire, so don't trust them for preallocation.
    let mut items = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        items.push(T::read_from(reader)?);
    }
    Ok(items)
}

fn section_len<T>(items: &[T]) -> anyhow::Result<u16> {
    u16::try_from(items.len()).map_err(|_| anyhow::anyhow!("section has too many entries: {}", items.len()))
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DnsFlags {
    /// Query (false) or response (true)
    pub response: bool,
    pub opcode: DnsOpcode,
    pub authoritative_answer: bool,
    /// Message was truncated to fit the transport
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    /// Reserved, must be zero
    pub(crate) z: bool,
    pub authentic_data: bool,
    pub checking_disabled: bool,
    pub(crate) rcode_low: u8,
}

impl DnsFlags {
    /// Flags for a response to `query`, mirroring RD and CD.
    pub fn response_to(query: &DnsFlags) -> Self {
        Self {
            response: true,
            opcode: query.opcode,
            recursion_desired: query.recursion_desired,
            recursion_available: true,
            checking_disabled: query.checking_disabled,
            ..Default::default()
        }
    }
}

impl From<u16> for DnsFlags {
    fn from(bits: u16) -> Self {
        Self {
            response: (bits >> 15) & 0x1 != 0,
            opcode: DnsOpcode::from(((bits >> 11) & 0xF) as u8),
            authoritative_answer: (bits >> 10) & 0x1 != 0,
            truncated: (bits >> 9) & 0x1 != 0,
            recursion_desired: (bits >> 8) & 0x1 != 0,
            recursion_available: (bits >> 7) & 0x1 != 0,
            z: (bits >> 6) & 0x1 != 0,
            authentic_data: (bits >> 5) & 0x1 != 0,
            checking_disabled: (bits >> 4) & 0x1 != 0,
            rcode_low: (bits & 0x0F) as u8,
        }
    }
}

impl From<DnsFlags> for u16 {
    fn from(f: DnsFlags) -> u16 {
        let opcode: u8 = f.opcode.into();
        ((f.response as u16) << 15)
            | (((opcode & 0x0F) as u16) << 11)
            | ((f.authoritative_answer as u16) << 10)
            | ((f.truncated as u16) << 9)
            | ((f.recursion_desired as u16) << 8)
            | ((f.recursion_available as u16) << 7)
            | ((f.z as u16) << 6)
            | ((f.authentic_data as u16) << 5)
            | ((f.checking_disabled as u16) << 4)
            | (f.rcode_low & 0x0F) as u16
    }
}

impl DnsReadable for DnsFlags {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        Ok(Self::from(reader.read_u16()?))
    }
}

impl DnsWritable for DnsFlags {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_u16(u16::from(*self))
    }
}

u16_wire_enum! {
    /// Response codes.
    ///
    /// Based on: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6
    pub enum DnsResponseCode {
        NoError = 0,
        FormatError = 1,
        ServerFailure = 2,
        NxDomain = 3,
        NotImp = 4,
        Refused = 5,
        YXDomain = 6,
        YXRRSet = 7,
        NXRRSet = 8,
        NotAuth = 9,
        NotZone = 10,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum DnsOpcode {
    Query = 0,
    IQuery = 1,
    Status = 2,
    Notify = 4,
    Update = 5,
    #[num_enum(catch_all)]
    Other(u8),
}

impl Default for DnsOpcode {
    fn default() -> Self {
        DnsOpcode::Query
    }
}

u16_wire_enum! {
    /// Record types this resolver knows by name. Anything else is relayed as `Unknown`.
    ///
    /// Based on: https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-4
    pub enum RecordType {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        NAPTR = 35,
        /// EDNS pseudo-record
        OPT = 41,
        DS = 43,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        SVCB = 64,
        HTTPS = 65,
        ANY = 255,
        CAA = 257,
    }
}

impl RecordType {
    /// Types answered with the sinkhole address when blocked.
    pub fn is_address(self) -> bool {
        matches!(self, RecordType::A | RecordType::AAAA)
    }
}

u16_wire_enum! {
    /// Record classes. OPT records reuse this field for the UDP payload size.
    pub enum ClassType {
        IN = 1,
        CH = 3,
        HS = 4,
        NONE = 254,
        ANY = 255,
    }
}

/// A question entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub qname: DomainName,
    pub qtype: RecordType,
    pub qclass: ClassType,
}

impl DnsQuestion {
    pub fn new(qname: DomainName, qtype: RecordType, qclass: ClassType) -> Self {
        Self { qname, qtype, qclass }
    }
}

impl DnsReadable for DnsQuestion {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let qname = reader.read_qname()?;
        let qtype = RecordType::from(reader.read_u16()?);
        let qclass = ClassType::from(reader.read_u16()?);
        Ok(Self { qname, qtype, qclass })
    }
}

impl DnsWritable for DnsQuestion {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_qname(&self.qname)?;
        writer.write_u16(self.qtype.to_u16())?;
        writer.write_u16(self.qclass.to_u16())
    }
}

/// Record data. Types without a dedicated variant are carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecordData {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    /// CNAME, NS and PTR targets
    DomainName(DomainName),
    Mx {
        priority: u16,
        host: DomainName,
    },
    Soa {
        mname: DomainName,
        rname: DomainName,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Raw(Bytes),
}

impl DnsRecordData {
    fn write(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        match self {
            DnsRecordData::Ipv4(addr) => writer.write_bytes(&addr.octets()),
            DnsRecordData::Ipv6(addr) => writer.write_bytes(&addr.octets()),
            DnsRecordData::DomainName(name) => writer.write_qname(name),
            DnsRecordData::Mx { priority, host } => {
                writer.write_u16(*priority)?;
                writer.write_qname(host)
            }
            DnsRecordData::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                writer.write_qname(mname)?;
                writer.write_qname(rname)?;
                for v in [serial, refresh, retry, expire, minimum] {
                    writer.write_u32(*v)?;
                }
                Ok(())
            }
            DnsRecordData::Raw(data) => writer.write_bytes(data),
        }
    }

    fn read(reader: &mut DnsMessageReader, record_type: RecordType, len: usize) -> anyhow::Result<Self> {
        let start = reader.position();

        let data = match record_type {
            RecordType::A => {
                ensure!(len == 4, "A record with rdlength {}", len);
                let b = reader.read_bytes(4)?;
                DnsRecordData::Ipv4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
            }
            RecordType::AAAA => {
                ensure!(len == 16, "AAAA record with rdlength {}", len);
                let b: [u8; 16] = reader.read_bytes(16)?.try_into()?;
                DnsRecordData::Ipv6(Ipv6Addr::from(b))
            }
            RecordType::CNAME | RecordType::NS | RecordType::PTR => DnsRecordData::DomainName(reader.read_qname()?),
            RecordType::MX => DnsRecordData::Mx {
                priority: reader.read_u16()?,
                host: reader.read_qname()?,
            },
            RecordType::SOA => DnsRecordData::Soa {
                mname: reader.read_qname()?,
                rname: reader.read_qname()?,
                serial: reader.read_u32()?,
                refresh: reader.read_u32()?,
                retry: reader.read_u32()?,
                expire: reader.read_u32()?,
                minimum: reader.read_u32()?,
            },
            _ => DnsRecordData::Raw(Bytes::copy_from_slice(reader.read_bytes(len)?)),
        };

        let consumed = reader.position() - start;
        ensure!(
            consumed == len,
            "rdata length mismatch for {:?}: rdlength {} consumed {}",
            record_type,
            len,
            consumed
        );

        Ok(data)
    }
}

/// A resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: DomainName,
    pub record_type: RecordType,
    pub class: ClassType,
    pub ttl: u32,
    pub data: DnsRecordData,
}

impl DnsRecord {
    pub fn new(name: DomainName, record_type: RecordType, class: ClassType, ttl: u32, data: DnsRecordData) -> Self {
        Self {
            name,
            record_type,
            class,
            ttl,
            data,
        }
    }

    /// An IN A record.
    pub fn a(name: DomainName, ttl: u32, addr: Ipv4Addr) -> Self {
        Self::new(name, RecordType::A, ClassType::IN, ttl, DnsRecordData::Ipv4(addr))
    }

    /// An IN AAAA record.
    pub fn aaaa(name: DomainName, ttl: u32, addr: Ipv6Addr) -> Self {
        Self::new(name, RecordType::AAAA, ClassType::IN, ttl, DnsRecordData::Ipv6(addr))
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }
}

impl DnsReadable for DnsRecord {
    fn read_from(reader: &mut DnsMessageReader) -> anyhow::Result<Self> {
        let name = reader.read_qname()?;
        let record_type = RecordType::from(reader.read_u16()?);
        let class = ClassType::from(reader.read_u16()?);
        let ttl = reader.read_u32()?;
        let len = reader.read_u16()? as usize;
        let data = DnsRecordData::read(reader, record_type, len)?;

        Ok(Self {
            name,
            record_type,
            class,
            ttl,
            data,
        })
    }
}

impl DnsWritable for DnsRecord {
    fn write_to(&self, writer: &mut DnsMessageWriter) -> anyhow::Result<()> {
        writer.write_qname(&self.name)?;
        writer.write_u16(self.record_type.to_u16())?;
        writer.write_u16(self.class.to_u16())?;
        writer.write_u32(self.ttl)?;

        // reserve RDLENGTH and patch it once the data is written.
        let rdlen_pos = writer.position();
        writer.write_u16(0)?;

        let before = writer.position();
        self.data.write(writer)?;
        let rdlen = u16::try_from(writer.position() - before)?;

        writer.overwrite_bytes(rdlen_pos, &rdlen.to_be_bytes())
    }
}

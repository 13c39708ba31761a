pub mod builder;
pub mod domain_name;
pub mod helpers;
pub mod macros;
pub mod message;
pub mod reader;
pub mod writer;

pub use builder::DnsMessageBuilder;
pub use domain_name::DomainName;
pub use message::{
    ClassType, DnsFlags, DnsMessage, DnsOpcode, DnsQuestion, DnsRecord, DnsRecordData, DnsResponseCode, RecordType,
};
pub use reader::DnsMessageReader;
pub use writer::DnsMessageWriter;

/// Largest DNS message carried over TCP (2-byte length prefix).
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Classic UDP payload limit when the client did not advertise EDNS.
pub const MIN_UDP_PAYLOAD: usize = 512;

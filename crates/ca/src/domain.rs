use std::net::IpAddr;

use hush_dns::{
    DomainName,
    domain_name::{MAX_LABEL_LEN, MAX_NAME_LEN},
};

use crate::error::IssueError;

/// Strict syntactic check before anything is signed.
///
/// Accepts LDH host names of at least two labels, optionally prefixed by a
/// single `*.`. Everything else, IP literals included, is rejected.
pub fn validate_domain(input: &str) -> Result<DomainName, IssueError> {
    let name = input.strip_suffix('.').unwrap_or(input);

    if name.is_empty() || name.len() > MAX_NAME_LEN || name.parse::<IpAddr>().is_ok() {
        return Err(IssueError::InvalidDomain);
    }

    let host = name.strip_prefix("*.").unwrap_or(name);

    let mut labels = 0;
    for label in host.split('.') {
        labels += 1;
        let bytes = label.as_bytes();
        let valid = !bytes.is_empty()
            && bytes.len() <= MAX_LABEL_LEN
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
            && bytes[0] != b'-'
            && bytes[bytes.len() - 1] != b'-';
        if !valid {
            return Err(IssueError::InvalidDomain);
        }
    }

    // The last label is never all digits for a real host name.
    let tld_numeric = host.rsplit('.').next().is_some_and(|l| l.bytes().all(|b| b.is_ascii_digit()));
    if labels < 2 || tld_numeric {
        return Err(IssueError::InvalidDomain);
    }

    DomainName::from_ascii(name).map_err(|_| IssueError::InvalidDomain)
}

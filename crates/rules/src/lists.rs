//! External block lists in hosts-file or plain-domain format.

use std::net::IpAddr;

use crate::error::LayerError;

/// System entries found in most hosts files.
const IGNORED_DOMAINS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
    "0.0.0.0",
];

/// Extract block domains from an already-fetched list body.
///
/// Lines are either `<ip> <domain> [domain...]` (hosts format, sinkhole IPs
/// only) or a bare domain. `#` starts a comment. Entries are returned as
/// written; normalization happens when they join a [`crate::RuleSet`].
pub fn parse_list(body: &str, max_domains: usize) -> Result<Vec<String>, LayerError> {
    let mut domains = Vec::new();

    for line in body.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else { continue };

        let candidates: Vec<&str> = match first.parse::<IpAddr>() {
            Ok(ip) if ip.is_unspecified() || ip.is_loopback() => parts.collect(),
            Ok(_) => continue,
            Err(_) => vec![first],
        };

        for domain in candidates {
            if IGNORED_DOMAINS.contains(&domain.to_ascii_lowercase().as_str()) || domain.parse::<IpAddr>().is_ok() {
                continue;
            }

            domains.push(domain.to_string());
            if domains.len() > max_domains {
                return Err(LayerError::TooManyDomains {
                    count: domains.len(),
                    max: max_domains,
                });
            }
        }
    }

    Ok(domains)
}

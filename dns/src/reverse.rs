use displaydoc::Display;
use std::net::Ipv4Addr;
use thiserror::Error;

const SUFFIX: &str = "in-addr.arpa";

#[derive(Debug, Clone, PartialEq, Eq, Error, Display)]
pub enum ReverseZoneError {
    /// reverse zones need an octet-aligned prefix (8, 16 or 24), got /{0}
    Prefix(u8),
}

/// Classful reverse lookup zone for `network/prefix`, e.g. `0.0.10.in-addr.arpa`.
pub fn reverse_zone(network: Ipv4Addr, prefix: u8) -> Result<String, ReverseZoneError> {
    let kept = match prefix {
        8 => 1,
        16 => 2,
        24 => 3,
        other => return Err(ReverseZoneError::Prefix(other)),
    };
    let octets = network.octets();
    let labels: Vec<String> = octets[..kept].iter().rev().map(u8::to_string).collect();
    Ok(format!("{}.{SUFFIX}", labels.join(".")))
}

/// Name of the PTR record for `address` relative to `reverse_zone`, or
/// `None` when the address does not belong to that zone.
pub fn ptr_name(address: Ipv4Addr, reverse_zone: &str) -> Option<String> {
    let zone = reverse_zone.trim_end_matches('.').to_ascii_lowercase();
    let prefix = zone.strip_suffix(SUFFIX)?.trim_end_matches('.');
    let zone_octets: Vec<&str> = if prefix.is_empty() {
        Vec::new()
    } else {
        prefix.split('.').rev().collect()
    };
    if zone_octets.len() > 3 {
        return None;
    }
    let octets = address.octets();
    for (label, octet) in zone_octets.iter().zip(octets.iter()) {
        if label.parse::<u8>().ok()? != *octet {
            return None;
        }
    }
    let rest: Vec<String> = octets[zone_octets.len()..]
        .iter()
        .rev()
        .map(u8::to_string)
        .collect();
    Some(rest.join("."))
}

/// Compare DNS names ignoring case and the trailing root dot.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.')
        .eq_ignore_ascii_case(b.trim_end_matches('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_for_each_class() {
        let network = Ipv4Addr::new(10, 20, 30, 0);
        assert_eq!(reverse_zone(network, 24).unwrap(), "30.20.10.in-addr.arpa");
        assert_eq!(reverse_zone(network, 16).unwrap(), "20.10.in-addr.arpa");
        assert_eq!(reverse_zone(network, 8).unwrap(), "10.in-addr.arpa");
        assert_eq!(reverse_zone(network, 22), Err(ReverseZoneError::Prefix(22)));
    }

    #[test]
    fn ptr_name_within_zone() {
        let address = Ipv4Addr::new(10, 0, 0, 25);
        assert_eq!(ptr_name(address, "0.0.10.in-addr.arpa"), Some("25".to_owned()));
        assert_eq!(ptr_name(address, "0.10.in-addr.arpa."), Some("25.0".to_owned()));
        assert_eq!(ptr_name(address, "10.in-addr.arpa"), Some("25.0.0".to_owned()));
    }

    #[test]
    fn ptr_name_outside_zone() {
        let address = Ipv4Addr::new(10, 0, 1, 25);
        assert_eq!(ptr_name(address, "0.0.10.in-addr.arpa"), None);
        assert_eq!(ptr_name(address, "lab.example.com"), None);
    }

    #[test]
    fn names_compare_loosely() {
        assert!(same_name("web01.lab.example.com.", "WEB01.lab.example.com"));
        assert!(!same_name("web01.lab.example.com.", "web011.lab.example.com."));
    }
}

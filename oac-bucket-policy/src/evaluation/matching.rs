//! Wildcard and CIDR matching primitives

use std::net::IpAddr;

use regex::RegexBuilder;

/// IAM-style glob match: `*` matches any run of characters, `?` exactly one.
pub fn wildcard_match(pattern: &str, value: &str, case_insensitive: bool) -> bool {
    if !pattern.contains(&['*', '?'][..]) {
        return if case_insensitive {
            pattern.eq_ignore_ascii_case(value)
        } else {
            pattern == value
        };
    }

    let mut regex_pattern = String::with_capacity(pattern.len() + 8);
    regex_pattern.push('^');
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '*' | '?' => {
                regex_pattern.push_str(&regex::escape(&literal));
                literal.clear();
                regex_pattern.push_str(if ch == '*' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    regex_pattern.push_str(&regex::escape(&literal));
    regex_pattern.push('$');

    RegexBuilder::new(&regex_pattern)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// Whether `ip` falls inside `cidr` (`a.b.c.d/n`, `x::y/n`, or a bare address).
pub fn ip_in_cidr(ip: IpAddr, cidr: &str) -> bool {
    let (network, prefix_len) = match cidr.trim().split_once('/') {
        Some((network, prefix)) => match prefix.parse::<u8>() {
            Ok(len) => (network, len),
            Err(_) => return false,
        },
        None => (cidr.trim(), u8::MAX),
    };
    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };

    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) => {
            let prefix_len = u32::from(prefix_len.min(32));
            let mask = u32::MAX.checked_shl(32 - prefix_len).unwrap_or(0);
            (u32::from(ip) & mask) == (u32::from(network) & mask)
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) => {
            let prefix_len = u32::from(prefix_len.min(128));
            let mask = u128::MAX.checked_shl(128 - prefix_len).unwrap_or(0);
            (u128::from(ip) & mask) == (u128::from(network) & mask)
        }
        _ => false,
    }
}

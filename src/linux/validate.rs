//! Syntactic checks for operator-supplied address literals.
//!
//! The permissive checks only look at shape: four dot-separated groups of one
//! to three digits for IPv4, and two to eight colon-separated groups of up to
//! four hex digits for IPv6. Octet ranges and `::` compression are not
//! interpreted. `Strictness::Strict` additionally requires the literal to
//! parse as a real address.

use crate::os::policy::{AddressFamily, IpAddress};
use crate::utils::error::HardenError;
use serde::Serialize;
use std::net::{Ipv4Addr, Ipv6Addr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Strictness {
    #[default]
    Permissive,
    Strict,
}

pub fn validate(literal: &str, family: AddressFamily, strictness: Strictness) -> bool {
    let shaped = match family {
        AddressFamily::V4 => is_dotted_quad(literal),
        AddressFamily::V6 => is_colon_hex(literal),
    };
    if !shaped {
        return false;
    }
    match (strictness, family) {
        (Strictness::Permissive, _) => true,
        (Strictness::Strict, AddressFamily::V4) => literal.parse::<Ipv4Addr>().is_ok(),
        (Strictness::Strict, AddressFamily::V6) => literal.parse::<Ipv6Addr>().is_ok(),
    }
}

/// Tags `literal` with the first family it validates under, IPv4 first.
pub fn classify(literal: &str, strictness: Strictness) -> Result<IpAddress, HardenError> {
    AddressFamily::ALL
        .into_iter()
        .find(|family| validate(literal, *family, strictness))
        .map(|family| IpAddress::tagged(literal, family))
        .ok_or_else(|| HardenError::InvalidAddress(literal.to_owned()))
}

/// Validates a space-separated operator list. One bad literal rejects the
/// whole list.
pub fn classify_list(line: &str, strictness: Strictness) -> Result<Vec<IpAddress>, HardenError> {
    line.split_whitespace()
        .map(|literal| classify(literal, strictness))
        .collect()
}

fn is_dotted_quad(literal: &str) -> bool {
    let groups: Vec<&str> = literal.split('.').collect();
    groups.len() == 4
        && groups
            .iter()
            .all(|g| (1..=3).contains(&g.len()) && g.bytes().all(|b| b.is_ascii_digit()))
}

fn is_colon_hex(literal: &str) -> bool {
    let groups: Vec<&str> = literal.split(':').collect();
    // 1-7 colons, so 2-8 groups
    (2..=8).contains(&groups.len())
        && groups
            .iter()
            .all(|g| g.len() <= 4 && g.bytes().all(|b| b.is_ascii_hexdigit()))
}

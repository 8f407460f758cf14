//! Naming conventions
//!
//! Fields without an explicit rule are renamed by a pluggable convention
//! injected into both mappers.

use std::fmt;
use std::sync::Arc;

/// Pure, reversible mapping between local field names and remote keys
pub trait NamingConvention: Send + Sync + fmt::Debug {
    /// `instance_type` -> `InstanceType`
    fn to_remote(&self, field: &str) -> String;
    /// `InstanceType` -> `instance_type`
    fn to_local(&self, key: &str) -> String;
}

pub type SharedNaming = Arc<dyn NamingConvention>;

/// Lower snake case locally, upper camel case remotely
#[derive(Debug, Clone, Copy, Default)]
pub struct UpperCamel;

impl NamingConvention for UpperCamel {
    fn to_remote(&self, field: &str) -> String {
        field
            .split('_')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                let mut chars = segment.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }

    fn to_local(&self, key: &str) -> String {
        let chars: Vec<char> = key.chars().collect();
        let mut out = String::with_capacity(key.len() + 4);

        for (i, &c) in chars.iter().enumerate() {
            if c.is_ascii_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
                // "VpcId" -> vpc_id, "VPCId" -> vpc_id
                if prev.is_ascii_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_ascii_uppercase() && next_is_lower)
                {
                    out.push('_');
                }
            }
            out.push(c.to_ascii_lowercase());
        }

        out
    }
}

/// Names pass through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl NamingConvention for Verbatim {
    fn to_remote(&self, field: &str) -> String {
        field.to_string()
    }

    fn to_local(&self, key: &str) -> String {
        key.to_string()
    }
}

pub fn default_naming() -> SharedNaming {
    Arc::new(UpperCamel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_camel_to_remote() {
        let naming = UpperCamel;
        assert_eq!(naming.to_remote("instance_type"), "InstanceType");
        assert_eq!(naming.to_remote("vpc_id"), "VpcId");
        assert_eq!(naming.to_remote("ipv6_address"), "Ipv6Address");
        assert_eq!(naming.to_remote("name"), "Name");
    }

    #[test]
    fn test_upper_camel_to_local() {
        let naming = UpperCamel;
        assert_eq!(naming.to_local("InstanceType"), "instance_type");
        assert_eq!(naming.to_local("VPCId"), "vpc_id");
        assert_eq!(naming.to_local("Ipv6Address"), "ipv6_address");
        assert_eq!(naming.to_local("CreateTime"), "create_time");
    }

    #[test]
    fn test_verbatim() {
        assert_eq!(Verbatim.to_remote("a_b"), "a_b");
        assert_eq!(Verbatim.to_local("AB"), "AB");
    }
}

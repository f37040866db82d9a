//! Status endpoint access control.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

use crate::security::headers::ip_in_networks;

/// Networks allowed to see the status payload.
#[derive(Debug, Clone)]
pub struct StatusAccess {
    allowed: Vec<IpNetwork>,
}

impl StatusAccess {
    /// Entries that do not parse are skipped with a warning; validation
    /// rejects them earlier for file-based configs.
    pub fn from_networks(networks: &[String]) -> Self {
        let allowed = networks
            .iter()
            .filter_map(|entry| match entry.parse::<IpNetwork>() {
                Ok(network) => Some(network),
                Err(e) => {
                    tracing::warn!(entry = %entry, error = %e, "Ignoring invalid status network");
                    None
                }
            })
            .collect();
        Self { allowed }
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        ip_in_networks(ip, &self.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_networks_allow_everyone() {
        let access = StatusAccess::from_networks(&["0.0.0.0/0".into(), "::/0".into()]);
        assert!(access.allows("203.0.113.5".parse().unwrap()));
        assert!(access.allows("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn restricted_networks() {
        let access = StatusAccess::from_networks(&["10.0.0.0/8".into(), "garbage".into()]);
        assert!(access.allows("10.20.30.40".parse().unwrap()));
        assert!(!access.allows("192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn empty_list_denies() {
        let access = StatusAccess::from_networks(&[]);
        assert!(!access.allows("127.0.0.1".parse().unwrap()));
    }
}

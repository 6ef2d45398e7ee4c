use std::collections::BTreeSet;

/// The minting key handed to the certificate store and to
/// `ssl_certificate.{search,create}` interceptors (§3). Two certificates
/// compare equivalent for cache lookup when any of their CN/SAN
/// asterisk-forms match a cached key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CertificateInterface {
    pub common_name: Option<String>,
    pub sans: BTreeSet<String>,
    pub organization: Option<String>,
}

impl CertificateInterface {
    pub fn for_host(host: &str) -> Self {
        let mut sans = BTreeSet::new();
        sans.insert(host.to_string());
        Self {
            common_name: Some(host.to_string()),
            sans,
            organization: None,
        }
    }

    /// Every name this interface should be searchable/cacheable under:
    /// the CN plus every SAN.
    pub fn all_names(&self) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.sans.iter().map(|s| s.as_str()).collect();
        if let Some(cn) = &self.common_name {
            names.insert(cn.as_str());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_host_sets_cn_and_san() {
        let iface = CertificateInterface::for_host("example.test");
        assert_eq!(iface.common_name.as_deref(), Some("example.test"));
        assert!(iface.sans.contains("example.test"));
    }
}

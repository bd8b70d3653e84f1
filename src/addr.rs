use super::util;
use gethostname::gethostname;
use std::fmt;
use std::process;

/// Models a bus-level address of the form `node@domain[/resource]`,
/// providing access to individual components of each address.
///
/// Examples:
///
/// `router@private.localhost`
/// `opensrf.settings@private.localhost`
/// `client@private.localhost/a1b2c3`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    /// Full raw address string
    full: String,

    node: String,
    domain: String,
    resource: Option<String>,

    is_client: bool,
    is_service: bool,
    is_router: bool,
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address={}", &self.full)
    }
}

impl BusAddress {
    /// Creates a new BusAddress from a JID-style address string.
    ///
    /// ```
    /// let addr =
    ///   opensrf_bus::addr::BusAddress::from_string("client@private.localhost/a1b2c3")
    ///   .expect("Error creating address from string");
    ///
    /// assert!(addr.is_client());
    /// assert_eq!(addr.domain(), "private.localhost");
    /// ```
    pub fn from_string(full: &str) -> Result<Self, String> {
        let (node_part, domain_part) = full
            .split_once('@')
            .ok_or_else(|| format!("BusAddress bad format (no '@'): {full}"))?;

        if node_part.is_empty() || domain_part.is_empty() {
            return Err(format!("BusAddress bad format: {full}"));
        }

        let (domain, resource) = match domain_part.split_once('/') {
            Some((d, r)) => (d.to_string(), Some(r.to_string())),
            None => (domain_part.to_string(), None),
        };

        let is_client = node_part == "client";
        let is_router = node_part == "router";
        // Anything else is a dotted service name, e.g. "opensrf.settings".
        let is_service = !is_client && !is_router;

        Ok(BusAddress {
            full: full.to_string(),
            node: node_part.to_string(),
            domain,
            resource,
            is_client,
            is_service,
            is_router,
        })
    }

    /// Full address string
    pub fn as_str(&self) -> &str {
        &self.full
    }
    pub fn node(&self) -> &str {
        &self.node
    }
    pub fn domain(&self) -> &str {
        &self.domain
    }
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
    pub fn is_client(&self) -> bool {
        self.is_client
    }
    pub fn is_service(&self) -> bool {
        self.is_service
    }
    pub fn is_router(&self) -> bool {
        self.is_router
    }
    /// Service name, for a service address. Equivalent to `node()`.
    pub fn service(&self) -> Option<&str> {
        if self.is_service {
            Some(&self.node)
        } else {
            None
        }
    }

    /// Alias for `from_string`, matching `std::str::FromStr`-style
    /// call sites that parse an address out of a received stanza.
    pub fn from_str(full: &str) -> Result<Self, String> {
        Self::from_string(full)
    }

    /// The router address a client should address top-level requests
    /// to, given the configured router node name and domain.
    pub fn for_router(router_name: &str, domain: &str) -> Self {
        BusAddress::from_string(&format!("{router_name}@{domain}"))
            .expect("generated router address is well-formed")
    }

    /// A bare, resource-less service address, e.g. for addressing a
    /// service through the router rather than a specific drone.
    pub fn for_bare_service(service: &str, domain: &str) -> Self {
        BusAddress::from_string(&format!("{service}@{domain}"))
            .expect("generated service address is well-formed")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress {
    addr: BusAddress,
}

impl ClientAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_client() {
            Ok(ClientAddress { addr })
        } else {
            Err("Cannot create a ClientAddress from a non-client BusAddress".to_string())
        }
    }

    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_string(full)?;
        Self::from_addr(addr)
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a new, unique ClientAddress for a domain.
    ///
    /// ```
    /// let domain = "private.localhost";
    /// let addr = opensrf_bus::addr::ClientAddress::new(domain);
    /// assert_eq!(addr.addr().domain(), domain);
    /// assert!(addr.addr().is_client());
    /// ```
    pub fn new(domain: &str) -> Self {
        let full = format!(
            "client@{}/{}-{}-{}",
            domain,
            &gethostname()
                .into_string()
                .unwrap_or_else(|_| "host".to_string()),
            process::id(),
            &util::random_number(6)
        );

        ClientAddress {
            addr: BusAddress::from_string(&full)
                .expect("generated client address is well-formed"),
        }
    }

    /// Allow the caller to replace the resource portion of the address,
    /// e.g. to address a specific drone directly.
    ///
    /// ```
    /// let domain = "private.localhost";
    /// let mut addr = opensrf_bus::addr::ClientAddress::new(domain);
    /// addr.set_resource("drone-7");
    /// assert!(addr.as_str().ends_with("drone-7"));
    /// ```
    pub fn set_resource(&mut self, resource: &str) {
        let full = format!("client@{}/{}", self.addr().domain(), resource);
        self.addr = BusAddress::from_string(&full).expect("resource-qualified address is valid");
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }
}

impl fmt::Display for ClientAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ClientAddress={}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    addr: BusAddress,
}

impl ServiceAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_service() {
            Ok(ServiceAddress { addr })
        } else {
            Err("Cannot create a ServiceAddress from a non-service BusAddress".to_string())
        }
    }

    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_string(full)?;
        Self::from_addr(addr)
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a domain-qualified service address.
    ///
    /// ```
    /// let service = "opensrf.settings";
    /// let domain = "private.localhost";
    /// let addr = opensrf_bus::addr::ServiceAddress::new(service, domain);
    /// assert_eq!(addr.service(), service);
    /// assert!(addr.addr().is_service());
    /// ```
    pub fn new(service: &str, domain: &str) -> Self {
        let full = format!("{service}@{domain}");
        ServiceAddress {
            addr: BusAddress::from_string(&full)
                .expect("generated service address is well-formed"),
        }
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }

    pub fn service(&self) -> &str {
        self.addr().service().unwrap()
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ServiceAddress={}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterAddress {
    addr: BusAddress,
}

impl RouterAddress {
    pub fn from_addr(addr: BusAddress) -> Result<Self, String> {
        if addr.is_router() {
            Ok(RouterAddress { addr })
        } else {
            Err("Cannot create a RouterAddress from a non-router BusAddress".to_string())
        }
    }

    /// Create a new router address from a string
    ///
    /// ```
    /// let addr_res = opensrf_bus::addr::RouterAddress::from_string("opensrf.settings@localhost");
    /// assert!(addr_res.is_err());
    ///
    /// let addr_res = opensrf_bus::addr::RouterAddress::from_string("router@localhost");
    /// assert!(addr_res.is_ok());
    /// assert!(addr_res.unwrap().addr().domain().eq("localhost"));
    /// ```
    pub fn from_string(full: &str) -> Result<Self, String> {
        let addr = BusAddress::from_string(full)?;
        Self::from_addr(addr)
    }

    pub fn as_str(&self) -> &str {
        self.addr.as_str()
    }

    /// Create a new router address for a domain.
    ///
    /// ```
    /// let addr = opensrf_bus::addr::RouterAddress::new("localhost");
    /// assert_eq!(addr.as_str(), "router@localhost");
    /// ```
    pub fn new(domain: &str) -> Self {
        let full = format!("router@{domain}");
        RouterAddress {
            addr: BusAddress::from_string(&full)
                .expect("generated router address is well-formed"),
        }
    }

    pub fn addr(&self) -> &BusAddress {
        &self.addr
    }
}

impl fmt::Display for RouterAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RouterAddress={}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource() {
        let addr = BusAddress::from_string("client@localhost/abc123").unwrap();
        assert!(addr.is_client());
        assert_eq!(addr.domain(), "localhost");
        assert_eq!(addr.resource(), Some("abc123"));
    }

    #[test]
    fn parses_service_without_resource() {
        let addr = BusAddress::from_string("opensrf.settings@localhost").unwrap();
        assert!(addr.is_service());
        assert_eq!(addr.service(), Some("opensrf.settings"));
        assert_eq!(addr.resource(), None);
    }

    #[test]
    fn rejects_malformed() {
        assert!(BusAddress::from_string("no-at-sign").is_err());
        assert!(BusAddress::from_string("@localhost").is_err());
    }
}

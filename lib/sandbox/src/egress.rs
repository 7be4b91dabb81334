//! Egress filter for sandboxed network access (§4.4).
//!
//! Consulted once per outbound request and again per redirect hop. The
//! filter never resolves DNS itself; callers pass the resolved addresses
//! they intend to connect to, since only the caller's resolver knows which
//! addresses a hostname bound to at request time (checking the hostname
//! alone would miss DNS-rebinding to a blocked address).
//!
//! No in-process evaluator performs outbound requests today, so nothing in
//! this crate calls `check_hop` yet. It is still mandatory: any future node
//! implementation that dials out on a body's behalf (an `ExternalCall`
//! executor, a `NativeModule` with HTTP access, or an out-of-process
//! runner) must construct an [`EgressFilter`] per request and run every hop
//! — initial connect and each redirect — through `check_hop` before the
//! socket is opened. Treat this module as that contract surface, not as
//! dead code to delete.

use crate::caps::SandboxCaps;
use crate::error::SandboxError;
use std::net::IpAddr;

/// Default cap on redirect hops before an egress chain is aborted (§4.4).
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Stateful filter tracking the redirect count for one outbound request.
pub struct EgressFilter<'a> {
    caps: &'a SandboxCaps,
    max_redirects: u32,
    redirects_seen: u32,
}

impl<'a> EgressFilter<'a> {
    /// Creates a filter for one outbound request, using the default
    /// redirect ceiling.
    #[must_use]
    pub fn new(caps: &'a SandboxCaps) -> Self {
        Self { caps, max_redirects: DEFAULT_MAX_REDIRECTS, redirects_seen: 0 }
    }

    /// Validates a hop to `host` resolving to `addrs`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::EgressDenied`] if the body's caps forbid
    /// network access, the hostname isn't in `allowed_egress_domains`, a
    /// resolved address falls in a blocked range, or the redirect ceiling
    /// is exceeded.
    pub fn check_hop(&mut self, host: &str, addrs: &[IpAddr]) -> Result<(), SandboxError> {
        if !self.caps.network_allowed {
            return Err(SandboxError::EgressDenied {
                host: host.to_string(),
                reason: "network access not permitted by this node's caps".to_string(),
            });
        }

        if self.redirects_seen > self.max_redirects {
            return Err(SandboxError::EgressDenied {
                host: host.to_string(),
                reason: format!("exceeded {} redirect hops", self.max_redirects),
            });
        }

        if !self.caps.permits_domain(host) {
            return Err(SandboxError::EgressDenied {
                host: host.to_string(),
                reason: "hostname not in allowed_egress_domains".to_string(),
            });
        }

        for addr in addrs {
            if is_blocked_address(addr) {
                return Err(SandboxError::EgressDenied {
                    host: host.to_string(),
                    reason: format!("resolved address {addr} is in a blocked range"),
                });
            }
        }

        Ok(())
    }

    /// Records that a redirect was followed, for the next `check_hop` call.
    pub fn record_redirect(&mut self) {
        self.redirects_seen += 1;
    }
}

/// Returns true for loopback, link-local, and RFC1918 private ranges.
///
/// These are blocked unconditionally: a node's caps can widen the allowed
/// domain list, but never reach back into the host's own private network.
#[must_use]
pub fn is_blocked_address(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_private(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn caps_allowing(domains: &[&str]) -> SandboxCaps {
        let mut caps = SandboxCaps { network_allowed: true, ..SandboxCaps::default() };
        caps.allowed_egress_domains.extend(domains.iter().map(|d| d.to_string()));
        caps
    }

    #[test]
    fn denies_when_network_not_allowed() {
        let caps = SandboxCaps::default();
        let mut filter = EgressFilter::new(&caps);
        let addr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        assert!(filter.check_hop("example.com", &[addr]).is_err());
    }

    #[test]
    fn denies_hostname_not_on_allowlist() {
        let caps = caps_allowing(&["api.example.com"]);
        let mut filter = EgressFilter::new(&caps);
        let addr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        assert!(filter.check_hop("evil.example.com", &[addr]).is_err());
    }

    #[test]
    fn allows_allowlisted_public_address() {
        let caps = caps_allowing(&["api.example.com"]);
        let mut filter = EgressFilter::new(&caps);
        let addr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        assert!(filter.check_hop("api.example.com", &[addr]).is_ok());
    }

    #[test]
    fn denies_private_address_even_when_allowlisted() {
        let caps = caps_allowing(&["internal.example.com"]);
        let mut filter = EgressFilter::new(&caps);
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        assert!(filter.check_hop("internal.example.com", &[addr]).is_err());
    }

    #[test]
    fn aborts_after_too_many_redirects() {
        let caps = caps_allowing(&["api.example.com"]);
        let mut filter = EgressFilter::new(&caps);
        let addr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));
        for _ in 0..=DEFAULT_MAX_REDIRECTS {
            filter.record_redirect();
        }
        assert!(filter.check_hop("api.example.com", &[addr]).is_err());
    }
}

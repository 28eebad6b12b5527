//! Per-destination routing between a proxied and a direct dialer.
//!
//! [`BypassRouter`] looks at the host part of every dial address and sends
//! it to the bypass dialer when it matches the exclusion list, or to the
//! default dialer otherwise.
//!
//! # Matching Rules
//!
//! | Entry | Kind | Matches |
//! |-------|------|---------|
//! | `10.0.0.0/8` | network | any IP inside the block |
//! | `::1` | IP | that exact IP |
//! | `*.example.com` | zone | `a.example.com`, `example.com` |
//! | `.example.com` | zone | `a.example.com`, `example.com` |
//! | `example.com` | host | `example.com` only |
//!
//! Hostnames compare case-insensitively and ignore a trailing dot. IP
//! destinations are only checked against IP and network entries.

use crate::conn::Conn;
use crate::dialer::{split_host_port, BoxDialer, Dialer, Network};
use crate::error::Result;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::trace;

const BRACKETS: &[char] = &['[', ']'];

/// Routes dials to a bypass dialer for excluded hosts.
#[derive(Debug)]
pub struct BypassRouter {
    default: BoxDialer,
    bypass: BoxDialer,

    networks: Vec<IpNet>,
    ips: Vec<IpAddr>,
    /// Zones with a leading dot, e.g. `.example.com`.
    zones: Vec<String>,
    hosts: Vec<String>,
}

impl BypassRouter {
    /// Creates a router that uses `default` unless a rule picks `bypass`.
    pub fn new(default: BoxDialer, bypass: BoxDialer) -> Self {
        Self {
            default,
            bypass,
            networks: Vec::new(),
            ips: Vec::new(),
            zones: Vec::new(),
            hosts: Vec::new(),
        }
    }

    /// Adds rules from a comma-separated list.
    ///
    /// Entries containing `/` are CIDR networks and are skipped when they
    /// do not parse. IP literals become IP rules, `*.suffix` and `.suffix`
    /// become zones, and anything else an exact host. Blank entries are
    /// ignored.
    pub fn add_from_string(&mut self, list: &str) {
        for entry in list.split(',').map(str::trim) {
            if entry.is_empty() {
                continue;
            }
            if entry.contains('/') {
                match entry.parse::<IpNet>() {
                    Ok(net) => self.add_network(net),
                    Err(_) => trace!(entry = %entry, "Skipping malformed bypass network"),
                }
                continue;
            }
            if let Ok(ip) = entry.trim_matches(BRACKETS).parse::<IpAddr>() {
                self.add_ip(ip);
                continue;
            }
            if entry.starts_with('.') {
                self.add_zone(entry);
                continue;
            }
            if let Some(zone) = entry.strip_prefix('*') {
                if zone.starts_with('.') {
                    self.add_zone(zone);
                    continue;
                }
            }
            self.add_host(entry);
        }
    }

    /// Bypasses every IP inside `net`.
    pub fn add_network(&mut self, net: IpNet) {
        self.networks.push(net);
    }

    /// Bypasses a single IP.
    pub fn add_ip(&mut self, ip: IpAddr) {
        self.ips.push(ip);
    }

    /// Bypasses a domain and all of its subdomains.
    ///
    /// `example.com` and `.example.com` are equivalent.
    pub fn add_zone(&mut self, zone: &str) {
        let zone = normalize_host(zone);
        let zone = if zone.starts_with('.') {
            zone
        } else {
            format!(".{}", zone)
        };
        self.zones.push(zone);
    }

    /// Bypasses one exact hostname.
    pub fn add_host(&mut self, host: &str) {
        self.hosts.push(normalize_host(host));
    }

    /// Returns true if `host` is routed to the bypass dialer.
    pub fn routes_direct(&self, host: &str) -> bool {
        let host = host.trim_matches(BRACKETS);
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.networks.iter().any(|net| net.contains(&ip))
                || self.ips.iter().any(|bypass| *bypass == ip);
        }

        let host = normalize_host(host);
        let in_zone = self
            .zones
            .iter()
            .any(|zone| host.ends_with(zone.as_str()) || host == zone[1..]);
        in_zone || self.hosts.iter().any(|bypass| *bypass == host)
    }

    fn dialer_for(&self, host: &str) -> &BoxDialer {
        if self.routes_direct(host) {
            trace!(host = %host, "Bypassing proxy");
            &self.bypass
        } else {
            &self.default
        }
    }
}

impl Dialer for BypassRouter {
    fn dial(&self, network: Network, addr: &str) -> Result<Conn> {
        let (host, _) = split_host_port(addr)?;
        self.dialer_for(host).dial(network, addr)
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_lowercase()
}

use std::net::Ipv6Addr;
use std::sync::Mutex;

use ipnet::Ipv6Net;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog_scope::{info, warn};

use crate::error::{AppError, Result};

/// Parse a list of CIDR strings into IPv6 prefixes. Malformed entries and
/// embedded-IPv4 networks are collected as error strings, not fatal; the
/// caller decides whether an empty accepted set is an error. Host bits below
/// the prefix length are truncated away.
pub fn parse_prefixes(entries: &[String]) -> (Vec<Ipv6Net>, Vec<String>) {
    let mut accepted = Vec::new();
    let mut errors = Vec::new();
    for entry in entries {
        match entry.parse::<Ipv6Net>() {
            Ok(net) => {
                if net.addr().to_ipv4_mapped().is_some() {
                    errors.push(format!("{}: embedded IPv4 network", entry));
                } else {
                    accepted.push(net.trunc());
                }
            }
            Err(e) => errors.push(format!("{}: {}", entry, e)),
        }
    }
    (accepted, errors)
}

/// Emits a fresh IPv6 source address per outbound connection.
///
/// Each configured parent prefix contributes one active /48 to the working
/// pool; every `rotation_limit` emissions the pool is redrawn. Parents at
/// /48 or longer keep their natural length so emitted addresses never leave
/// the parent block.
pub struct Rotator {
    state: Mutex<State>,
}

struct State {
    parents: Vec<Ipv6Net>,
    actives: Vec<Ipv6Net>,
    emitted: u64,
    rotation_limit: u64,
    rng: StdRng,
}

impl State {
    fn rebuild_actives(&mut self) {
        let mut actives = Vec::with_capacity(self.parents.len());
        for parent in &self.parents {
            let active = if parent.prefix_len() >= 48 {
                *parent
            } else {
                let offset_bits = 48 - u32::from(parent.prefix_len());
                let offset: u128 = self.rng.gen_range(0..(1u128 << offset_bits));
                let addr = Ipv6Addr::from(u128::from(parent.network()) | (offset << 80));
                Ipv6Net::new(addr, 48).expect("/48 is a valid prefix length")
            };
            info!("pool_active"; "prefix" => active.to_string());
            actives.push(active);
        }
        self.actives = actives;
    }

    fn random_address(&mut self) -> Ipv6Addr {
        self.emitted += 1;
        if self.emitted >= self.rotation_limit {
            info!("pool_rotated"; "after_emissions" => self.emitted);
            self.rebuild_actives();
            self.emitted = 0;
        }

        let active = self.actives[self.rng.gen_range(0..self.actives.len())];
        let host_bits = 128 - u32::from(active.prefix_len());
        let base = u128::from(active.network());
        let addr = if host_bits == 0 {
            base
        } else {
            base | self.rng.gen_range(0..(1u128 << host_bits))
        };
        Ipv6Addr::from(addr)
    }
}

impl Rotator {
    pub fn new(prefixes: Vec<Ipv6Net>, rotation_limit: u64) -> Result<Self> {
        if prefixes.is_empty() {
            return Err(AppError::Rotator("no valid IPv6 prefixes".to_string()));
        }
        if rotation_limit == 0 {
            return Err(AppError::Rotator("rotation limit must be non-zero".to_string()));
        }
        let mut state = State {
            parents: prefixes,
            actives: Vec::new(),
            emitted: 0,
            rotation_limit,
            rng: StdRng::from_entropy(),
        };
        state.rebuild_actives();
        Ok(Rotator {
            state: Mutex::new(state),
        })
    }

    /// Draw one source address from the active pool, rotating the pool first
    /// if the emission counter has reached its limit.
    pub fn random_address(&self) -> Ipv6Addr {
        self.lock().random_address()
    }

    /// Swap in a new parent set, redraw the pool, and reset the emission
    /// counter. An empty set is ignored so a bad reload cannot leave the
    /// rotator with nothing to emit from.
    pub fn update_prefixes(&self, prefixes: Vec<Ipv6Net>) {
        if prefixes.is_empty() {
            warn!("prefix_update_skipped"; "reason" => "empty prefix set, keeping previous");
            return;
        }
        let mut state = self.lock();
        state.parents = prefixes;
        state.rebuild_actives();
        state.emitted = 0;
    }

    /// Snapshot of the current active /48 pool.
    pub fn active_pool(&self) -> Vec<Ipv6Net> {
        self.lock().actives.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn prefixes(entries: &[&str]) -> Vec<Ipv6Net> {
        entries.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_parse_collects_errors() {
        let entries = vec![
            "2001:db8::/32".to_string(),
            "not-a-cidr".to_string(),
            "::ffff:10.0.0.0/120".to_string(),
        ];
        let (accepted, errors) = parse_prefixes(&entries);
        assert_eq!(accepted, prefixes(&["2001:db8::/32"]));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_parse_truncates_host_bits() {
        let (accepted, errors) = parse_prefixes(&["2001:db8::1/32".to_string()]);
        assert!(errors.is_empty());
        assert_eq!(accepted, prefixes(&["2001:db8::/32"]));
    }

    #[test]
    fn test_new_rejects_empty_set() {
        assert!(Rotator::new(Vec::new(), 10).is_err());
    }

    #[test]
    fn test_new_rejects_zero_limit() {
        assert!(Rotator::new(prefixes(&["2001:db8::/32"]), 0).is_err());
    }

    #[test]
    fn test_full_length_prefix_emits_itself() {
        let rotator = Rotator::new(prefixes(&["2001:db8::42/128"]), 3).unwrap();
        for _ in 0..10 {
            assert_eq!(rotator.random_address(), "2001:db8::42".parse::<Ipv6Addr>().unwrap());
        }
    }

    #[test]
    fn test_48_prefix_is_its_own_active() {
        let parent: Ipv6Net = "2001:db8:1::/48".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 1000).unwrap();
        assert_eq!(rotator.active_pool(), vec![parent]);
    }

    #[test]
    fn test_active_derived_inside_parent() {
        let parent: Ipv6Net = "2001:db8::/32".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 1000).unwrap();
        let actives = rotator.active_pool();
        assert_eq!(actives.len(), 1);
        let active = actives[0];
        assert_eq!(active.prefix_len(), 48);
        assert!(parent.contains(&active.network()));
        // only bits [32, 48) of the offset were drawn
        assert_eq!(u128::from(active.network()) & ((1u128 << 80) - 1), 0);
    }

    #[test]
    fn test_emissions_contained_in_parent() {
        let parent: Ipv6Net = "2001:db8::/32".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 7).unwrap();
        for _ in 0..100 {
            assert!(parent.contains(&rotator.random_address()));
        }
    }

    #[test]
    fn test_emissions_contained_for_long_parent() {
        // a parent longer than /48 keeps its natural length in the pool
        let parent: Ipv6Net = "2001:db8:1:ab00::/56".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 5).unwrap();
        assert_eq!(rotator.active_pool(), vec![parent]);
        for _ in 0..100 {
            assert!(parent.contains(&rotator.random_address()));
        }
    }

    #[test]
    fn test_low_bits_vary_within_48() {
        let parent: Ipv6Net = "2001:db8:1::/48".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 10_000).unwrap();
        let distinct: HashSet<Ipv6Addr> = (0..1000).map(|_| rotator.random_address()).collect();
        assert!(distinct.len() > 950, "only {} distinct addresses", distinct.len());
    }

    #[test]
    fn test_pool_rotates_at_limit() {
        // /16 parent: 2^32 possible actives, a repeated draw is a
        // one-in-four-billion event
        let rotator = Rotator::new(prefixes(&["2001::/16"]), 2).unwrap();
        let before = rotator.active_pool();
        rotator.random_address();
        rotator.random_address();
        assert_ne!(rotator.active_pool(), before);
    }

    #[test]
    fn test_update_prefixes_switches_emissions() {
        let rotator = Rotator::new(prefixes(&["2001:db8::/32"]), 100).unwrap();
        let replacement: Ipv6Net = "2001:db8:abcd::/48".parse().unwrap();
        rotator.update_prefixes(vec![replacement]);
        for _ in 0..50 {
            assert!(replacement.contains(&rotator.random_address()));
        }
    }

    #[test]
    fn test_update_with_empty_set_keeps_previous() {
        let parent: Ipv6Net = "2001:db8::/32".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 100).unwrap();
        rotator.update_prefixes(Vec::new());
        assert!(parent.contains(&rotator.random_address()));
    }

    #[test]
    fn test_concurrent_emissions_stay_contained() {
        let parent: Ipv6Net = "2001:db8::/32".parse().unwrap();
        let rotator = Arc::new(Rotator::new(vec![parent], 3).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rotator = rotator.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(parent.contains(&rotator.random_address()));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock, Reference};
use std::{
    net::{IpAddr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// IPv6 clients usually own a whole prefix; bucket them by /56 so rotating
/// the interface id does not yield a fresh key.
pub const DEFAULT_IPV6_PREFIX: u8 = 56;

#[derive(Debug, Clone, Copy)]
struct Window<I> {
    start: I,
    count: u32,
}

/// Fixed-window rate limiter keyed by normalized client IP.
///
/// A key's window opens on its first request and admits at most `attempts`
/// requests until `window_seconds` have passed, then starts over. Each check
/// runs under the map's shard lock for that key, so concurrent requests from
/// one client cannot under-count.
#[derive(Clone)]
pub struct IpRateLimiter<C = DefaultClock>
where
    C: Clock,
{
    windows: Arc<DashMap<IpAddr, Window<C::Instant>>>,
    clock: C,
    attempts: u32,
    window: Duration,
    ipv6_prefix: u8,
}

impl IpRateLimiter<DefaultClock> {
    pub fn new(attempts: u32, window_seconds: u64) -> Self {
        Self::with_clock(attempts, window_seconds, DefaultClock::default())
    }
}

impl<C> IpRateLimiter<C>
where
    C: Clock,
{
    pub fn with_clock(attempts: u32, window_seconds: u64, clock: C) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            clock,
            attempts: attempts.max(1),
            window: Duration::from_secs(window_seconds.max(1)),
            ipv6_prefix: DEFAULT_IPV6_PREFIX,
        }
    }

    pub fn with_ipv6_prefix(mut self, prefix: u8) -> Self {
        self.ipv6_prefix = prefix.min(128);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    /// Count one request for `ip`. On rejection returns the seconds until its window closes.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let key = normalize_ip(ip, self.ipv6_prefix);
        let now = self.clock.now();
        let mut entry = self
            .windows
            .entry(key)
            .or_insert(Window { start: now, count: 0 });

        let mut elapsed = Duration::from(now.duration_since(entry.start));
        if elapsed >= self.window {
            *entry = Window { start: now, count: 0 };
            elapsed = Duration::ZERO;
        }

        if entry.count < self.attempts {
            entry.count += 1;
            return Ok(());
        }

        let wait = self.window - elapsed;
        // Round up so clients never retry a moment too early.
        Err(wait.as_secs() + u64::from(wait.subsec_nanos() > 0))
    }

    /// Drop keys whose window has fully elapsed.
    pub fn retain_recent(&self) {
        let now = self.clock.now();
        self.windows
            .retain(|_, w| Duration::from(now.duration_since(w.start)) < self.window);
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Canonical rate-limit key for an address.
///
/// IPv4-mapped IPv6 (`::ffff:a.b.c.d`) collapses to plain IPv4 and native IPv6
/// is truncated to `ipv6_prefix` bits.
pub fn normalize_ip(ip: IpAddr, ipv6_prefix: u8) -> IpAddr {
    match ip.to_canonical() {
        IpAddr::V4(v4) => IpAddr::V4(v4),
        IpAddr::V6(v6) => {
            let prefix = u32::from(ipv6_prefix.min(128));
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

/// Best-effort client address: the rightmost `X-Forwarded-For` hop when trusted,
/// then the socket peer.
///
/// The rightmost hop is the one appended by the proxy in front of us; anything
/// to its left is client-supplied.
pub fn client_ip(
    headers: &HeaderMap,
    extensions: &Extensions,
    trust_forwarded_for: bool,
) -> Option<IpAddr> {
    let forwarded_ip = trust_forwarded_for
        .then(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.rsplit(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .flatten();

    forwarded_ip.or_else(|| {
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

//! Outbound identity rotation.
//!
//! An identity is the user-agent string plus the optional proxy a request
//! leaves through. Rotating picks a fresh random user agent and advances to
//! the next proxy in the configured pool.

use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Browser user agents to rotate through.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Pick a user agent uniformly at random.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// The identity a request is sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Identity {
    /// A random user agent and no proxy.
    pub fn fresh() -> Self {
        Self {
            user_agent: random_user_agent().to_string(),
            proxy: None,
        }
    }
}

/// Shared, rotatable identity for the primary search source.
#[derive(Debug)]
pub struct IdentityRotator {
    proxies: Vec<String>,
    state: Mutex<RotatorState>,
    rotations: AtomicU64,
}

#[derive(Debug)]
struct RotatorState {
    identity: Identity,
    next_proxy: usize,
}

impl IdentityRotator {
    /// Create a rotator over the given proxy pool (may be empty).
    pub fn new(proxies: Vec<String>) -> Self {
        let proxy = proxies.first().cloned();
        let next_proxy = usize::from(!proxies.is_empty());
        Self {
            proxies,
            state: Mutex::new(RotatorState {
                identity: Identity {
                    user_agent: random_user_agent().to_string(),
                    proxy,
                },
                next_proxy,
            }),
            rotations: AtomicU64::new(0),
        }
    }

    /// The identity requests should use right now.
    pub fn current(&self) -> Identity {
        match self.state.lock() {
            Ok(state) => state.identity.clone(),
            Err(poisoned) => poisoned.into_inner().identity.clone(),
        }
    }

    /// Switch to a new user agent and, if a pool is configured, the next proxy.
    pub fn rotate(&self) -> Identity {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        state.identity.user_agent = random_user_agent().to_string();
        if self.proxies.is_empty() {
            debug!("No proxy pool configured, rotating user agent only");
        } else {
            let idx = state.next_proxy % self.proxies.len();
            state.identity.proxy = Some(self.proxies[idx].clone());
            state.next_proxy = idx + 1;
        }

        let count = self.rotations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            rotation = count,
            proxy = state.identity.proxy.as_deref().unwrap_or("direct"),
            "Rotated outbound identity"
        );
        state.identity.clone()
    }

    /// How many times [`rotate`](Self::rotate) has run.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

use std::time::Duration;

const DEFAULT_QUEUE_CAPACITY: usize = 1;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// What to do with an operation fired while another one is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Wait in FIFO order, up to the configured queue capacity.
    #[default]
    Queue,
    Reject,
}

impl ConcurrencyPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queue" => Some(ConcurrencyPolicy::Queue),
            "reject" => Some(ConcurrencyPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub policy: ConcurrencyPolicy,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
    /// Development switch that lets a page's `use_mock` take effect.
    pub use_mock: bool,
    pub mock_delay: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            policy: ConcurrencyPolicy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            use_mock: false,
            mock_delay: Duration::ZERO,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let policy = lookup("CONFIG_PAGE_POLICY")
            .and_then(|raw| ConcurrencyPolicy::parse(&raw))
            .unwrap_or(defaults.policy);

        let queue_capacity = lookup("CONFIG_PAGE_QUEUE_CAP")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.queue_capacity);

        let request_timeout = lookup("CONFIG_PAGE_REQUEST_TIMEOUT_MS")
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        let use_mock = lookup("CONFIG_PAGE_USE_MOCK")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(defaults.use_mock);

        let mock_delay = lookup("CONFIG_PAGE_MOCK_DELAY_MS")
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.mock_delay);

        Self {
            policy,
            queue_capacity,
            request_timeout,
            use_mock,
            mock_delay,
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

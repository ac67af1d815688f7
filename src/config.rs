//! # Engine Configuration
//!
//! Environment-driven defaults for [`EngineBuilder`](crate::engine::EngineBuilder).
//! Explicit builder calls always win over what is loaded here.
//!
//! ## Environment Variables
//!
//! ### `RETROWIRE_VALIDATE_EAGERLY`
//!
//! `true` compiles every method of a service when it is created instead of on first
//! use, so definition errors surface immediately. Default: `false`.
//!
//! ### `RETROWIRE_CALLBACK_STACK_SIZE`
//!
//! Stack size of the callback worker coroutine. Accepts decimal (`65536`) or
//! hexadecimal (`0x10000`). Default: `0x10000` (64 KB).
//!
//! ### `RETROWIRE_CALL_TIMEOUT_MS`
//!
//! Whole-call timeout for the default transport. `0` disables it. Default: `10000`.
//!
//! ```rust
//! use retrowire::config::EngineConfig;
//!
//! let config = EngineConfig::from_env();
//! println!("Callback stack: {} bytes", config.callback_stack_size);
//! ```

use std::env;
use std::time::Duration;

const DEFAULT_STACK_SIZE: usize = 0x10000;
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Compile all methods at service creation
    pub validate_eagerly: bool,
    /// Stack size for the callback worker coroutine in bytes
    pub callback_stack_size: usize,
    /// Timeout for the default transport; `None` disables it
    pub call_timeout: Option<Duration>,
}

fn parse_size(value: &str) -> Option<usize> {
    match value.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_timeout_ms(value: &str) -> Option<Option<Duration>> {
    let millis: u64 = value.parse().ok()?;
    Some((millis > 0).then(|| Duration::from_millis(millis)))
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let validate_eagerly = env::var("RETROWIRE_VALIDATE_EAGERLY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false);

        let callback_stack_size = env::var("RETROWIRE_CALLBACK_STACK_SIZE")
            .ok()
            .and_then(|s| parse_size(&s))
            .unwrap_or(DEFAULT_STACK_SIZE);

        let call_timeout = env::var("RETROWIRE_CALL_TIMEOUT_MS")
            .ok()
            .and_then(|s| parse_timeout_ms(&s))
            .unwrap_or(Some(Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)));

        Self {
            validate_eagerly,
            callback_stack_size,
            call_timeout,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_eagerly: false,
            callback_stack_size: DEFAULT_STACK_SIZE,
            call_timeout: Some(Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_accepts_hex_and_decimal() {
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("32768"), Some(32768));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_zero_timeout_disables_it() {
        assert_eq!(parse_timeout_ms("0"), Some(None));
        assert_eq!(
            parse_timeout_ms("250"),
            Some(Some(Duration::from_millis(250)))
        );
        assert_eq!(parse_timeout_ms("soon"), None);
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.validate_eagerly);
        assert_eq!(config.callback_stack_size, 0x10000);
        assert_eq!(config.call_timeout, Some(Duration::from_secs(10)));
    }
}

//! Runtime configuration sourced from the process environment.
//!
//! The bot has no command-line surface: all control happens through
//! environment variables, each optional with a built-in default.
//!
//! # Environment Variables
//!
//! ```bash
//! # Session identifier; the X-KING- prefix names a remotely hosted bundle
//! export SESSION_ID="X-KING-u2oknAjC"
//!
//! # Enable/disable status watching
//! export AUTO_STATUS=true
//!
//! # Auto-read status updates
//! export AUTO_READ_STATUS=true
//!
//! # Auto-like status updates
//! export AUTO_LIKE_STATUS=false
//!
//! # Emoji for auto-like
//! export AUTO_LIKE_EMOJI="✨"
//! ```
//!
//! Logging verbosity is controlled separately through `RUST_LOG`.

use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};

/// Default directory holding the durable session state.
pub const DEFAULT_SESSION_DIR: &str = "./session";

/// Runtime configuration for the bot.
///
/// Values come from the process environment merged over the built-in
/// defaults; see the [module documentation](self) for the variable names.
/// The configuration is read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session identifier.
    ///
    /// Values carrying the recognized prefix name a remotely hosted
    /// credential bundle to fetch at startup; anything else means local
    /// storage is used as-is.
    pub session_id: String,

    /// Whether status broadcasts are watched at all.
    pub auto_status: bool,

    /// Mark each status broadcast as read.
    pub auto_read_status: bool,

    /// React to each status broadcast.
    pub auto_like_status: bool,

    /// Emoji used when reacting to a status broadcast.
    pub auto_like_emoji: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            session_id: "X-KING-u2oknAjC".to_string(),
            auto_status: true,
            auto_read_status: true,
            auto_like_status: false,
            auto_like_emoji: "✨".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from the process environment.
    ///
    /// Unset variables keep their defaults. Boolean variables expect `true`
    /// or `false`.
    ///
    /// # Errors
    ///
    /// Returns an error when a variable is set to a value that cannot be
    /// parsed as the expected type.
    pub fn from_env() -> Result<Config, figment::Error> {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::raw().only(&[
                "session_id",
                "auto_status",
                "auto_read_status",
                "auto_like_status",
                "auto_like_emoji",
            ]))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_environment() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::from_env()?;

            assert_eq!(config.session_id, "X-KING-u2oknAjC");
            assert!(config.auto_status);
            assert!(config.auto_read_status);
            assert!(!config.auto_like_status);
            assert_eq!(config.auto_like_emoji, "✨");
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SESSION_ID", "X-KING-abc123");
            jail.set_env("AUTO_STATUS", "false");
            jail.set_env("AUTO_READ_STATUS", "false");
            jail.set_env("AUTO_LIKE_STATUS", "true");
            jail.set_env("AUTO_LIKE_EMOJI", "🔥");

            let config = Config::from_env()?;

            assert_eq!(config.session_id, "X-KING-abc123");
            assert!(!config.auto_status);
            assert!(!config.auto_read_status);
            assert!(config.auto_like_status);
            assert_eq!(config.auto_like_emoji, "🔥");
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_partial_overrides_keep_remaining_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AUTO_READ_STATUS", "false");

            let config = Config::from_env()?;

            assert_eq!(config.session_id, "X-KING-u2oknAjC");
            assert!(config.auto_status);
            assert!(!config.auto_read_status);
            assert!(!config.auto_like_status);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_invalid_boolean_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("AUTO_STATUS", "maybe");

            assert!(Config::from_env().is_err());
            Ok(())
        });
    }
}

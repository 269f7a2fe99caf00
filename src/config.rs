//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so `parley` runs with no configuration at
//! all. A `.env` file in the working directory is honoured.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the assistant API.
    /// Env: `PARLEY_API_URL`
    pub api_base_url: String,

    /// SQLite file holding conversation history.
    /// Env: `PARLEY_DB_PATH`
    /// Default: `$HOME/.parley/parley.db`
    pub db_path: PathBuf,

    /// Run user input through the correction service before sending.
    /// Env: `PARLEY_SPELL_CHECK` (true/false)
    pub spell_check: bool,

    /// Env: `PARLEY_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    /// Simulated typing delay before a bot reply, drawn uniformly from this range.
    /// Env: `PARLEY_REPLY_DELAY_MS` as `min-max` or a single value.
    pub reply_delay_min: Duration,
    pub reply_delay_max: Duration,

    /// Pause after showing a spelling correction.
    /// Env: `PARLEY_CORRECTION_PAUSE_MS`
    pub correction_pause: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            api_base_url: "https://new-folder-2-lime.vercel.app".to_string(),
            db_path: PathBuf::from(home_dir).join(".parley").join("parley.db"),
            spell_check: true,
            request_timeout: Duration::from_secs(30),
            reply_delay_min: Duration::from_millis(1000),
            reply_delay_max: Duration::from_millis(2000),
            correction_pause: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PARLEY_API_URL") {
            if !url.trim().is_empty() {
                config.api_base_url = url.trim().to_string();
            }
        }

        if let Ok(path) = std::env::var("PARLEY_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(val) = std::env::var("PARLEY_SPELL_CHECK") {
            config.spell_check = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("PARLEY_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PARLEY_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        if let Ok(val) = std::env::var("PARLEY_REPLY_DELAY_MS") {
            match parse_delay_range(&val) {
                Ok((min, max)) => {
                    config.reply_delay_min = min;
                    config.reply_delay_max = max;
                }
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "Invalid PARLEY_REPLY_DELAY_MS, using default")
                }
            }
        }

        if let Ok(val) = std::env::var("PARLEY_CORRECTION_PAUSE_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.correction_pause = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %val, "Invalid PARLEY_CORRECTION_PAUSE_MS, using default"),
            }
        }

        config
    }

    /// No artificial delays.
    #[cfg(test)]
    pub fn without_delays(mut self) -> Self {
        self.reply_delay_min = Duration::ZERO;
        self.reply_delay_max = Duration::ZERO;
        self.correction_pause = Duration::ZERO;
        self
    }

    /// A random delay within the configured reply range.
    pub fn reply_delay(&self) -> Duration {
        let min = self.reply_delay_min.as_millis() as u64;
        let max = self.reply_delay_max.as_millis() as u64;
        if max <= min {
            return self.reply_delay_min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Parse `"1000-2000"` or `"1500"` into a millisecond range.
fn parse_delay_range(value: &str) -> Result<(Duration, Duration), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<u64>()
            .map_err(|_| format!("not a number of milliseconds: {:?}", s.trim()))
    };

    let (min, max) = match value.split_once('-') {
        Some((lo, hi)) => (parse(lo)?, parse(hi)?),
        None => {
            let single = parse(value)?;
            (single, single)
        }
    };

    if min > max {
        return Err(format!("range start {} is after end {}", min, max));
    }
    Ok((Duration::from_millis(min), Duration::from_millis(max)))
}

//! Process-wide configuration for the desk.
//!
//! Precedence mirrors the deployment story: environment variables override
//! the persisted snapshot, which overrides the built-in defaults. The
//! snapshot lives in the same sled tree as the tickets so administrative
//! changes made with `setrole`/`setfee` survive a restart.

use std::env;

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Config {
    /// Reference-currency exchange rate (INR per USD).
    #[n(0)]
    pub usd_to_inr: f64,
    /// Flat fee applied at or below the threshold, in INR.
    #[n(1)]
    pub fixed_fee_inr: f64,
    /// Percentage fee applied above the threshold.
    #[n(2)]
    pub percent_fee: f64,
    #[n(3)]
    pub middleman_role: Option<String>,
    #[n(4)]
    pub ticket_category: Option<String>,
    #[n(5)]
    pub log_channel: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            usd_to_inr: 83.0,
            fixed_fee_inr: 5.0,
            percent_fee: 1.0,
            middleman_role: None,
            ticket_category: None,
            log_channel: None,
        }
    }
}

impl Config {
    /// Defaults layered with whatever the environment provides.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides on top of `self`, loading a
    /// `.env` file first when one is present.
    pub fn with_env_overrides(mut self) -> Self {
        dotenvy::dotenv().ok();
        if let Some(rate) = env_f64("USD_TO_INR") {
            self.usd_to_inr = rate;
        }
        if let Some(fixed) = env_f64("FIXED_FEE_INR") {
            self.fixed_fee_inr = fixed;
        }
        if let Some(pct) = env_f64("PERCENT_FEE") {
            self.percent_fee = pct;
        }
        if let Ok(role) = env::var("MIDDLEMAN_ROLE_ID") {
            self.middleman_role = Some(role);
        }
        if let Ok(category) = env::var("TICKET_CATEGORY_ID") {
            self.ticket_category = Some(category);
        }
        if let Ok(channel) = env::var("LOG_CHANNEL_ID") {
            self.log_channel = Some(channel);
        }
        self
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

//! Middleman fee policy.
//!
//! Pure and total over its valid domain: callers reject non-positive or
//! non-finite amounts before invoking [`compute_fee`], so there is no error
//! path here. Same inputs always produce the same quote, which lets the
//! fee notice be re-displayed any number of times.

use super::config::Config;
use super::ticket::DealMode;

/// Reference-currency threshold below which the flat fee applies.
const THRESHOLD_USD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct FeeQuote {
    /// User-facing rendering of the fee.
    pub text: String,
    /// The fee normalized into INR, the reference comparison unit.
    pub value_inr: f64,
}

/// Compute the fee for an agreed amount. `amount` is in the unit implied by
/// the deal mode: INR for [`DealMode::Inr`], USD for [`DealMode::Crypto`].
pub fn compute_fee(cfg: &Config, amount: f64, mode: DealMode, coin: Option<&str>) -> FeeQuote {
    match mode {
        DealMode::Inr => {
            let threshold_inr = THRESHOLD_USD * cfg.usd_to_inr;
            if amount <= threshold_inr {
                return FeeQuote {
                    text: format!("₹{}", render(cfg.fixed_fee_inr)),
                    value_inr: cfg.fixed_fee_inr,
                };
            }
            let fee = (amount * cfg.percent_fee / 100.0).round();
            FeeQuote {
                text: format!("₹{} ({}%)", render(fee), render(cfg.percent_fee)),
                value_inr: fee,
            }
        }
        DealMode::Crypto => {
            if amount <= THRESHOLD_USD {
                return FeeQuote {
                    text: format!(
                        "₹{} worth of {}",
                        render(cfg.fixed_fee_inr),
                        coin.unwrap_or("crypto")
                    ),
                    value_inr: cfg.fixed_fee_inr,
                };
            }
            let fee_usd = amount * cfg.percent_fee / 100.0;
            let fee_inr = (fee_usd * cfg.usd_to_inr).round();
            FeeQuote {
                text: format!("{}% (~₹{})", render(cfg.percent_fee), render(fee_inr)),
                value_inr: fee_inr,
            }
        }
    }
}

// integral values render without a decimal point
fn render(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inr_at_or_below_threshold_charges_the_fixed_fee() {
        let cfg = Config::default(); // rate 83 => threshold 4150

        let quote = compute_fee(&cfg, 4000.0, DealMode::Inr, None);
        assert_eq!(quote.text, "₹5");
        assert_eq!(quote.value_inr, 5.0);

        // boundary is inclusive
        let quote = compute_fee(&cfg, 4150.0, DealMode::Inr, None);
        assert_eq!(quote.value_inr, 5.0);
    }

    #[test]
    fn inr_above_threshold_charges_the_percentage() {
        let cfg = Config::default();

        let quote = compute_fee(&cfg, 10_000.0, DealMode::Inr, None);
        assert_eq!(quote.text, "₹100 (1%)");
        assert_eq!(quote.value_inr, 100.0);
    }

    #[test]
    fn crypto_below_threshold_is_rendered_in_coin() {
        let cfg = Config::default();

        let quote = compute_fee(&cfg, 30.0, DealMode::Crypto, Some("BTC"));
        assert_eq!(quote.text, "₹5 worth of BTC");
        assert_eq!(quote.value_inr, 5.0);

        let quote = compute_fee(&cfg, 30.0, DealMode::Crypto, None);
        assert_eq!(quote.text, "₹5 worth of crypto");
    }

    #[test]
    fn crypto_above_threshold_converts_to_local_currency() {
        let cfg = Config::default();

        // 200 USD * 1% = 2 USD -> 166 INR
        let quote = compute_fee(&cfg, 200.0, DealMode::Crypto, Some("ETH"));
        assert_eq!(quote.text, "1% (~₹166)");
        assert_eq!(quote.value_inr, 166.0);
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        let cfg = Config::default();

        // 4250 * 1% = 42.5, must round deterministically up
        let quote = compute_fee(&cfg, 4250.0, DealMode::Inr, None);
        assert_eq!(quote.value_inr, 43.0);
    }

    #[test]
    fn fractional_percentages_render_as_written() {
        let cfg = Config {
            percent_fee: 1.5,
            ..Config::default()
        };

        let quote = compute_fee(&cfg, 10_000.0, DealMode::Inr, None);
        assert_eq!(quote.text, "₹150 (1.5%)");
    }
}

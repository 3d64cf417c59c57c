/// Processing fee calculation
///
/// Fees are charged on top of the contribution amount so the payee
/// always receives the full pooled contribution. All knobs live in
/// [`FeeConfig`]; nothing here is hard-coded.
use rust_decimal::{Decimal, RoundingStrategy};

use susu_shared::config::FeeConfig;

/// Computes the processing fee for one collection attempt
///
/// The base fee is `rate × amount + surcharge`, capped at `cap`. Retry
/// attempts (`retry_count >= 1`) add `retry_surcharge` on top of the
/// capped base, covering the extra provider round trips. The result is
/// rounded to cents, half away from zero.
pub fn calculate_fee(config: &FeeConfig, amount: Decimal, retry_count: i32) -> Decimal {
    let base = config.rate * amount + config.surcharge;
    let mut fee = base.min(config.cap);

    if retry_count >= 1 {
        fee += config.retry_surcharge;
    }

    fee.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> FeeConfig {
        FeeConfig {
            rate: dec!(0.008),
            surcharge: dec!(0.50),
            cap: dec!(5.00),
            retry_surcharge: dec!(0.25),
        }
    }

    #[test]
    fn test_base_fee() {
        // 0.008 * 100 + 0.50 = 1.30
        assert_eq!(calculate_fee(&config(), dec!(100.00), 0), dec!(1.30));
    }

    #[test]
    fn test_fee_is_capped() {
        // 0.008 * 1000 + 0.50 = 8.50, capped at 5.00
        assert_eq!(calculate_fee(&config(), dec!(1000.00), 0), dec!(5.00));
    }

    #[test]
    fn test_retry_surcharge_applies_once() {
        // Capped base plus one flat surcharge regardless of attempt count
        assert_eq!(calculate_fee(&config(), dec!(1000.00), 1), dec!(5.25));
        assert_eq!(calculate_fee(&config(), dec!(1000.00), 3), dec!(5.25));
    }

    #[test]
    fn test_rounding_to_cents() {
        // 0.008 * 33.33 + 0.50 = 0.76664 → 0.77
        assert_eq!(calculate_fee(&config(), dec!(33.33), 0), dec!(0.77));
    }

    #[test]
    fn test_zero_amount_still_pays_surcharge() {
        assert_eq!(calculate_fee(&config(), dec!(0.00), 0), dec!(0.50));
    }
}

use crate::models::{OrderError, PriceBreakdown, PricedLine, ShippingMethod};

pub const FREE_SHIPPING_THRESHOLD_CENTS: i64 = 7500;
pub const STANDARD_SHIPPING_CENTS: i64 = 599;
pub const EXPEDITED_SHIPPING_CENTS: i64 = 1999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoCode {
    /// 10% off the subtotal.
    Welcome10,
    /// 2000 cents off orders of at least 10000.
    Save20,
    FreeShipping,
}

impl PromoCode {
    /// Codes are matched case-insensitively after trimming.
    pub fn parse(code: &str) -> Result<Self, OrderError> {
        match code.trim().to_ascii_uppercase().as_str() {
            "WELCOME10" => Ok(PromoCode::Welcome10),
            "SAVE20" => Ok(PromoCode::Save20),
            "FREESHIP" => Ok(PromoCode::FreeShipping),
            _ => Err(OrderError::UnknownPromoCode(code.trim().to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PromoCode::Welcome10 => "WELCOME10",
            PromoCode::Save20 => "SAVE20",
            PromoCode::FreeShipping => "FREESHIP",
        }
    }

    fn discount_on(&self, subtotal_cents: i64) -> i64 {
        let discount = match self {
            PromoCode::Welcome10 => percent_of(subtotal_cents, 10),
            PromoCode::Save20 if subtotal_cents >= 10_000 => 2_000,
            PromoCode::Save20 | PromoCode::FreeShipping => 0,
        };
        discount.min(subtotal_cents)
    }
}

/// Pure price arithmetic over integer cents.
#[derive(Debug, Clone, Copy)]
pub struct CheckoutCalculator {
    tax_rate_bps: u32,
}

impl CheckoutCalculator {
    pub fn new(tax_rate_bps: u32) -> Self {
        Self { tax_rate_bps }
    }

    pub fn price(
        &self,
        lines: Vec<PricedLine>,
        promo_code: Option<&str>,
        shipping_method: ShippingMethod,
    ) -> Result<PriceBreakdown, OrderError> {
        let promo = match promo_code.map(str::trim).filter(|code| !code.is_empty()) {
            Some(code) => Some(PromoCode::parse(code)?),
            None => None,
        };

        let subtotal_cents: i64 = lines.iter().map(|line| line.line_total_cents).sum();
        let discount_cents = promo.map_or(0, |p| p.discount_on(subtotal_cents));
        let discounted = subtotal_cents - discount_cents;

        let shipping_cents = if promo == Some(PromoCode::FreeShipping) {
            0
        } else {
            shipping_for(shipping_method, discounted)
        };
        let tax_cents = self.tax_on(discounted);

        Ok(PriceBreakdown {
            lines,
            promo_code: promo.map(|p| p.as_str().to_string()),
            shipping_method,
            subtotal_cents,
            discount_cents,
            shipping_cents,
            tax_cents,
            total_cents: discounted + shipping_cents + tax_cents,
        })
    }

    pub fn tax_on(&self, taxable_cents: i64) -> i64 {
        round_half_up(taxable_cents * i64::from(self.tax_rate_bps), 10_000)
    }
}

pub fn shipping_for(method: ShippingMethod, discounted_subtotal_cents: i64) -> i64 {
    match method {
        ShippingMethod::Standard if discounted_subtotal_cents >= FREE_SHIPPING_THRESHOLD_CENTS => 0,
        ShippingMethod::Standard => STANDARD_SHIPPING_CENTS,
        ShippingMethod::Expedited => EXPEDITED_SHIPPING_CENTS,
    }
}

fn percent_of(amount: i64, percent: i64) -> i64 {
    round_half_up(amount * percent, 100)
}

// Inputs are never negative here.
fn round_half_up(numerator: i64, denominator: i64) -> i64 {
    (numerator + denominator / 2) / denominator
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use uuid::Uuid;

    fn line(unit_price_cents: i64, quantity: i32) -> PricedLine {
        PricedLine {
            inventory_id: Uuid::new_v4(),
            name: "Item".to_string(),
            quantity,
            unit_price_cents,
            line_total_cents: unit_price_cents * i64::from(quantity),
        }
    }

    #[test]
    fn small_order_pays_standard_shipping() {
        let quote = CheckoutCalculator::new(0)
            .price(vec![line(2500, 2)], None, ShippingMethod::Standard)
            .unwrap();

        assert_eq!(quote.subtotal_cents, 5000);
        assert_eq!(quote.shipping_cents, 599);
        assert_eq!(quote.total_cents, 5599);
    }

    #[test]
    fn free_standard_shipping_uses_discounted_subtotal() {
        let calc = CheckoutCalculator::new(0);

        let quote = calc.price(vec![line(7500, 1)], None, ShippingMethod::Standard).unwrap();
        assert_eq!(quote.shipping_cents, 0);

        // 8000 - 800 = 7200, below the threshold again
        let quote = calc
            .price(vec![line(8000, 1)], Some("WELCOME10"), ShippingMethod::Standard)
            .unwrap();
        assert_eq!(quote.discount_cents, 800);
        assert_eq!(quote.shipping_cents, 599);
        assert_eq!(quote.total_cents, 7200 + 599);
    }

    #[test]
    fn expedited_is_never_free_without_promo() {
        let quote = CheckoutCalculator::new(0)
            .price(vec![line(20_000, 1)], None, ShippingMethod::Expedited)
            .unwrap();
        assert_eq!(quote.shipping_cents, 1999);
    }

    #[test]
    fn save20_needs_minimum_subtotal() {
        let calc = CheckoutCalculator::new(0);

        let below = calc.price(vec![line(9999, 1)], Some("SAVE20"), ShippingMethod::Standard).unwrap();
        assert_eq!(below.discount_cents, 0);

        let at = calc.price(vec![line(10_000, 1)], Some("save20"), ShippingMethod::Standard).unwrap();
        assert_eq!(at.discount_cents, 2000);
        assert_eq!(at.promo_code.as_deref(), Some("SAVE20"));
    }

    #[test]
    fn freeship_waives_any_method() {
        let quote = CheckoutCalculator::new(0)
            .price(vec![line(1000, 1)], Some("FREESHIP"), ShippingMethod::Expedited)
            .unwrap();
        assert_eq!(quote.discount_cents, 0);
        assert_eq!(quote.shipping_cents, 0);
        assert_eq!(quote.total_cents, 1000);
    }

    #[test]
    fn tax_rounds_half_up_on_discounted_subtotal() {
        // 8.25% of 4500 = 371.25 -> 371
        let calc = CheckoutCalculator::new(825);
        assert_eq!(calc.tax_on(4500), 371);
        // 5% of 1010 = 50.5 -> 51
        assert_eq!(CheckoutCalculator::new(500).tax_on(1010), 51);

        let quote = calc
            .price(vec![line(5000, 1)], Some("WELCOME10"), ShippingMethod::Standard)
            .unwrap();
        assert_eq!(quote.tax_cents, 371);
        assert_eq!(
            quote.total_cents,
            quote.subtotal_cents - quote.discount_cents + quote.shipping_cents + quote.tax_cents
        );
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_matches!(
            CheckoutCalculator::new(0).price(vec![line(1000, 1)], Some("BOGUS"), ShippingMethod::Standard),
            Err(OrderError::UnknownPromoCode(code)) if code == "BOGUS"
        );
    }

    #[test]
    fn blank_code_means_no_promo() {
        let quote = CheckoutCalculator::new(0)
            .price(vec![line(1000, 1)], Some("  "), ShippingMethod::Standard)
            .unwrap();
        assert_eq!(quote.promo_code, None);
    }

    #[test]
    fn discount_never_exceeds_subtotal() {
        assert_eq!(PromoCode::Welcome10.discount_on(0), 0);
        assert_eq!(PromoCode::Save20.discount_on(10_000), 2000);
    }
}

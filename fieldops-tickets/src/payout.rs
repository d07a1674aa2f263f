//! Pure payout computation. No I/O, no clock, no randomness.

/// Rounds half up to the nearest whole minor unit (money is tracked in
/// integer minor units already, so this only matters for percent math that
/// divides by 10 000 before rounding back down).
fn round_half_up(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0);
    let doubled = numerator * 2 + denominator;
    (doubled / (denominator * 2)) as i64
}

#[must_use]
pub fn apply_percent_half_up(amount_minor: i64, percent_hundredths: i32) -> i64 {
    round_half_up(amount_minor as i128 * percent_hundredths as i128, 10_000).max(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutInputs {
    pub revenue_minor: i64,
    pub expense_minor: i64,
    pub executor_percent_hundredths: i32,
    pub admin_percent_hundredths: i32,
    pub junior_percent_hundredths: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayoutOutputs {
    pub net_profit_minor: i64,
    pub executor_earned_minor: i64,
    pub admin_earned_minor: i64,
    pub junior_earned_minor: i64,
    pub project_take_minor: i64,
}

/// Computes C4's payout split. Returns `None` (INVALID) if any output would
/// be negative or if the four shares do not sum exactly to `net_profit`.
#[must_use]
pub fn calculate_payout(inputs: PayoutInputs) -> Option<PayoutOutputs> {
    if inputs.revenue_minor < 0 || inputs.expense_minor < 0 {
        return None;
    }

    let net_profit_minor = (inputs.revenue_minor - inputs.expense_minor).max(0);

    let executor_earned_minor =
        apply_percent_half_up(net_profit_minor, inputs.executor_percent_hundredths);
    let admin_earned_minor =
        apply_percent_half_up(net_profit_minor, inputs.admin_percent_hundredths);
    let junior_earned_minor =
        apply_percent_half_up(net_profit_minor, inputs.junior_percent_hundredths);

    let allocated = executor_earned_minor + admin_earned_minor + junior_earned_minor;
    let project_take_minor = net_profit_minor - allocated;

    if project_take_minor < 0 {
        return None;
    }

    let outputs = PayoutOutputs {
        net_profit_minor,
        executor_earned_minor,
        admin_earned_minor,
        junior_earned_minor,
        project_take_minor,
    };

    let sum = outputs.executor_earned_minor
        + outputs.admin_earned_minor
        + outputs.junior_earned_minor
        + outputs.project_take_minor;
    if sum != outputs.net_profit_minor {
        return None;
    }

    Some(outputs)
}

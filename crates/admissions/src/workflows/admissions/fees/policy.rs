use serde::{Deserialize, Serialize};

/// Basis points in one whole (100%).
pub const WHOLE_BPS: u32 = 10_000;

/// One share of the split installment schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentShare {
    pub percentage_bps: u32,
    pub due_in_days: i64,
}

/// Rates and due-date offsets used when billing a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub deposit_rate_bps: u32,
    pub application_fee_due_days: i64,
    pub deposit_due_days: i64,
    pub full_payment_due_days: i64,
    pub split_schedule: Vec<InstallmentShare>,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            deposit_rate_bps: 1_500,
            application_fee_due_days: 7,
            deposit_due_days: 14,
            full_payment_due_days: 30,
            split_schedule: vec![
                InstallmentShare {
                    percentage_bps: 4_000,
                    due_in_days: 7,
                },
                InstallmentShare {
                    percentage_bps: 3_000,
                    due_in_days: 120,
                },
                InstallmentShare {
                    percentage_bps: 3_000,
                    due_in_days: 240,
                },
            ],
        }
    }
}

impl FeePolicy {
    pub fn validate(&self) -> Result<(), FeePolicyError> {
        if self.deposit_rate_bps > WHOLE_BPS {
            return Err(FeePolicyError::DepositRate(self.deposit_rate_bps));
        }
        if self.split_schedule.is_empty() {
            return Err(FeePolicyError::EmptySchedule);
        }
        if self.split_schedule.len() > usize::from(u8::MAX) {
            return Err(FeePolicyError::TooManyInstallments(self.split_schedule.len()));
        }
        let total: u32 = self
            .split_schedule
            .iter()
            .map(|share| share.percentage_bps)
            .sum();
        if total != WHOLE_BPS {
            return Err(FeePolicyError::ScheduleTotal(total));
        }
        let offsets = [
            self.application_fee_due_days,
            self.deposit_due_days,
            self.full_payment_due_days,
        ];
        if offsets
            .into_iter()
            .chain(self.split_schedule.iter().map(|share| share.due_in_days))
            .any(|days| days < 0)
        {
            return Err(FeePolicyError::NegativeOffset);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeePolicyError {
    #[error("deposit rate {0} bps exceeds 100%")]
    DepositRate(u32),
    #[error("split installment schedule is empty")]
    EmptySchedule,
    #[error("split installment schedule has {0} shares")]
    TooManyInstallments(usize),
    #[error("split installment shares add up to {0} bps instead of 10000")]
    ScheduleTotal(u32),
    #[error("due-date offsets must not be negative")]
    NegativeOffset,
}

/// `amount * bps / 10000`, rounded half up to the whole currency unit.
pub fn share_of(amount: u64, bps: u32) -> u64 {
    let scaled = u128::from(amount) * u128::from(bps) + u128::from(WHOLE_BPS / 2);
    let share = scaled / u128::from(WHOLE_BPS);
    u64::try_from(share).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert_eq!(FeePolicy::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_schedule_that_does_not_cover_the_total() {
        let mut policy = FeePolicy::default();
        policy.split_schedule[2].percentage_bps = 2_500;
        assert_eq!(policy.validate(), Err(FeePolicyError::ScheduleTotal(9_500)));
    }

    #[test]
    fn share_rounds_half_up() {
        assert_eq!(share_of(11_500, 1_500), 1_725);
        assert_eq!(share_of(1, 4_000), 0);
        assert_eq!(share_of(5, 1_000), 1);
        assert_eq!(share_of(3, 3_000), 1);
    }
}

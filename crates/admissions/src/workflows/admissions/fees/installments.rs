use chrono::{Duration, NaiveDate};

use super::policy::{share_of, FeePolicy, WHOLE_BPS};
use crate::workflows::admissions::domain::{Installment, InstallmentChoice, InstallmentPlan};

/// Spread `total` over the schedule selected by `choice`, starting from `today`.
///
/// Every share but the last is rounded independently; the last one takes whatever is left
/// so the installments always add up to `total`.
pub fn build_plan(
    total: u64,
    choice: InstallmentChoice,
    policy: &FeePolicy,
    today: NaiveDate,
) -> InstallmentPlan {
    let installments = match choice {
        InstallmentChoice::Full => vec![Installment {
            sequence: 1,
            label: "Annual fee (full payment)".to_string(),
            percentage_bps: WHOLE_BPS,
            amount: total,
            due_date: today + Duration::days(policy.full_payment_due_days),
        }],
        InstallmentChoice::Split => split(total, policy, today),
    };

    InstallmentPlan {
        choice,
        total,
        installments,
    }
}

fn split(total: u64, policy: &FeePolicy, today: NaiveDate) -> Vec<Installment> {
    let count = policy.split_schedule.len();
    let mut allocated = 0u64;

    policy
        .split_schedule
        .iter()
        .enumerate()
        .map(|(position, share)| {
            let amount = if position + 1 == count {
                total.saturating_sub(allocated)
            } else {
                share_of(total, share.percentage_bps).min(total.saturating_sub(allocated))
            };
            allocated += amount;

            let sequence = u8::try_from(position + 1).unwrap_or(u8::MAX);
            Installment {
                sequence,
                label: format!(
                    "Installment {sequence} of {count} ({}%)",
                    format_percentage(share.percentage_bps)
                ),
                percentage_bps: share.percentage_bps,
                amount,
                due_date: today + Duration::days(share.due_in_days),
            }
        })
        .collect()
}

fn format_percentage(bps: u32) -> String {
    if bps % 100 == 0 {
        format!("{}", bps / 100)
    } else {
        format!("{:.2}", f64::from(bps) / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::admissions::fees::policy::InstallmentShare;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 1).expect("valid date")
    }

    fn amounts(plan: &InstallmentPlan) -> Vec<u64> {
        plan.installments.iter().map(|item| item.amount).collect()
    }

    #[test]
    fn split_plan_matches_reference_breakdown() {
        let plan = build_plan(11_500, InstallmentChoice::Split, &FeePolicy::default(), today());

        assert_eq!(amounts(&plan), vec![4_600, 3_450, 3_450]);
        assert_eq!(plan.scheduled_total(), 11_500);
        let due: Vec<NaiveDate> = plan.installments.iter().map(|item| item.due_date).collect();
        assert_eq!(
            due,
            vec![
                today() + Duration::days(7),
                today() + Duration::days(120),
                today() + Duration::days(240),
            ]
        );
        assert_eq!(plan.installments[0].label, "Installment 1 of 3 (40%)");
    }

    #[test]
    fn split_plan_always_sums_to_total() {
        let policy = FeePolicy::default();
        let totals = (0..=250u64).chain([999, 1_001, 12_345, 99_999, 1_000_003]);
        for total in totals {
            let plan = build_plan(total, InstallmentChoice::Split, &policy, today());
            assert_eq!(plan.scheduled_total(), total, "total {total}");
            assert_eq!(plan.installments.len(), 3);
        }
    }

    #[test]
    fn tiny_totals_push_remainder_into_last_installment() {
        let policy = FeePolicy::default();
        assert_eq!(
            amounts(&build_plan(1, InstallmentChoice::Split, &policy, today())),
            vec![0, 0, 1]
        );
        assert_eq!(
            amounts(&build_plan(2, InstallmentChoice::Split, &policy, today())),
            vec![1, 1, 0]
        );
        assert_eq!(
            amounts(&build_plan(15, InstallmentChoice::Split, &policy, today())),
            vec![6, 5, 4]
        );
    }

    #[test]
    fn full_plan_is_single_installment_due_in_thirty_days() {
        let plan = build_plan(11_500, InstallmentChoice::Full, &FeePolicy::default(), today());

        assert_eq!(plan.installments.len(), 1);
        assert_eq!(plan.installments[0].amount, 11_500);
        assert_eq!(plan.installments[0].percentage_bps, WHOLE_BPS);
        assert_eq!(plan.installments[0].due_date, today() + Duration::days(30));
    }

    #[test]
    fn custom_schedule_labels_fractional_shares() {
        let policy = FeePolicy {
            split_schedule: vec![
                InstallmentShare {
                    percentage_bps: 3_333,
                    due_in_days: 0,
                },
                InstallmentShare {
                    percentage_bps: 6_667,
                    due_in_days: 90,
                },
            ],
            ..FeePolicy::default()
        };

        let plan = build_plan(100, InstallmentChoice::Split, &policy, today());
        assert_eq!(amounts(&plan), vec![33, 67]);
        assert_eq!(plan.installments[1].label, "Installment 2 of 2 (66.67%)");
    }
}

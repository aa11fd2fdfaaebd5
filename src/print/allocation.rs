use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;
use uuid::Uuid;

use crate::print::models::{AccountRef, AccountTransaction, Allocation, BillingEntry, Role};

/// key: cost-allocator -> copy-weighted allocation maps
///
/// Walks the billing entries of one document. Student copies always
/// accumulate on the class; they additionally accumulate on the student's
/// own account when the connection charges students directly. Teacher
/// entries carry no class and accumulate on the teacher only.
/// `total_copies` is the weight denominator used for monetary splitting.
pub fn collect(entries: &[BillingEntry], charge_to_students: bool) -> Allocation {
    let mut allocation = Allocation::default();

    for entry in entries {
        let copies = entry.effective_copies();

        if entry.username.trim().is_empty() {
            warn!(copies, "billing entry without username skipped");
            allocation.skipped_copies += copies.max(0);
            continue;
        }
        let Some(role) = Role::parse(&entry.role) else {
            warn!(
                username = %entry.username,
                role = %entry.role,
                "billing entry with unrecognized role skipped"
            );
            allocation.skipped_copies += copies.max(0);
            continue;
        };
        if copies <= 0 {
            warn!(username = %entry.username, "billing entry with zero copies skipped");
            continue;
        }

        match role {
            Role::Student => {
                let class = entry
                    .class
                    .as_deref()
                    .map(str::trim)
                    .filter(|class| !class.is_empty());
                let Some(class) = class else {
                    warn!(username = %entry.username, "student entry without class skipped");
                    allocation.skipped_copies += copies;
                    continue;
                };
                *allocation
                    .class_copies
                    .entry(class.to_string())
                    .or_default() += copies;
                allocation
                    .user_class
                    .insert(entry.username.clone(), class.to_string());
                if charge_to_students {
                    *allocation
                        .user_copies
                        .entry(entry.username.clone())
                        .or_default() += copies;
                }
                allocation.total_copies += copies;
            }
            Role::Teacher => {
                *allocation
                    .user_copies
                    .entry(entry.username.clone())
                    .or_default() += copies;
                allocation.total_copies += copies;
            }
        }
    }

    allocation
}

/// Derives the provisional transactions charged on completion. Weights sum
/// to `total_copies`: personal rows for every charged user, class rows only
/// while students are not charged directly (the class map is comment detail
/// otherwise).
pub fn provisional_transactions(
    allocation: &Allocation,
    charge_to_students: bool,
    shared_parent: &str,
    job_id: Uuid,
) -> Vec<AccountTransaction> {
    let mut transactions = Vec::new();

    for (username, copies) in &allocation.user_copies {
        transactions.push(AccountTransaction {
            id: Uuid::new_v4(),
            weight: *copies,
            amount: Decimal::ZERO,
            balance_after: None,
            account: AccountRef::Personal {
                username: username.clone(),
            },
            job_id,
        });
    }

    if !charge_to_students {
        for (class, copies) in &allocation.class_copies {
            transactions.push(AccountTransaction {
                id: Uuid::new_v4(),
                weight: *copies,
                amount: Decimal::ZERO,
                balance_after: None,
                account: AccountRef::Shared {
                    parent: shared_parent.to_string(),
                    name: class.clone(),
                },
                job_id,
            });
        }
    }

    transactions
}

/// key: cost-distribution -> proportional split of the reported usage cost
///
/// `share = round(cost * weight / total, scale)`, applied as a negative
/// amount per transaction. Shares are rounded independently; a remainder
/// from skipped billing entries is never charged anywhere.
pub fn distribute(cost: Decimal, transactions: &mut [AccountTransaction], scale: u32) {
    let total: i64 = transactions.iter().map(|tx| tx.weight).sum();
    if total <= 0 {
        return;
    }
    let denominator = Decimal::from(total);
    for tx in transactions.iter_mut() {
        let share = (cost * Decimal::from(tx.weight) / denominator)
            .round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
        tx.amount = -share;
    }
}

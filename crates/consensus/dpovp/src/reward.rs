//! Term salaries for DPoVP

use alloy_primitives::{Address, U256};
use dpovp_primitives::DeputyNode;

/// Salary owed to one deputy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeputySalary {
    /// Deputy miner address
    pub miner_address: Address,
    /// Amount, rounded down to the precision
    pub salary: U256,
}

/// Split a term's reward pool among its deputies in proportion to their votes.
///
/// Each salary is `floor(total * votes / total_votes / precision) * precision`. Without any
/// votes the pool is split equally.
pub fn calculate_salaries(
    total: U256,
    deputies: &[DeputyNode],
    precision: U256,
) -> Vec<DeputySalary> {
    let total_votes = deputies.iter().fold(U256::ZERO, |acc, node| acc.saturating_add(node.votes));
    let equal_split = total_votes.is_zero();
    let total_votes = if equal_split { U256::from(deputies.len()) } else { total_votes };

    deputies
        .iter()
        .map(|node| {
            let votes = if equal_split { U256::from(1) } else { node.votes };
            let salary = total.saturating_mul(votes) / total_votes / precision * precision;
            DeputySalary { miner_address: node.miner_address, salary }
        })
        .collect()
}

//! Mining slot schedule.
//!
//! Deputies take turns in rank order. Each one owns a slot of `timeout` milliseconds, and a full
//! round of `deputy_count * timeout` repeats from the parent block's timestamp until somebody
//! mines. The distance from the previous miner to a deputy decides which slot of the round is
//! theirs. At height 1 and at every reward height the deputy set has just changed, so the
//! order restarts from rank 0 regardless of the previous miner.

use crate::{
    constants::MINE_SLOT_SLACK_MS,
    errors::{DpovpError, DpovpResult},
    term::TermRegistry,
};
use alloy_primitives::Address;
use dpovp_primitives::Header;

fn restarts_order(registry: &TermRegistry, height: u64) -> bool {
    height == 1 || registry.config().is_reward_height(height)
}

/// Rank distance from `last_miner` to `target_miner` at `target_height`, in `1..=deputy_count`.
///
/// Mining twice in a row is a full round away, so a miner's distance to itself is the deputy
/// count.
pub fn get_miner_distance(
    registry: &TermRegistry,
    target_height: u64,
    last_miner: &Address,
    target_miner: &Address,
) -> DpovpResult<u64> {
    if target_height == 0 {
        return Err(DpovpError::GenesisHasNoMiner)
    }

    let target = registry
        .get_deputy_by_address(target_height, target_miner)
        .ok_or(DpovpError::NotDeputy(target_height))?;

    if restarts_order(registry, target_height) {
        return Ok(target.rank as u64 + 1)
    }

    let last = registry
        .get_deputy_by_address(target_height, last_miner)
        .ok_or(DpovpError::NotDeputy(target_height))?;
    let count = registry.get_deputies_count(target_height)? as u64;

    let distance = (target.rank as u64 + count - last.rank as u64) % count;
    Ok(if distance == 0 { count } else { distance })
}

/// Next `[from, to)` window, in milliseconds, in which the deputy `distance` slots after the
/// parent's miner may mine.
///
/// If that slot of the current round already passed, the window of the next round is returned.
pub fn get_next_mine_window(
    registry: &TermRegistry,
    next_height: u64,
    distance: u64,
    parent_time_ms: u64,
    now_ms: u64,
    timeout_ms: u64,
) -> DpovpResult<(u64, u64)> {
    let count = registry.get_deputies_count(next_height)? as u64;
    let round = timeout_ms * count;

    let pass = now_ms.saturating_sub(parent_time_ms);
    let pass_rounds = pass / round;

    let mut from = parent_time_ms + pass_rounds * round + (distance - 1) * timeout_ms;
    let mut to = from + timeout_ms;
    if to <= now_ms {
        from += round;
        to += round;
    }
    Ok((from, to))
}

/// Deputy whose slot covers `now_ms` for the block after `parent`.
pub fn get_correct_miner(
    registry: &TermRegistry,
    parent: &Header,
    now_ms: u64,
    timeout_ms: u64,
) -> DpovpResult<Address> {
    let height = parent.height + 1;
    let nodes = registry.get_deputies_by_height(height)?;
    let count = nodes.len() as u64;
    let round = timeout_ms * count;

    let pass = now_ms.saturating_sub(parent.time * 1000);
    let distance = (pass % round) / timeout_ms + 1;

    let rank = if restarts_order(registry, height) {
        distance - 1
    } else {
        let last = registry
            .get_deputy_by_address(height, &parent.miner_address)
            .ok_or(DpovpError::NotDeputy(height))?;
        (last.rank as u64 + distance) % count
    };

    nodes
        .iter()
        .find(|node| node.rank as u64 == rank)
        .map(|node| node.miner_address)
        .ok_or(DpovpError::NotDeputy(height))
}

/// Whether `span_ms` after the parent falls into the slot at `distance`.
///
/// Block timestamps have second granularity, so the slot is widened by
/// [`MINE_SLOT_SLACK_MS`] on both sides, wrapping across round boundaries.
pub fn is_in_mine_slot(span_ms: u64, distance: u64, deputy_count: u64, timeout_ms: u64) -> bool {
    let round = (timeout_ms * deputy_count) as i64;
    let pass = (span_ms % round as u64) as i64;
    let lower = ((distance - 1) * timeout_ms) as i64 - MINE_SLOT_SLACK_MS as i64;
    let upper = (distance * timeout_ms + MINE_SLOT_SLACK_MS) as i64;

    [pass - round, pass, pass + round].into_iter().any(|p| p > lower && p < upper)
}

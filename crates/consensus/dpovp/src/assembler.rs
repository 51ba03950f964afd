//! Block assembly: header preparation, sealing and end-of-block bookkeeping.

use crate::{
    config::DpovpConfig,
    errors::{DpovpError, DpovpResult},
    events::{ConsensusEvent, OutboundHandle},
    external::{AccountState, CandidateLoader, TxExecutor, TxsProduct},
    reward::calculate_salaries,
    signer::NodeSigner,
    term::TermRegistry,
};
use alloy_primitives::{Bytes, B256, U256};
use dpovp_primitives::{change_log_root, deputy_root, tx_root, Block, Header, SignData, Transaction};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Gas limit for a child of `parent_limit`, nudged toward 2/3 utilization.
///
/// Not consensus critical: the limit a miner picks is not checked by other nodes.
pub fn calc_gas_limit(config: &DpovpConfig, parent_limit: u64, parent_used: u64) -> u64 {
    let divisor = config.gas_limit_bound_divisor;
    let contrib = (parent_used + parent_used / 2) / divisor;
    let decay = (parent_limit / divisor).saturating_sub(1);

    let mut limit = parent_limit.saturating_sub(decay) + contrib;
    if limit < config.min_gas_limit {
        limit = config.min_gas_limit;
    }
    if limit < config.target_gas_limit {
        limit = (parent_limit + decay).min(config.target_gas_limit);
    }
    limit
}

/// Builds, executes and seals blocks
#[derive(Debug)]
pub struct BlockAssembler {
    registry: Arc<TermRegistry>,
    signer: Arc<NodeSigner>,
    executor: Arc<dyn TxExecutor>,
    accounts: Arc<dyn AccountState>,
    candidates: Arc<dyn CandidateLoader>,
    outbound: OutboundHandle,
}

impl BlockAssembler {
    /// Create an assembler
    pub fn new(
        registry: Arc<TermRegistry>,
        signer: Arc<NodeSigner>,
        executor: Arc<dyn TxExecutor>,
        accounts: Arc<dyn AccountState>,
        candidates: Arc<dyn CandidateLoader>,
        outbound: OutboundHandle,
    ) -> Self {
        Self { registry, signer, executor, accounts, candidates, outbound }
    }

    fn config(&self) -> &DpovpConfig {
        self.registry.config()
    }

    /// Header of a block this node mines on top of `parent` at unix time `now`.
    pub fn prepare_header(&self, parent: &Header, extra: Bytes, now: u64) -> DpovpResult<Header> {
        let height = parent.height + 1;
        let deputy = self
            .registry
            .get_deputy_by_node_id(height, &self.signer.node_id())
            .ok_or(DpovpError::NotDeputy(height))?;

        let max = self.config().max_extra_len;
        if extra.len() > max {
            return Err(DpovpError::ExtraTooLong { len: extra.len(), max })
        }

        Ok(Header {
            parent_hash: parent.hash(),
            miner_address: deputy.miner_address,
            height,
            gas_limit: calc_gas_limit(self.config(), parent.gas_limit, parent.gas_used),
            time: now.max(parent.time),
            extra,
            ..Default::default()
        })
    }

    /// Fill the executor's roots into `header` and build the block.
    ///
    /// Snapshot blocks additionally embed the top `max_deputy_count` candidates as the next
    /// term's deputies.
    pub fn seal(&self, header: &Header, product: TxsProduct, confirms: Vec<SignData>) -> Block {
        let mut header = header.clone();
        header.version_root = product.version_root;
        header.log_root = product.log_root;
        header.tx_root = tx_root(&product.txs);
        header.change_log_root = change_log_root(&product.change_logs);
        header.gas_used = product.gas_used;

        let deputy_nodes = if self.config().is_snapshot_height(header.height) {
            let mut nodes = self.candidates.load_top_candidates(&header.parent_hash);
            nodes.truncate(self.config().max_deputy_count as usize);
            header.deputy_root = deputy_root(&nodes);
            nodes
        } else {
            header.deputy_root = B256::ZERO;
            Vec::new()
        };

        let mut block = Block::new(header, product.txs, product.change_logs, deputy_nodes);
        block.confirms = confirms;
        block
    }

    /// End-of-block bookkeeping: reward pool check, term salaries, deposit refunds and vote
    /// recount.
    ///
    /// The changes stay pending in the account layer until [`Self::commit`].
    pub fn finalize(&self, height: u64) -> DpovpResult<()> {
        if self.config().is_reward_check_height(height) {
            self.check_term_reward(height);
        }
        if self.config().is_reward_height(height) {
            self.issue_term_reward(height)?;
        }
        self.refund_candidates(height);
        self.update_candidate_votes();
        Ok(())
    }

    /// Save the pending account changes as the state of `block`.
    pub fn commit(&self, block: &Block) -> DpovpResult<()> {
        self.accounts.save(&block.hash())?;
        Ok(())
    }

    /// Re-execute a received block on its parent's state and seal the result.
    ///
    /// Nothing is committed; call [`Self::commit`] once the result is verified.
    ///
    /// # Panics
    ///
    /// Panics on the genesis block, which is never executed.
    pub fn run_block(&self, block: &Block) -> DpovpResult<Block> {
        assert!(block.height() != 0, "genesis block cannot be executed");

        self.accounts.reset(&block.parent_hash());
        let gas_used = self.executor.process(&block.header, &block.txs)?;
        self.finalize(block.height())?;
        let product = self.accounts.txs_product(block.txs.clone(), gas_used);
        Ok(self.seal(&block.header, product, Vec::new()))
    }

    /// Select transactions for `header`, seal and sign the block.
    ///
    /// Returns the block and the transactions rejected during selection. Account changes are
    /// left pending for [`Self::commit`].
    pub fn mine_block(
        &self,
        header: &Header,
        txs: Vec<Transaction>,
        budget: Duration,
    ) -> DpovpResult<(Block, Vec<Transaction>)> {
        self.accounts.reset(&header.parent_hash);
        let outcome = self.executor.apply_txs(header, txs, budget);
        self.finalize(header.height)?;
        let product = self.accounts.txs_product(outcome.selected, outcome.gas_used);

        let mut block = self.seal(header, product, Vec::new());
        block.header.sign_data = Some(self.signer.sign(&block.hash()));
        Ok((block, outcome.rejected))
    }

    /// Warn when the running term's reward pool was never set. Production continues.
    fn check_term_reward(&self, height: u64) {
        let term = self.config().term_index(height);
        if self.accounts.term_reward_pool(term).is_none() {
            warn!(target: "dpovp::assembler", term, height, "Term reward pool is not set");
            self.outbound.publish(ConsensusEvent::TermRewardUnset { term, height });
        }
    }

    /// Pay the finished term's deputies at the first block of the new term.
    fn issue_term_reward(&self, height: u64) -> DpovpResult<()> {
        let term = self.config().term_index(height) - 1;
        let Some(pool) = self.accounts.term_reward_pool(term) else {
            warn!(target: "dpovp::assembler", term, height, "No reward pool, skipping salaries");
            return Ok(())
        };

        let deputies = self.registry.get_deputies_by_height(height - 1)?;
        let salaries = calculate_salaries(pool, &deputies, self.config().reward_precision);
        for salary in &salaries {
            let income = self
                .accounts
                .candidate_profile(&salary.miner_address)
                .and_then(|profile| profile.income_address)
                .filter(|address| !address.is_zero())
                .unwrap_or(salary.miner_address);
            self.accounts.add_balance(&income, salary.salary);
        }
        info!(target: "dpovp::assembler", term, height, deputies = salaries.len(), %pool, "Issued term reward");
        Ok(())
    }

    fn refund_candidates(&self, height: u64) {
        for address in self.candidates.load_refund_candidates(height) {
            let deposit = self.accounts.candidate_deposit(&address);
            if deposit.is_zero() {
                continue
            }
            self.accounts.set_candidate_deposit(&address, U256::ZERO);
            self.accounts.add_balance(&address, deposit);
            debug!(target: "dpovp::assembler", %address, %deposit, height, "Refunded candidate deposit");
        }
    }

    /// Votes follow the voter's balance, so move each changed balance's delta onto the
    /// candidate the account votes for.
    fn update_candidate_votes(&self) {
        for change in self.accounts.balance_changes() {
            let Some(candidate) = self.accounts.vote_for(&change.address) else { continue };
            match self.accounts.candidate_profile(&candidate) {
                Some(profile) if !profile.is_cancel => {}
                _ => continue,
            }

            let votes = self.accounts.candidate_votes(&candidate);
            let votes = if change.new >= change.old {
                votes.saturating_add(change.new - change.old)
            } else {
                votes.saturating_sub(change.old - change.new)
            };
            self.accounts.set_candidate_votes(&candidate, votes);
        }
    }
}

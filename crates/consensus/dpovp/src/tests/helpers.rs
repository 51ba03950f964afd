//! Test helper utilities for DPoVP consensus testing
//!
//! Provides a small deputy network: signers, a genesis block, mock collaborators and an
//! engine running as one of the deputies or as an observer.

use crate::{
    test_utils::{deputy_address, deputy_nodes, deputy_signer, genesis_block, make_block, MockChain, RecordingSink},
    ConsensusEvent, Dpovp, DpovpConfig, EventSink, TermRegistry,
};
use alloy_primitives::{Address, Bytes};
use dpovp_primitives::{Block, DeputyNodes};
use std::sync::Arc;

/// Index of a node that is never a deputy
pub const OUTSIDER: u8 = 9;

/// Small terms so snapshot heights are far from the blocks the tests build
pub fn test_config() -> DpovpConfig {
    DpovpConfig::new().with_term(1_000, 10).with_reward_check_height(500)
}

/// Current unix time in seconds
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Registry with `count` deputies saved at genesis
pub fn registry_with(config: DpovpConfig, count: u8) -> TermRegistry {
    let registry = TermRegistry::new(config);
    let signers: Vec<_> = (0..count).map(deputy_signer).collect();
    registry.save_snapshot(0, deputy_nodes(&signers));
    registry
}

/// Deputy network with an engine running as node `local`
#[derive(Debug)]
pub struct TestNet {
    pub genesis: Block,
    pub nodes: DeputyNodes,
    pub chain: MockChain,
    pub sink: Arc<RecordingSink>,
    pub engine: Dpovp,
}

impl TestNet {
    /// `count` deputies, genesis 100 seconds ago
    pub fn new(count: u8, local: u8) -> Self {
        Self::with_config(test_config(), count, local)
    }

    /// Like [`Self::new`] with custom consensus parameters
    pub fn with_config(config: DpovpConfig, count: u8, local: u8) -> Self {
        let signers: Vec<_> = (0..count).map(deputy_signer).collect();
        let nodes = deputy_nodes(&signers);
        let genesis = genesis_block(nodes.clone(), now_secs() - 100);
        Self::spawn(config, MockChain::new(genesis.clone()), genesis, nodes, local)
    }

    /// Engine over an already populated chain
    pub fn with_chain(chain: MockChain, genesis: Block, nodes: DeputyNodes, local: u8) -> Self {
        Self::spawn(test_config(), chain, genesis, nodes, local)
    }

    fn spawn(config: DpovpConfig, chain: MockChain, genesis: Block, nodes: DeputyNodes, local: u8) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let engine = Dpovp::new(
            config,
            deputy_signer(local),
            chain.collaborators(),
            vec![sink.clone() as Arc<dyn EventSink>],
        )
        .unwrap();
        Self { genesis, nodes, chain, sink, engine }
    }

    /// Block by deputy `miner` on `parent`, `offset` seconds after genesis
    pub fn block(&self, parent: &Block, miner: u8, offset: u64) -> Block {
        make_block(parent, &deputy_signer(miner), deputy_address(miner), self.genesis.time() + offset)
    }

    /// Like [`Self::block`] with custom extra data
    pub fn block_with_extra(&self, parent: &Block, miner: u8, offset: u64, extra: Bytes) -> Block {
        let mut block = self.block(parent, miner, offset);
        block.header.extra = extra;
        resign(block, miner)
    }

    /// Stop the event worker and return everything it published
    pub fn drain_events(&self) -> Vec<ConsensusEvent> {
        self.engine.shutdown();
        self.sink.events()
    }
}

/// Re-seal `block` by deputy `signer` after its header changed
pub fn resign(mut block: Block, signer: u8) -> Block {
    block.header.sign_data = Some(deputy_signer(signer).sign(&block.hash()));
    block
}

/// Miner address of deputy `index`
pub const fn miner(index: u8) -> Address {
    deputy_address(index)
}

//! Shared set-up for the proposer VM integration tests.
#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use slotgate_common::{EngineMessage, NodeId};
use slotgate_module_proposer_vm::{
    block::Block, configuration::ProposerVmConfig, database::MemDatabase, ProposerVm,
};
use slotgate_test_utils::{test_context, TestChainVm, TestValidatorState};
use tokio::sync::mpsc;

/// Activation far past every test timestamp
pub const NEVER: u64 = 4_000_000_000;

pub const TIP_HEIGHT: u64 = 1000;

pub fn node(n: u64) -> NodeId {
    NodeId::from_u64(n)
}

pub fn this_node() -> NodeId {
    node(1)
}

pub fn config(activation_time: u64) -> ProposerVmConfig {
    ProposerVmConfig {
        activation_time,
        check_indexed_frequency_ms: 10,
        ..Default::default()
    }
}

/// This node is the only validator, so it may always build immediately
pub fn sole_validator() -> Arc<TestValidatorState> {
    Arc::new(TestValidatorState::new(TIP_HEIGHT, [(this_node(), 1)]))
}

pub struct Harness {
    pub vm: ProposerVm,
    pub chain: Arc<TestChainVm>,
    pub validators: Arc<TestValidatorState>,
    pub db: Arc<MemDatabase>,
    pub engine: mpsc::Receiver<EngineMessage>,
}

pub async fn start_with(
    chain: Arc<TestChainVm>,
    db: Arc<MemDatabase>,
    config: ProposerVmConfig,
    validators: Arc<TestValidatorState>,
) -> Harness {
    let (to_engine, engine) = mpsc::channel(1);
    let mut vm = ProposerVm::initialize(
        chain.clone(),
        &config,
        test_context(this_node(), validators.clone()),
        db.clone(),
        to_engine,
    )
    .await
    .unwrap();
    let last_accepted = vm.last_accepted().unwrap();
    vm.set_preference(last_accepted).unwrap();
    Harness {
        vm,
        chain,
        validators,
        db,
        engine,
    }
}

/// Fresh chain and store, activated from the start
pub async fn start() -> Harness {
    start_with(
        TestChainVm::new(),
        Arc::new(MemDatabase::new()),
        config(0),
        sole_validator(),
    )
    .await
}

impl Harness {
    /// Build on the current preference, verify, accept, then prefer it
    pub fn extend(&mut self) -> Block {
        let blk = self.vm.build_block().unwrap();
        self.vm.verify(&blk).unwrap();
        self.vm.accept(&blk).unwrap();
        self.vm.set_preference(blk.id()).unwrap();
        blk
    }

    /// Restart on the same store and inner chain
    pub async fn restart(mut self, config: ProposerVmConfig) -> Harness {
        self.vm.shutdown().unwrap();
        start_with(self.chain, self.db, config, self.validators).await
    }
}

/// Wait for the height index supervisor to finish
pub async fn wait_for_index(vm: &ProposerVm) {
    for _ in 0..500 {
        if vm.verify_height_index().is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("height index never completed");
}

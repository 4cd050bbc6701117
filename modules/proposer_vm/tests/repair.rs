//! Start-up reconciliation after acceptances lost by the inner chain.

mod common;

use std::sync::Arc;

use common::*;
use slotgate_common::BlockStatus;
use slotgate_module_proposer_vm::{block::Block, database::PrefixDb, state::State, DB_PREFIX};
use slotgate_test_utils::{genesis_id, TestChainVm};

/// The inner chain forgets having accepted `blk`
fn lose_acceptance(h: &Harness, blk: &Block) {
    h.chain
        .block(&blk.inner().id())
        .unwrap()
        .set_status(BlockStatus::Processing);
}

fn persisted(h: &Harness) -> State {
    State::new(Arc::new(PrefixDb::new(DB_PREFIX, h.db.clone())))
}

#[tokio::test]
async fn consistent_chain_is_left_alone() {
    let mut h = start().await;
    let b1 = h.extend();
    let b2 = h.extend();

    let h = h.restart(config(0)).await;
    assert_eq!(h.vm.last_accepted().unwrap(), b2.id());
    assert_eq!(h.vm.get_block(&b1.id()).unwrap().status(), BlockStatus::Accepted);
}

#[tokio::test]
async fn blocks_ahead_of_the_inner_chain_are_demoted() {
    let mut h = start().await;
    let b1 = h.extend();
    let b2 = h.extend();
    let b3 = h.extend();
    lose_acceptance(&h, &b2);
    lose_acceptance(&h, &b3);

    let h = h.restart(config(0)).await;
    assert_eq!(h.vm.last_accepted().unwrap(), b1.id());
    assert_eq!(h.vm.get_block(&b1.id()).unwrap().status(), BlockStatus::Accepted);
    assert_eq!(h.vm.get_block(&b2.id()).unwrap().status(), BlockStatus::Processing);
    assert_eq!(h.vm.get_block(&b3.id()).unwrap().status(), BlockStatus::Processing);

    // A second restart finds nothing left to do
    let h = h.restart(config(0)).await;
    assert_eq!(h.vm.last_accepted().unwrap(), b1.id());
    assert_eq!(h.vm.get_block(&b2.id()).unwrap().status(), BlockStatus::Processing);
}

#[tokio::test]
async fn rollback_past_the_fork_forgets_the_accepted_chain() {
    let mut h = start().await;
    let b1 = h.extend();
    let b2 = h.extend();
    lose_acceptance(&h, &b1);
    lose_acceptance(&h, &b2);

    let h = h.restart(config(0)).await;
    assert_eq!(h.vm.last_accepted().unwrap(), genesis_id());
    assert_eq!(persisted(&h).get_last_accepted().unwrap(), None);
    assert_eq!(h.vm.get_block(&b1.id()).unwrap().status(), BlockStatus::Processing);
}

#[tokio::test]
async fn checkpoint_follows_the_demoted_block() {
    let mut h = start().await;
    let _b1 = h.extend();
    let b2 = h.extend();
    let b3 = h.extend();
    lose_acceptance(&h, &b3);

    h.vm.shutdown().unwrap();
    persisted(&h).set_checkpoint(&b3.id()).unwrap();

    let h = start_with(h.chain, h.db, config(0), h.validators).await;
    assert_eq!(h.vm.last_accepted().unwrap(), b2.id());
    assert_eq!(persisted(&h).get_checkpoint().unwrap(), Some(b2.id()));
}

#[tokio::test]
async fn demoted_blocks_leave_the_height_index() {
    let mut h = start_with(
        TestChainVm::with_height_index(0),
        Arc::new(slotgate_module_proposer_vm::database::MemDatabase::new()),
        config(0),
        sole_validator(),
    )
    .await;
    wait_for_index(&h.vm).await;
    let b1 = h.extend();
    let b2 = h.extend();
    assert_eq!(h.vm.get_block_id_at_height(2).unwrap(), b2.id());
    lose_acceptance(&h, &b2);

    let h = h.restart(config(0)).await;
    wait_for_index(&h.vm).await;
    assert_eq!(h.vm.get_block_id_at_height(1).unwrap(), b1.id());
    assert!(h.vm.get_block_id_at_height(2).unwrap_err().is_not_found());
}

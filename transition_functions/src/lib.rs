pub use block_processing::{
    count_required_signatures, custom_process_block, process_block, process_block_header,
    process_block_header_for_gossip, process_deposit_data, process_eth1_data, process_randao,
    process_voluntary_exit, validate_attestation, validate_attestation_with_verifier,
    validate_attester_slashing, validate_attester_slashing_with_verifier, validate_deposits,
    validate_proposer_slashing, validate_proposer_slashing_with_verifier, validate_voluntary_exit,
    validate_voluntary_exit_with_verifier, verify_deposit_merkle_branch, CombinedDeposit,
};
pub use epoch_intermediates::{
    epoch_deltas, statistics, EpochDeltas, Performance, Statistics, ValidatorSummary,
};
pub use epoch_processing::{
    process_epoch, process_final_updates, process_justification_and_finalization,
    process_phase_1_final_updates, process_registry_updates, process_rewards_and_penalties,
    process_slashings, weigh_justification_and_finalization,
};
pub use error::Error;
pub use shard_processing::{
    apply_shard_transition, process_crosslink_for_shard, process_crosslinks,
    process_shard_transitions, verify_empty_shard_transitions,
};
pub use slot_processing::{process_slot, process_slots, ProcessSlots};
pub use state_transition::{
    state_transition, trusted_state_transition, untrusted_state_transition, verify_signatures,
    StateRootPolicy,
};

mod block_processing;
mod epoch_intermediates;
mod epoch_processing;
mod error;
mod shard_processing;
mod slot_processing;
mod state_transition;

//   Copyright 2025 The Lumen Project
//   SPDX-License-Identifier: BSD-3-Clause

//! Pure field mappings between the two wire revisions. No I/O happens here;
//! the legacy adapter composes these into full request/response cycles.

use crate::proto::{abci, legacy};

pub fn events_to_legacy(events: Vec<abci::Event>) -> Vec<legacy::Event> {
    events
        .into_iter()
        .map(|event| legacy::Event {
            r#type: event.r#type,
            attributes: event
                .attributes
                .into_iter()
                .map(|attr| legacy::EventAttribute {
                    key: attr.key.into_bytes(),
                    value: attr.value.into_bytes(),
                    index: attr.index,
                })
                .collect(),
        })
        .collect()
}

/// Attribute bytes that are not valid UTF-8 are replaced lossily; the newer
/// revision has no way to carry them.
pub fn events_to_current(events: Vec<legacy::Event>) -> Vec<abci::Event> {
    events
        .into_iter()
        .map(|event| abci::Event {
            r#type: event.r#type,
            attributes: event
                .attributes
                .into_iter()
                .map(|attr| abci::EventAttribute {
                    key: String::from_utf8_lossy(&attr.key).into_owned(),
                    value: String::from_utf8_lossy(&attr.value).into_owned(),
                    index: attr.index,
                })
                .collect(),
        })
        .collect()
}

fn public_key_to_legacy(key: abci::PublicKey) -> legacy::PublicKey {
    legacy::PublicKey {
        sum: key.sum.map(|sum| match sum {
            abci::public_key::Sum::Ed25519(bytes) => legacy::public_key::Sum::Ed25519(bytes),
            abci::public_key::Sum::Secp256k1(bytes) => legacy::public_key::Sum::Secp256k1(bytes),
        }),
    }
}

fn public_key_to_current(key: legacy::PublicKey) -> abci::PublicKey {
    abci::PublicKey {
        sum: key.sum.map(|sum| match sum {
            legacy::public_key::Sum::Ed25519(bytes) => abci::public_key::Sum::Ed25519(bytes),
            legacy::public_key::Sum::Secp256k1(bytes) => abci::public_key::Sum::Secp256k1(bytes),
        }),
    }
}

pub fn validator_updates_to_legacy(updates: Vec<abci::ValidatorUpdate>) -> Vec<legacy::ValidatorUpdate> {
    updates
        .into_iter()
        .map(|update| legacy::ValidatorUpdate {
            pub_key: update.pub_key.map(public_key_to_legacy),
            power: update.power,
        })
        .collect()
}

pub fn validator_updates_to_current(updates: Vec<legacy::ValidatorUpdate>) -> Vec<abci::ValidatorUpdate> {
    updates
        .into_iter()
        .map(|update| abci::ValidatorUpdate {
            pub_key: update.pub_key.map(public_key_to_current),
            power: update.power,
        })
        .collect()
}

pub fn consensus_params_to_legacy(params: abci::ConsensusParams) -> legacy::ConsensusParams {
    legacy::ConsensusParams {
        block: params.block.map(|block| legacy::BlockParams {
            max_bytes: block.max_bytes,
            max_gas: block.max_gas,
        }),
        evidence: params.evidence.map(|evidence| legacy::EvidenceParams {
            max_age_num_blocks: evidence.max_age_num_blocks,
            max_age_duration: evidence.max_age_duration,
            max_bytes: evidence.max_bytes,
        }),
        validator: params.validator.map(|validator| legacy::ValidatorParams {
            pub_key_types: validator.pub_key_types,
        }),
        version: params.version.map(|version| legacy::VersionParams {
            app_version: version.app,
        }),
    }
}

pub fn consensus_params_to_current(params: legacy::ConsensusParams) -> abci::ConsensusParams {
    abci::ConsensusParams {
        block: params.block.map(|block| abci::BlockParams {
            max_bytes: block.max_bytes,
            max_gas: block.max_gas,
        }),
        evidence: params.evidence.map(|evidence| abci::EvidenceParams {
            max_age_num_blocks: evidence.max_age_num_blocks,
            max_age_duration: evidence.max_age_duration,
            max_bytes: evidence.max_bytes,
        }),
        validator: params.validator.map(|validator| abci::ValidatorParams {
            pub_key_types: validator.pub_key_types,
        }),
        version: params.version.map(|version| abci::VersionParams {
            app: version.app_version,
        }),
    }
}

fn validator_to_legacy(validator: abci::Validator) -> legacy::Validator {
    legacy::Validator {
        address: validator.address,
        power: validator.power,
    }
}

pub fn commit_info_to_legacy(info: abci::CommitInfo) -> legacy::LastCommitInfo {
    legacy::LastCommitInfo {
        round: info.round,
        votes: info
            .votes
            .into_iter()
            .map(|vote| legacy::VoteInfo {
                validator: vote.validator.map(validator_to_legacy),
                // Absent is the only flag that means the validator did not
                // sign; anything else (including unknown) counts as signed.
                signed_last_block: vote.block_id_flag != abci::BlockIdFlag::Absent as i32,
            })
            .collect(),
    }
}

pub fn misbehavior_to_legacy(misbehavior: Vec<abci::Misbehavior>) -> Vec<legacy::Evidence> {
    misbehavior
        .into_iter()
        .map(|m| legacy::Evidence {
            r#type: match m.r#type {
                t if t == abci::MisbehaviorType::DuplicateVote as i32 => {
                    legacy::EvidenceType::DuplicateVote as i32
                },
                t if t == abci::MisbehaviorType::LightClientAttack as i32 => {
                    legacy::EvidenceType::LightClientAttack as i32
                },
                _ => legacy::EvidenceType::Unknown as i32,
            },
            validator: m.validator.map(validator_to_legacy),
            height: m.height,
            time: m.time,
            total_voting_power: m.total_voting_power,
        })
        .collect()
}

pub fn proof_ops_to_current(ops: legacy::ProofOps) -> abci::ProofOps {
    abci::ProofOps {
        ops: ops
            .ops
            .into_iter()
            .map(|op| abci::ProofOp {
                r#type: op.r#type,
                key: op.key,
                data: op.data,
            })
            .collect(),
    }
}

pub fn snapshot_to_legacy(snapshot: abci::Snapshot) -> legacy::Snapshot {
    legacy::Snapshot {
        height: snapshot.height,
        format: snapshot.format,
        chunks: snapshot.chunks,
        hash: snapshot.hash,
        metadata: snapshot.metadata,
    }
}

pub fn snapshots_to_current(snapshots: Vec<legacy::Snapshot>) -> Vec<abci::Snapshot> {
    snapshots
        .into_iter()
        .map(|snapshot| abci::Snapshot {
            height: snapshot.height,
            format: snapshot.format,
            chunks: snapshot.chunks,
            hash: snapshot.hash,
            metadata: snapshot.metadata,
        })
        .collect()
}

pub fn header_to_legacy(header: abci::Header) -> legacy::Header {
    legacy::Header {
        version: header.version.map(|version| legacy::Consensus {
            block: version.block,
            app: version.app,
        }),
        chain_id: header.chain_id,
        height: header.height,
        time: header.time,
        last_block_id: header.last_block_id.map(|id| legacy::BlockId {
            hash: id.hash,
            part_set_header: id.part_set_header.map(|psh| legacy::PartSetHeader {
                total: psh.total,
                hash: psh.hash,
            }),
        }),
        last_commit_hash: header.last_commit_hash,
        data_hash: header.data_hash,
        validators_hash: header.validators_hash,
        next_validators_hash: header.next_validators_hash,
        consensus_hash: header.consensus_hash,
        app_hash: header.app_hash,
        last_results_hash: header.last_results_hash,
        evidence_hash: header.evidence_hash,
        proposer_address: header.proposer_address,
    }
}

/// Best-effort legacy header for a finalize request that did not carry a full
/// one. Mandatory legacy fields the flattened request has no equivalent for
/// are left zeroed.
pub fn finalize_block_header(request: &abci::RequestFinalizeBlock, app_version: u64) -> legacy::Header {
    match request.header.clone() {
        Some(header) => header_to_legacy(header),
        None => legacy::Header {
            version: Some(legacy::Consensus {
                block: legacy::BLOCK_PROTOCOL_VERSION,
                app: app_version,
            }),
            height: request.height,
            time: request.time,
            next_validators_hash: request.next_validators_hash.clone(),
            proposer_address: request.proposer_address.clone(),
            data_hash: request.hash.clone(),
            ..Default::default()
        },
    }
}

pub fn tx_result_to_current(result: legacy::ResponseDeliverTx) -> abci::ExecTxResult {
    abci::ExecTxResult {
        code: result.code,
        data: result.data,
        log: result.log,
        info: result.info,
        gas_wanted: result.gas_wanted,
        gas_used: result.gas_used,
        events: events_to_current(result.events),
        codespace: result.codespace,
    }
}

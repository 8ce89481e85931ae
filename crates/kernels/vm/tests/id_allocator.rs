//! Persistent ID allocation across invocations.
//!
//! Dataset 0 owns the IDs, dataset 1 records which ID each spawned instance
//! received, dataset 2 feeds the kill pass and collects its survivors.

mod common;

use std::collections::BTreeSet;

use common::{raw, run};
use vectorvm::{DataSetMeta, INDEX_NONE, Program, VmConfig, assemble};

const TAG: i32 = 11;

fn program(source: &str) -> Program {
    Program {
        byte_code: assemble(source).unwrap(),
        constants: Vec::new(),
    }
}

fn spawn_program() -> Program {
    program(
        "
        acquire_id 0, r0, r1
        exec_index r2
        update_id 0, r0, r2
        outputdata_32bit 1, r2, r0, 0
        outputdata_32bit 1, r2, r1, 1
        done
    ",
    )
}

fn kill_program() -> Program {
    program(
        "
        inputdata_32bit 2, 0, r0
        inputdata_32bit 2, 1, r1
        acquireindex 2, r1, r2
        outputdata_32bit 2, r2, r0, 0
        update_id 0, r0, r2
        done
    ",
    )
}

fn parallel() -> VmConfig {
    VmConfig::default()
        .with_instances_per_chunk(3)
        .with_chunks_per_batch(1)
}

fn id_owner(capacity: usize) -> DataSetMeta {
    DataSetMeta::new()
        .with_id_capacity(capacity)
        .with_acquire_tag(TAG)
}

/// Spawn `count` instances; returns the ID each one received.
fn spawn(data_sets: &mut [DataSetMeta; 3], count: usize, config: &VmConfig) -> Vec<i32> {
    data_sets[1] = DataSetMeta::new().with_outputs(2, count);
    run(&spawn_program(), 3, count, data_sets, config);
    assert!(data_sets[1].output_i32(1).iter().all(|&tag| tag == TAG));
    data_sets[1].output_i32(0)
}

/// Kill every instance whose `alive` flag is zero.
fn kill(data_sets: &mut [DataSetMeta; 3], ids: &[i32], alive: &[i32], config: &VmConfig) {
    data_sets[2] = DataSetMeta::new()
        .with_input_i32(ids)
        .with_input_i32(alive)
        .with_outputs(1, ids.len());
    run(&kill_program(), 3, ids.len(), data_sets, config);
}

fn empty_sets(capacity: usize) -> [DataSetMeta; 3] {
    [id_owner(capacity), DataSetMeta::new(), DataSetMeta::new()]
}

// =============================================================================
// Spawning
// =============================================================================

#[test]
fn test_spawned_instances_get_unique_ids() {
    for config in [parallel(), raw(parallel()), VmConfig::serial()] {
        let mut data_sets = empty_sets(32);
        let ids = spawn(&mut data_sets, 20, &config);

        let unique: BTreeSet<i32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 20);
        assert!(ids.iter().all(|&id| (0..32).contains(&id)));

        let table = data_sets[0].id_table();
        for (index, &id) in ids.iter().enumerate() {
            assert_eq!(table[id as usize], index as i32);
        }
        assert_eq!(data_sets[0].max_used_id(), *unique.last().unwrap());
        assert_eq!(data_sets[0].free_ids().len(), 12);
    }
}

#[test]
fn test_sequential_spawn_hands_out_ascending_ids() {
    let mut data_sets = empty_sets(8);
    let ids = spawn(&mut data_sets, 5, &VmConfig::serial().with_instances_per_chunk(2));
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(data_sets[0].max_used_id(), 4);
}

#[test]
fn test_exhausted_ids_come_back_as_index_none() {
    let mut data_sets = empty_sets(3);
    let ids = spawn(&mut data_sets, 5, &VmConfig::serial());
    assert_eq!(ids, vec![0, 1, 2, INDEX_NONE, INDEX_NONE]);
    assert_eq!(data_sets[0].id_table(), vec![0, 1, 2]);
}

// =============================================================================
// Release & Reacquire
// =============================================================================

#[test]
fn test_released_ids_are_reacquired_exactly_once() {
    for config in [parallel(), raw(parallel())] {
        let count = 24;
        let mut data_sets = empty_sets(count);
        let ids = spawn(&mut data_sets, count, &config);
        assert!(data_sets[0].free_ids().is_empty());

        let alive: Vec<i32> = (0..count).map(|i| i32::from(i % 3 != 0)).collect();
        kill(&mut data_sets, &ids, &alive, &config);

        let killed: BTreeSet<i32> = ids
            .iter()
            .zip(&alive)
            .filter(|&(_, &alive)| alive == 0)
            .map(|(&id, _)| id)
            .collect();
        let released: BTreeSet<i32> = data_sets[0].free_ids().into_iter().collect();
        assert_eq!(released, killed);

        let table = data_sets[0].id_table();
        for &id in &killed {
            assert_eq!(table[id as usize], INDEX_NONE);
        }
        let survivors = data_sets[2].written_count();
        assert_eq!(survivors, count - killed.len());
        let mut surviving_indices: Vec<i32> = ids
            .iter()
            .filter(|id| !killed.contains(id))
            .map(|&id| table[id as usize])
            .collect();
        surviving_indices.sort_unstable();
        assert_eq!(surviving_indices, (0..survivors as i32).collect::<Vec<_>>());

        let respawned: BTreeSet<i32> = spawn(&mut data_sets, killed.len(), &config)
            .into_iter()
            .collect();
        assert_eq!(respawned, killed);
        assert!(data_sets[0].free_ids().is_empty());
    }
}

#[test]
fn test_releases_publish_only_after_the_batch() {
    let mut data_sets = empty_sets(4);
    let ids = spawn(&mut data_sets, 4, &VmConfig::serial());

    kill(&mut data_sets, &ids, &[0, 0, 0, 0], &VmConfig::serial());
    let mut released = data_sets[0].free_ids();
    released.sort_unstable();
    assert_eq!(released, vec![0, 1, 2, 3]);
    assert_eq!(data_sets[2].written_count(), 0);
    assert_eq!(data_sets[0].id_table(), vec![INDEX_NONE; 4]);
    assert_eq!(data_sets[0].max_used_id(), 3);
}

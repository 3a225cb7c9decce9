//! Chunk pool life cycle across the three engines.

use std::sync::Arc;

use qframe_engine::{
    ChunkPool, CircuitEngine, DenseEngine, Engine, EngineError, FrameConfig, GateOp,
    StabilizerEngine,
};
use qframe_ir::{AddressLayout, ChannelKind, GateId, NoisePattern, QubitHandle};

fn pool<E: Engine>(frames: &FrameConfig, seed: u64) -> ChunkPool<E> {
    ChunkPool::new(
        1,
        AddressLayout::segmented(),
        frames,
        Arc::new(NoisePattern::noiseless()),
        Some(seed),
    )
    .unwrap()
}

fn ghz_is_all_equal<E: Engine>() {
    let frames = FrameConfig::new().with(2, 3, 1);
    let mut pool: ChunkPool<E> = pool(&frames, 42);
    for _ in 0..50 {
        let frame = pool.allocate_frames(3, 1, 2).unwrap().remove(0);
        pool.apply_serial(&[
            GateOp::new(GateId::H, vec![frame[0].clone()]),
            GateOp::new(GateId::CX, vec![frame[0].clone(), frame[1].clone()]),
            GateOp::new(GateId::CX, vec![frame[1].clone(), frame[2].clone()]),
        ])
        .unwrap();
        let bits = pool.measure(&frame, false, None).unwrap();
        assert!(bits.iter().all(|&b| b == bits[0]), "{bits:?}");
        assert!(pool.deallocate(&frame).unwrap().is_complete());
    }
}

#[test]
fn test_noiseless_ghz_dense() {
    ghz_is_all_equal::<DenseEngine>();
}

#[test]
fn test_noiseless_ghz_circuit() {
    ghz_is_all_equal::<CircuitEngine>();
}

#[test]
fn test_noiseless_ghz_stabilizer() {
    ghz_is_all_equal::<StabilizerEngine>();
}

#[test]
fn test_handles_encode_owner_and_chunk() {
    let frames = FrameConfig::new().with(2, 2, 3);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 0);
    let frames = pool.allocate_frames(2, 2, 2).unwrap();
    let tokens: Vec<&str> = frames.iter().flatten().map(QubitHandle::as_str).collect();
    assert_eq!(tokens, ["1020000000", "1020000001", "1020000100", "1020000101"]);
}

#[test]
fn test_allocate_deallocate_restores_base_size() {
    let frames = FrameConfig::new().with(2, 2, 2);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 1);

    let frame = pool.allocate_frames(2, 2, 2).unwrap();
    assert_eq!(pool.free_count(2, 2), 0);
    let extra = pool.extend(&frame[0][0], 3).unwrap();
    assert_eq!(extra.len(), 3);
    assert_eq!(pool.chunk(0).unwrap().size(), 5);

    let all: Vec<QubitHandle> = frame.iter().flatten().chain(&extra).cloned().collect();
    let result = pool.deallocate(&all).unwrap();
    assert_eq!(result.freed, vec![0, 1]);
    // Extended qubits were never part of the frame.
    assert!(!result.is_complete());
    assert_eq!(result.unknown, extra);
    assert_eq!(pool.chunk(0).unwrap().size(), 2);
    assert_eq!(pool.free_count(2, 2), 2);

    // Reallocation succeeds and starts from |00⟩.
    let frame = pool.allocate_frames(2, 2, 2).unwrap();
    let bits = pool.measure(&frame[0], false, None).unwrap();
    assert_eq!(bits, vec![0, 0]);
}

#[test]
fn test_over_capacity_request_changes_nothing() {
    let frames = FrameConfig::new().with(2, 1, 3);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 2);
    pool.allocate_frames(1, 2, 2).unwrap();
    let before = pool.capacity();
    let err = pool.allocate_frames(1, 2, 2).unwrap_err();
    assert_eq!(
        err,
        EngineError::Overflow {
            dim: 2,
            size: 1,
            requested: 2,
            available: 1
        }
    );
    assert_eq!(pool.capacity(), before);
}

#[test]
fn test_cross_chunk_gate_leaves_state_unchanged() {
    let frames = FrameConfig::new().with(2, 1, 2);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 3);
    let frames = pool.allocate_frames(1, 2, 2).unwrap();
    pool.apply_gate(GateId::H, &[], &frames[0]).unwrap();
    let a = pool.chunk(0).unwrap().state().clone();
    let b = pool.chunk(1).unwrap().state().clone();

    let err = pool
        .apply_gate(GateId::CX, &[], &[frames[0][0].clone(), frames[1][0].clone()])
        .unwrap_err();
    assert!(matches!(err, EngineError::CrossChunk(_)));
    assert!(pool.chunk(0).unwrap().state().approx_eq(&a, 0.0));
    assert!(pool.chunk(1).unwrap().state().approx_eq(&b, 0.0));
}

#[test]
fn test_rejected_serial_batch_leaves_every_chunk_unchanged() {
    let frames = FrameConfig::new().with(2, 1, 3);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 9);
    let q: Vec<QubitHandle> = pool.allocate_frames(1, 3, 2).unwrap().concat();
    let before: Vec<DenseEngine> = (0..3)
        .map(|c| pool.chunk(c).unwrap().state().clone())
        .collect();
    let unchanged = |pool: &ChunkPool<DenseEngine>| {
        (0..3).all(|c| pool.chunk(c).unwrap().state().approx_eq(&before[c as usize], 0.0))
    };

    let err = pool
        .apply_serial(&[
            GateOp::new(GateId::X, vec![q[0].clone()]),
            GateOp::new(GateId::CX, vec![q[1].clone(), q[2].clone()]),
        ])
        .unwrap_err();
    assert!(matches!(err, EngineError::CrossChunk(_)));
    assert!(unchanged(&pool));

    let err = pool
        .apply_serial(&[
            GateOp::new(GateId::X, vec![q[0].clone()]),
            GateOp::new(GateId(99), vec![q[0].clone()]),
        ])
        .unwrap_err();
    assert!(matches!(err, EngineError::Ir(_)));
    assert!(unchanged(&pool));
    assert_eq!(pool.measure(&q[..1], false, None).unwrap(), vec![0]);
}

#[test]
fn test_multi_chunk_request_with_free_chunk_changes_nothing() {
    let frames = FrameConfig::new().with(2, 1, 2);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 10);
    let q = pool.allocate_frames(1, 1, 2).unwrap().remove(0);
    pool.apply_gate(GateId::H, &[], &q).unwrap();
    let before = pool.chunk(0).unwrap().state().clone();
    // Chunk 1 was never allocated.
    let free = QubitHandle::new("1020000100");
    let mixed = [q[0].clone(), free];

    assert_eq!(
        pool.measure(&mixed, false, None).unwrap_err(),
        EngineError::NotAllocated(1)
    );
    assert_eq!(pool.reset(&mixed).unwrap_err(), EngineError::NotAllocated(1));
    assert_eq!(
        pool.apply_channel_error(&mixed, 1.0).unwrap_err(),
        EngineError::NotAllocated(1)
    );
    assert!(pool.measure(&q, false, Some(1)).is_err());
    assert!(pool.chunk(0).unwrap().state().approx_eq(&before, 0.0));
}

#[test]
fn test_oversized_registers_are_rejected() {
    let err = ChunkPool::<DenseEngine>::new(
        0,
        AddressLayout::segmented(),
        &FrameConfig::new().with(2, 64, 1),
        Arc::new(NoisePattern::noiseless()),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::RegisterTooLarge {
            requested: 64,
            max: 26,
            ..
        }
    ));

    let frames = FrameConfig::new().with(2, 2, 1);
    let mut pool: ChunkPool<CircuitEngine> = pool(&frames, 11);
    let q = pool.allocate_frames(2, 1, 2).unwrap().remove(0);
    let err = pool.extend(&q[0], 64).unwrap_err();
    assert!(matches!(err, EngineError::RegisterTooLarge { .. }));
    assert!(matches!(
        pool.extend(&q[0], usize::MAX),
        Err(EngineError::RegisterTooLarge { .. })
    ));
    assert_eq!(pool.chunk(0).unwrap().size(), 2);
    assert_eq!(pool.extend(&q[0], 1).unwrap().len(), 1);
}

#[test]
fn test_measure_across_chunks_keeps_caller_order() {
    let frames = FrameConfig::new().with(2, 2, 2);
    let mut pool: ChunkPool<CircuitEngine> = pool(&frames, 4);
    let frames = pool.allocate_frames(2, 2, 2).unwrap();
    pool.apply_gate(GateId::X, &[], &frames[1][..1]).unwrap();
    let order = vec![
        frames[1][1].clone(),
        frames[0][0].clone(),
        frames[1][0].clone(),
        frames[0][1].clone(),
    ];
    assert_eq!(pool.measure(&order, false, None).unwrap(), vec![0, 0, 1, 0]);
}

#[test]
fn test_non_destructive_measure_is_repeatable() {
    let frames = FrameConfig::new().with(3, 2, 1);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 5);
    let frame = pool.allocate_frames(2, 1, 3).unwrap().remove(0);
    pool.apply_gate(GateId::H, &[], &frame[..1]).unwrap();
    let before = pool.chunk(0).unwrap().state().clone();
    for _ in 0..10 {
        pool.measure(&frame, true, None).unwrap();
    }
    assert!(pool.chunk(0).unwrap().state().approx_eq(&before, 1e-12));
}

#[test]
fn test_stabilizer_rejects_t_gate() {
    let frames = FrameConfig::new().with(2, 1, 1);
    let mut pool: ChunkPool<StabilizerEngine> = pool(&frames, 6);
    let frame = pool.allocate_frames(1, 1, 2).unwrap().remove(0);
    let err = pool.apply_gate(GateId::T, &[], &frame).unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedGate { .. }));
}

#[test]
fn test_unknown_and_foreign_handles() {
    let frames = FrameConfig::new().with(2, 1, 2);
    let mut pool: ChunkPool<DenseEngine> = pool(&frames, 7);
    let frame = pool.allocate_frames(1, 1, 2).unwrap().remove(0);

    let foreign = QubitHandle::new("2020000000");
    assert!(matches!(
        pool.locate(&foreign),
        Err(EngineError::ForeignHandle { owner: 2, .. })
    ));

    let free_chunk = QubitHandle::new("1020000100");
    let result = pool
        .deallocate(&[frame[0].clone(), foreign, free_chunk])
        .unwrap();
    assert_eq!(result.freed, vec![0]);
    assert_eq!(result.unknown.len(), 2);
}

#[test]
fn test_pool_rejects_unencodable_frames() {
    let frames = FrameConfig::new().with(2, 101, 1);
    let err = ChunkPool::<StabilizerEngine>::new(
        0,
        AddressLayout::segmented(),
        &frames,
        Arc::new(NoisePattern::noiseless()),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, EngineError::Ir(_)));
}

#[test]
fn test_pool_rejects_unsupported_dimension() {
    let frames = FrameConfig::new().with(3, 1, 1);
    let err = ChunkPool::<CircuitEngine>::new(
        0,
        AddressLayout::segmented(),
        &frames,
        Arc::new(NoisePattern::noiseless()),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnsupportedDimension { dim: 3, .. }
    ));
}

#[test]
fn test_channel_error_injection() {
    let frames = FrameConfig::new().with(2, 1, 1);
    let noise = NoisePattern {
        scramble_channel: ChannelKind::BitFlip,
        ..NoisePattern::noiseless()
    };
    let mut pool: ChunkPool<DenseEngine> = ChunkPool::new(
        0,
        AddressLayout::segmented(),
        &frames,
        Arc::new(noise),
        Some(8),
    )
    .unwrap();
    let frame = pool.allocate_frames(1, 1, 2).unwrap().remove(0);
    pool.apply_channel_error(&frame, 1.0).unwrap();
    assert_eq!(pool.measure(&frame, true, None).unwrap(), vec![1]);
    pool.reset(&frame).unwrap();
    assert_eq!(pool.measure(&frame, true, None).unwrap(), vec![0]);
}

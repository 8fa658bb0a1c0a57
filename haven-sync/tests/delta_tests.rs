mod common;

use common::{paired_peers, put_note, PAIRING_KEY};
use haven_crypto::{EncryptedPayload, SymmetricKey};
use haven_sync::{
    read_message, write_message, ApplyOutcome, DeltaCodec, SkipReason, SpaceClock, SyncConfig,
    SyncDelta, SyncMessage, SyncSession,
};
use haven_types::{now_ms, EntityId, SpaceId, SyncOperation};
use pretty_assertions::assert_eq;

fn session_key() -> SymmetricKey {
    SymmetricKey::from_bytes(PAIRING_KEY)
}

/// Delta computation honors the peer's marker and category filter.
#[test]
fn compute_respects_marker_and_categories() {
    let (a, _) = paired_peers();
    let space = SpaceId::new();
    let key = session_key();

    put_note(&a.store, &space, &EntityId::new(), b"a note");
    let task = EntityId::new();
    a.store
        .put_local(&space, "task", &task, b"a task", "hash-task", now_ms())
        .unwrap();

    let codec = DeltaCodec::new(a.store.clone(), a.device_id);

    let all = codec
        .compute_deltas(&space, &SpaceClock::new(), &[], &key)
        .unwrap();
    assert_eq!(all.len(), 2);

    let only_tasks = codec
        .compute_deltas(&space, &SpaceClock::new(), &["task".to_string()], &key)
        .unwrap();
    assert_eq!(only_tasks.len(), 1);
    assert_eq!(only_tasks[0].entity_type, "task");
    assert_eq!(only_tasks[0].operation, SyncOperation::Create);

    // A peer that has already seen everything gets nothing.
    let mut caught_up = SpaceClock::new();
    caught_up.observe(a.device_id, now_ms() + 1000);
    let none = codec
        .compute_deltas(&space, &caught_up, &[], &key)
        .unwrap();
    assert!(none.is_empty());
}

/// Applying the same delta twice changes nothing the second time.
#[test]
fn apply_is_idempotent() {
    let (a, b) = paired_peers();
    let space = SpaceId::new();
    let key = session_key();
    let entity = EntityId::new();
    put_note(&a.store, &space, &entity, b"one change");

    let deltas = DeltaCodec::new(a.store.clone(), a.device_id)
        .compute_deltas(&space, &SpaceClock::new(), &[], &key)
        .unwrap();
    let delta = &deltas[0];

    let codec = DeltaCodec::new(b.store.clone(), b.device_id);
    assert_eq!(
        codec.apply_delta(&space, delta, &key, 0).unwrap(),
        ApplyOutcome::Applied
    );
    assert_eq!(
        codec.apply_delta(&space, delta, &key, 0).unwrap(),
        ApplyOutcome::Skipped(SkipReason::Duplicate)
    );

    assert_eq!(b.store.sync_log_count(&entity).unwrap(), 1);
    let stored = b.store.get_entity(&space, &entity).unwrap().unwrap();
    assert_eq!(stored.payload, b"one change");
}

/// A delta whose ciphertext was flipped in transit is skipped, not
/// applied and not fatal.
#[test]
fn tampered_ciphertext_is_skipped() {
    let (a, b) = paired_peers();
    let space = SpaceId::new();
    let key = session_key();
    let entity = EntityId::new();
    put_note(&a.store, &space, &entity, b"pristine");

    let mut deltas = DeltaCodec::new(a.store.clone(), a.device_id)
        .compute_deltas(&space, &SpaceClock::new(), &[], &key)
        .unwrap();
    let payload = deltas[0].payload.as_mut().unwrap();
    payload.ciphertext[0] ^= 0x01;

    let codec = DeltaCodec::new(b.store.clone(), b.device_id);
    assert_eq!(
        codec.apply_delta(&space, &deltas[0], &key, 0).unwrap(),
        ApplyOutcome::Skipped(SkipReason::Corrupted)
    );
    assert!(b.store.get_entity(&space, &entity).unwrap().is_none());
    assert_eq!(b.store.sync_log_count(&entity).unwrap(), 0);
}

/// Tombstones travel without a payload and apply as deletions.
#[test]
fn tombstones_apply_as_deletions() {
    let (a, b) = paired_peers();
    let space = SpaceId::new();
    let key = session_key();
    let entity = EntityId::new();
    put_note(&a.store, &space, &entity, b"short-lived");
    a.store.delete_local(&space, &entity, now_ms()).unwrap();

    let deltas = DeltaCodec::new(a.store.clone(), a.device_id)
        .compute_deltas(&space, &SpaceClock::new(), &[], &key)
        .unwrap();
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].operation, SyncOperation::Delete);
    assert!(deltas[0].payload.is_none());

    let codec = DeltaCodec::new(b.store.clone(), b.device_id);
    assert_eq!(
        codec.apply_delta(&space, &deltas[0], &key, 0).unwrap(),
        ApplyOutcome::Applied
    );
    assert!(b.store.get_entity(&space, &entity).unwrap().unwrap().deleted);
}

/// One corrupted delta among a small set is skipped while the session
/// still runs to completion and records success.
#[tokio::test]
async fn corrupted_delta_does_not_fail_the_session() {
    let (a, b) = paired_peers();
    let space = SpaceId::new();

    let (mut client, mut server) = tokio::io::duplex(64 * 1024);
    let b_session = SyncSession::new(
        b.store.clone(),
        b.device_id,
        a.device_id,
        space,
        SyncConfig::default(),
    );
    let responder = tokio::spawn(async move { b_session.respond(&mut server).await });

    write_message(
        &mut client,
        &SyncMessage::hello(a.device_id, space, vec![3u8; 16]),
    )
    .await
    .unwrap();
    let ack: SyncMessage = read_message(&mut client).await.unwrap();
    assert!(matches!(ack, SyncMessage::HelloAck { accepted: true, .. }));

    write_message(
        &mut client,
        &SyncMessage::SyncRequest {
            space_id: space,
            categories: Vec::new(),
            clock: SpaceClock::new(),
        },
    )
    .await
    .unwrap();
    let _request: SyncMessage = read_message(&mut client).await.unwrap();

    let garbage = SyncDelta {
        operation: SyncOperation::Create,
        entity_type: "note".into(),
        entity_id: EntityId::new(),
        payload: Some(EncryptedPayload {
            nonce: [0u8; 12],
            ciphertext: vec![0u8; 48],
        }),
        content_hash: "0".repeat(64),
        sequence: 1,
        origin_device_id: a.device_id,
        timestamp: now_ms(),
    };
    write_message(
        &mut client,
        &SyncMessage::DeltaBatch {
            batch_number: 1,
            total_batches: 1,
            deltas: vec![garbage],
        },
    )
    .await
    .unwrap();
    let _ack: SyncMessage = read_message(&mut client).await.unwrap();

    // B has nothing to push back; expect its single empty batch.
    let empty: SyncMessage = read_message(&mut client).await.unwrap();
    match empty {
        SyncMessage::DeltaBatch {
            batch_number: 1,
            total_batches: 1,
            ref deltas,
        } => assert!(deltas.is_empty()),
        other => panic!("expected empty delta_batch, got {}", other.kind()),
    }
    write_message(&mut client, &SyncMessage::BatchAck { batch_number: 1 })
        .await
        .unwrap();

    write_message(&mut client, &SyncMessage::Complete { pushed: 1, pulled: 0 })
        .await
        .unwrap();
    let done: SyncMessage = read_message(&mut client).await.unwrap();
    assert!(matches!(done, SyncMessage::Complete { .. }));

    let report = responder.await.unwrap().unwrap();
    assert_eq!(report.pulled, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.conflicts, 0);

    let history = b.store.history_for_space(&space, 10).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
}

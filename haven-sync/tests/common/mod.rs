use haven_store::Store;
use haven_sync::content_hash;
use haven_types::{now_ms, Device, DeviceId, DeviceType, EntityId, SpaceId};
use std::sync::Once;

pub const PAIRING_KEY: [u8; 32] = [7u8; 32];

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Peer {
    pub store: Store,
    pub device_id: DeviceId,
}

/// Two devices that have already completed pairing with a shared key.
pub fn paired_peers() -> (Peer, Peer) {
    init_tracing();
    let a = Peer {
        store: Store::open_in_memory().unwrap(),
        device_id: DeviceId::new(),
    };
    let b = Peer {
        store: Store::open_in_memory().unwrap(),
        device_id: DeviceId::new(),
    };
    register(&a.store, b.device_id, "Peer B");
    register(&b.store, a.device_id, "Peer A");
    (a, b)
}

fn register(store: &Store, peer: DeviceId, name: &str) {
    let device = Device::discovered(peer, name, DeviceType::Desktop, "127.0.0.1", 0, now_ms());
    store.upsert_discovered_device(&device).unwrap();
    store.mark_paired(&peer, &[0u8; 32], &PAIRING_KEY).unwrap();
}

pub fn put_note(store: &Store, space: &SpaceId, entity: &EntityId, bytes: &[u8]) {
    store
        .put_local(space, "note", entity, bytes, &content_hash(bytes), now_ms())
        .unwrap();
}

/// Lets wall-clock markers advance so "edited after the last sync" is
/// unambiguous even on a fast machine.
#[allow(dead_code)]
pub fn advance_clock() {
    std::thread::sleep(std::time::Duration::from_millis(5));
}

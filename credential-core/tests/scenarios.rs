//! End-to-end scenarios exercising the credential store core as a caller
//! would, wiring together the AEAD engine, HSM, key store, scheduler, and
//! audit chain.

use std::sync::Arc;
use std::time::Duration;

use credential_core::aead::AeadEngine;
use credential_core::audit::{AuditChain, AuditEventType};
use credential_core::hsm::{migrate, HsmProvider, SoftwareSimulator};
use credential_core::keys::{InMemoryKeyStore, KeyFilter, KeyLifecycleManager, KeyType};
use credential_core::rotation::{PolicyEngine, RotationPolicy};

async fn lifecycle_manager() -> (Arc<dyn HsmProvider>, Arc<KeyLifecycleManager>) {
    let hsm: Arc<dyn HsmProvider> = Arc::new(SoftwareSimulator::new());
    let kek_handle = hsm.generate_key("root-kek", 256).await.unwrap();
    let store = Arc::new(InMemoryKeyStore::new());
    let aead = Arc::new(AeadEngine::new(1_000_000, 24));
    let audit = Arc::new(AuditChain::new());
    let manager = Arc::new(KeyLifecycleManager::new(
        store,
        hsm.clone(),
        aead,
        kek_handle,
        Duration::from_secs(300),
        audit,
    ));
    (hsm, manager)
}

/// Creates a root key-encryption key owned by `owner`, then a data-encryption
/// key wrapped under it, mirroring the tree every credential in the store is
/// required to sit in.
async fn create_dek(manager: &KeyLifecycleManager, key_id: &str, owner: &str, tags: Vec<String>) {
    let kek_id = format!("{key_id}-kek");
    manager
        .create_key(&kek_id, owner, vec![], KeyType::Kek, None)
        .await
        .unwrap();
    manager
        .create_key(key_id, owner, tags, KeyType::Dek, Some(kek_id))
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_encrypt_rotate_decrypt() {
    let (_, manager) = lifecycle_manager().await;
    let aead = AeadEngine::new(1_000_000, 24);

    create_dek(&manager, "payment-dek", "billing-service", vec!["pci-dss".to_string()]).await;

    let v1_material = manager.get_key_material("payment-dek", 1).await.unwrap();
    let payload = aead
        .encrypt("payment-dek", 1, &v1_material, b"4111111111111111", None)
        .await
        .unwrap();

    manager.rotate("payment-dek").await.unwrap();

    let v1_after_rotation = manager.get_key_material("payment-dek", 1).await.unwrap();
    let plaintext = aead.decrypt(&v1_after_rotation, &payload, None).await.unwrap();
    assert_eq!(&plaintext[..], b"4111111111111111");
}

#[tokio::test]
async fn scenario_nonce_uniqueness_under_load() {
    let aead = AeadEngine::new(1_000_000, 24);
    let (_, manager) = lifecycle_manager().await;
    create_dek(&manager, "bulk", "svc", vec![]).await;
    let material = manager.get_key_material("bulk", 1).await.unwrap();

    let mut seen = std::collections::HashSet::new();
    for _ in 0..2_000 {
        let payload = aead.encrypt("bulk", 1, &material, b"x", None).await.unwrap();
        assert!(seen.insert(payload.nonce), "nonce reused under sustained load");
    }
}

#[tokio::test]
async fn scenario_concurrent_rotation_is_serialized() {
    let (_, manager) = lifecycle_manager().await;
    create_dek(&manager, "shared", "svc", vec![]).await;

    let a = manager.clone();
    let b = manager.clone();

    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.rotate("shared").await }),
        tokio::spawn(async move { b.rotate("shared").await }),
    );

    let ra = ra.unwrap();
    let rb = rb.unwrap();
    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    assert!(successes >= 1, "at least one concurrent rotation must succeed");

    let key = manager.list_keys(&KeyFilter::default()).await.unwrap();
    assert_eq!(key.len(), 1);
    assert!(key[0].has_single_current_version());
}

#[tokio::test]
async fn scenario_audit_chain_integrity() {
    let (_, manager) = lifecycle_manager().await;

    create_dek(&manager, "audited", "svc", vec![]).await;
    manager.get_key_material("audited", 1).await.unwrap();
    manager.rotate("audited").await.unwrap();

    let chain = manager.audit();
    assert!(chain.verify().await.is_ok());

    let records = chain.by_key("audited").await;
    let event_types: Vec<AuditEventType> = records.iter().map(|r| r.event_type).collect();
    assert!(event_types.contains(&AuditEventType::KeyCreated));
    assert!(event_types.contains(&AuditEventType::KeyUsed));
    assert!(event_types.contains(&AuditEventType::KeyRotated));
}

#[tokio::test]
async fn scenario_compliance_driven_rotation() {
    let (_, manager) = lifecycle_manager().await;
    create_dek(
        &manager,
        "hipaa-record-key",
        "health-records-service",
        vec!["hipaa".to_string()],
    )
    .await;

    let engine = PolicyEngine::new();
    let policy = RotationPolicy {
        policy_id: "hipaa-policy".to_string(),
        name: "hipaa-default".to_string(),
        key_type: "hipaa".to_string(),
        rotation_interval_days: None,
        max_operations: None,
        window: None,
        required_compliance: vec![credential_core::rotation::ComplianceFramework::Hipaa],
        incident_triggered: false,
        notification_channels: vec![],
        created_by: "compliance-bot".to_string(),
        created_at: chrono::Utc::now(),
        is_active: true,
    };

    let key = manager
        .list_keys(&KeyFilter {
            owner: None,
            tag: Some("hipaa".to_string()),
        })
        .await
        .unwrap()
        .pop()
        .unwrap();

    let evaluation = engine.evaluate(&policy, &key, 0, 400, 400, &[], chrono::Utc::now());
    assert!(evaluation.required);
    assert_eq!(
        evaluation.trigger,
        credential_core::rotation::RotationTrigger::ComplianceDeadline
    );

    manager.rotate(&key.key_id).await.unwrap();
    let rotated = manager
        .list_keys(&KeyFilter {
            owner: None,
            tag: Some("hipaa".to_string()),
        })
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(rotated.current_version, 2);
}

#[tokio::test]
async fn scenario_hsm_migration_round_trip() {
    let source: Arc<dyn HsmProvider> = Arc::new(SoftwareSimulator::new());
    let target: Arc<dyn HsmProvider> = Arc::new(SoftwareSimulator::new());

    let handle = source.generate_key("kek-prod", 256).await.unwrap();
    let ciphertext = source.encrypt(&handle, b"pre-migration data").await.unwrap();

    let report = migrate(&source, &target, &[handle.clone()]).await.unwrap();
    assert!(report.all_succeeded());

    let target_handle = report.handles[0].target_handle.clone().unwrap();

    // Cross-provider check: material encrypted under source before the
    // migration must decrypt under target's new handle, proving the bytes
    // actually transferred rather than target merely being self-consistent.
    let cross_check = target.decrypt(&target_handle, &ciphertext).await.unwrap();
    assert_eq!(&cross_check[..], b"pre-migration data");

    let still_decryptable = source.decrypt(&handle, &ciphertext).await.unwrap();
    assert_eq!(&still_decryptable[..], b"pre-migration data");
}

//! Reconciliation of recorded changes.

use kt_audit_core::{
    AddressChange, AddressChangeAuditResult, KtError, PendingChangeReconciler, SignedKeyList,
};

use crate::support::*;

const ERIN: &str = "erin@example.org";

/// A change created at `NOW - DAY`, promised by epoch 130 and first included
/// at epoch 125.
fn included_change(h: &Harness) -> AddressChange {
    let creation = NOW - DAY;
    let keys = vec![primary_key("erin-key")];
    let skl = skl(&keys, creation + 60).with_min_epoch(125).with_max_epoch(140);
    h.addresses.set_skl_at(ERIN, 130, skl);
    h.epoch(125, creation + HOUR);
    h.proof(125, ERIN, existence(4));

    let change = change(ERIN, 130, creation, &["erin-key"]);
    h.kt.add_change(change.clone());
    change
}

async fn reconcile(h: &Harness, change: &AddressChange) -> AddressChangeAuditResult {
    PendingChangeReconciler::new(&h.context())
        .reconcile(&Harness::user(), change)
        .await
}

fn failure(result: AddressChangeAuditResult) -> KtError {
    match result {
        AddressChangeAuditResult::Failure(e) => e,
        AddressChangeAuditResult::Success => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_expired_missing_change_is_removed() {
    let h = Harness::new();
    let expired = change(ERIN, 130, NOW - 91 * DAY, &["erin-key"]);
    h.kt.add_change(expired.clone());

    let result = reconcile(&h, &expired).await;

    assert!(matches!(result, AddressChangeAuditResult::Success));
    assert!(h.kt.changes().is_empty());
}

#[tokio::test]
async fn test_recent_missing_change_is_kept() {
    let h = Harness::new();
    let recent = change(ERIN, 130, NOW - HOUR, &["erin-key"]);
    h.kt.add_change(recent.clone());

    let result = reconcile(&h, &recent).await;

    assert!(matches!(result, AddressChangeAuditResult::Success));
    assert_eq!(h.kt.changes(), vec![recent]);
}

#[tokio::test]
async fn test_overdue_missing_change_fails() {
    let h = Harness::new();
    let overdue = change(ERIN, 130, NOW - 10 * DAY, &["erin-key"]);
    h.kt.add_change(overdue.clone());

    let result = reconcile(&h, &overdue).await;

    assert!(failure(result).is_verification_failure());
    assert_eq!(h.kt.changes().len(), 1);
}

#[tokio::test]
async fn test_included_change_is_confirmed_and_removed() {
    let h = Harness::new();
    let change = included_change(&h);

    let result = reconcile(&h, &change).await;

    assert!(matches!(result, AddressChangeAuditResult::Success), "{result:?}");
    assert!(h.kt.changes().is_empty());
}

#[tokio::test]
async fn test_current_keys_can_authenticate() {
    let h = Harness::new();
    let mut change = included_change(&h);
    change.public_keys.clear();
    h.addresses
        .set_public(public_address(ERIN, vec![primary_key("erin-key")], None));

    let result = reconcile(&h, &change).await;

    assert!(matches!(result, AddressChangeAuditResult::Success), "{result:?}");
}

#[tokio::test]
async fn test_unauthenticated_skl_is_unverifiable() {
    let h = Harness::new();
    let change = included_change(&h);
    let forged = SignedKeyList::new(skl_data(&[primary_key("erin-key")]), "forged")
        .with_min_epoch(125)
        .with_max_epoch(140);
    h.addresses.set_skl_at(ERIN, 130, forged);

    let err = failure(reconcile(&h, &change).await);

    assert!(matches!(err, KtError::UnverifiableSkl { .. }), "{err}");
    assert_eq!(h.kt.changes().len(), 1);
}

#[tokio::test]
async fn test_skl_signed_before_change_fails() {
    let h = Harness::new();
    let change = included_change(&h);
    let early = skl(&[primary_key("erin-key")], change.creation_timestamp - 1)
        .with_min_epoch(125)
        .with_max_epoch(140);
    h.addresses.set_skl_at(ERIN, 130, early);

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

#[tokio::test]
async fn test_skl_signed_long_after_change_fails() {
    let h = Harness::new();
    let change = included_change(&h);
    let late = skl(
        &[primary_key("erin-key")],
        change.creation_timestamp + MAX_EPOCH_INTERVAL + 1,
    )
    .with_min_epoch(125)
    .with_max_epoch(140);
    h.addresses.set_skl_at(ERIN, 130, late);

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

#[tokio::test]
async fn test_inclusion_after_promised_epoch_fails() {
    let h = Harness::new();
    let change = included_change(&h);
    let late = skl(&[primary_key("erin-key")], change.creation_timestamp + 60)
        .with_min_epoch(135)
        .with_max_epoch(140);
    h.addresses.set_skl_at(ERIN, 130, late);

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

#[tokio::test]
async fn test_slow_inclusion_fails() {
    let h = Harness::new();
    let change = included_change(&h);
    h.epoch(125, change.creation_timestamp + MAX_EPOCH_INTERVAL + 1);

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

fn obsolete_change(h: &Harness, token_timestamp: i64) -> AddressChange {
    let creation = NOW - DAY;
    h.addresses.set_skl_at(
        ERIN,
        130,
        SignedKeyList::obsolete().with_min_epoch(125).with_max_epoch(140),
    );
    h.epoch(125, creation + HOUR);
    h.proof(125, ERIN, obsolescence(5, token_timestamp));

    let mut change = change(ERIN, 130, creation, &[]);
    change.is_obsolete = true;
    h.kt.add_change(change.clone());
    change
}

#[tokio::test]
async fn test_obsolescence_within_window_is_confirmed() {
    let h = Harness::new();
    let change = obsolete_change(&h, NOW - DAY + 60);

    let result = reconcile(&h, &change).await;

    assert!(matches!(result, AddressChangeAuditResult::Success), "{result:?}");
    assert!(h.kt.changes().is_empty());
}

#[tokio::test]
async fn test_obsolescence_token_too_old_fails() {
    let h = Harness::new();
    let creation = NOW - DAY;
    let change = obsolete_change(&h, creation - (MAX_EPOCH_INTERVAL + 10));

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
    assert_eq!(h.kt.changes().len(), 1);
}

#[tokio::test]
async fn test_obsolescence_token_too_new_fails() {
    let h = Harness::new();
    let creation = NOW - DAY;
    let change = obsolete_change(&h, creation + MAX_EPOCH_INTERVAL + 10);

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

#[tokio::test]
async fn test_obsolescence_record_needs_obsolescence_proof() {
    let h = Harness::new();
    let change = obsolete_change(&h, NOW - DAY);
    h.proof(125, ERIN, existence(5));

    assert!(failure(reconcile(&h, &change).await).is_verification_failure());
}

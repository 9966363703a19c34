//! Property-based tests for the checkpoint ratchet and time windows.

use proptest::prelude::*;

use kt_audit_core::checkpoint::ensure_monotonic;
use kt_audit_core::email::normalize_email;
use kt_audit_core::proof::obsolescence_token_timestamp;
use kt_audit_core::{AddressAuditor, Boundary, KtConfig, VerifiedEpochData};

use crate::support::*;

/// Strategy for checkpoints.
fn checkpoint() -> impl Strategy<Value = VerifiedEpochData> {
    (0u64..1_000, 0u64..1_000, 0i64..NOW)
        .prop_map(|(epoch, revision, created)| VerifiedEpochData::new(epoch, revision, created))
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Audit an address with checkpoint revision `base` and two new SKLs proven
/// at `base + 1` and `second`.
fn audit_two_versions(base: u64, second: u64) -> bool {
    let h = Harness::new();
    let email = "prop@example.org";
    let keys = vec![primary_key("prop-key")];
    let first_skl = skl(&keys, NOW - 2 * HOUR).with_min_epoch(11).with_max_epoch(11);
    let second_skl = skl(&keys, NOW - HOUR).with_min_epoch(12).with_max_epoch(12);
    h.kt.set_checkpoint(
        &format!("id-{email}"),
        VerifiedEpochData::new(10, base, NOW - DAY),
    );
    h.addresses
        .set_history(email, vec![first_skl, second_skl.clone()]);
    h.epoch(11, NOW - 2 * HOUR);
    h.epoch(12, NOW - HOUR);
    h.proof(11, email, existence(base + 1));
    h.proof(12, email, existence(second));

    let address = user_address(email, keys, Some(second_skl));
    block_on(AddressAuditor::new(&h.context()).audit(&Harness::user(), &address)).is_success()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Monotonicity
    // ========================================================================

    /// An upload passes exactly when no component moves backward.
    #[test]
    fn checkpoint_never_regresses(previous in checkpoint(), next in checkpoint()) {
        let monotonic = next.epoch_id >= previous.epoch_id
            && next.revision >= previous.revision
            && next.skl_creation_time >= previous.skl_creation_time;
        prop_assert_eq!(ensure_monotonic(&previous, &next).is_ok(), monotonic);
    }

    /// Any regression is reported as a rollback.
    #[test]
    fn regression_is_rollback(previous in checkpoint(), back in 1u64..100) {
        let next = VerifiedEpochData::new(
            previous.epoch_id,
            previous.revision.saturating_sub(back),
            previous.skl_creation_time,
        );
        prop_assume!(next.revision < previous.revision);
        let err = ensure_monotonic(&previous, &next).unwrap_err();
        prop_assert!(err.is_rollback());
    }

    // ========================================================================
    // Freshness window
    // ========================================================================

    /// Inclusive bounds accept the boundary itself, exclusive bounds do not.
    #[test]
    fn freshness_window(offset in -1_000i64..1_000) {
        let inclusive = KtConfig::default();
        let exclusive = KtConfig::default().with_boundary(Boundary::Exclusive);
        let ts = NOW - MAX_EPOCH_INTERVAL + offset;

        prop_assert_eq!(inclusive.is_fresh(ts, NOW), offset >= 0);
        prop_assert_eq!(exclusive.is_fresh(ts, NOW), offset > 0);
    }

    // ========================================================================
    // Gap detection
    // ========================================================================

    /// Consecutive versions must have consecutive revisions.
    #[test]
    fn revision_gap_detected(base in 0u64..50, step in 0u64..5) {
        let ok = audit_two_versions(base, base + 1 + step);
        prop_assert_eq!(ok, step == 1);
    }

    #[test]
    fn revision_regression_detected(base in 1u64..50, back in 1u64..5) {
        prop_assume!(back <= base);
        prop_assert!(!audit_two_versions(base, base + 1 - back));
    }

    // ========================================================================
    // Encodings
    // ========================================================================

    #[test]
    fn token_timestamp_decodes(ts in 0i64..i64::MAX, tail in "[0-9a-f]{0,64}") {
        let token = format!("{ts:016x}{tail}");
        prop_assert_eq!(obsolescence_token_timestamp(&token).unwrap(), ts);
    }

    #[test]
    fn normalize_is_idempotent(local in "[A-Za-z0-9._+-]{1,20}", domain in "[a-z]{1,10}\\.org") {
        let email = format!("{local}@{domain}");
        let once = normalize_email(&email);
        prop_assert_eq!(normalize_email(&once), once);
    }
}

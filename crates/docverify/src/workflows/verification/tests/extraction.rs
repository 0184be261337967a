use super::common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::workflows::verification::domain::{CaseStatus, DocumentKind, SlotStatus};
use crate::workflows::verification::extraction::{spawn_sweeper, ExtractionError, ExtractionOutcome};
use crate::workflows::verification::memory::InMemorySlotRepository;
use crate::workflows::verification::repository::ProfileWriteError;

#[tokio::test]
async fn approval_projects_fields_into_the_profile_once() {
    let harness = build_service();
    let case = case_id("user-10");
    harness.upload(&case, DocumentKind::TaxId).await;

    let approved = harness
        .service
        .approve(&reviewer(), &case, DocumentKind::TaxId)
        .await
        .expect("approve");
    assert!(approved.slot.extracted_at.is_some());

    let profile = harness.profiles.profile(&case);
    assert_eq!(profile["panNumber"], json!("ABCDE1234F"));
    assert_eq!(profile["panName"], json!("Asha Rao"));
    assert_eq!(profile["dateOfBirth"], json!("1991-07-14"));
    assert!(profile.contains_key("taxIdExtractedAt"));
    assert!(!profile.contains_key("nationalIdNumber"));

    let again = harness
        .service
        .extraction()
        .on_slot_approved(&case, DocumentKind::TaxId, &tax_id_fields())
        .await
        .expect("second attempt");
    assert_eq!(again, ExtractionOutcome::AlreadyExtracted);
    assert_eq!(harness.profiles.writes(), 1);
}

#[tokio::test]
async fn failed_profile_write_keeps_the_approval_and_is_swept_later() {
    let harness = build_service_with(
        Arc::new(InMemorySlotRepository::default()),
        MemoryProfiles::failing(),
    );
    let case = case_id("user-11");
    harness.upload(&case, DocumentKind::BankProof).await;

    let approved = harness
        .service
        .approve(&reviewer(), &case, DocumentKind::BankProof)
        .await
        .expect("approval stands despite profile outage");
    assert_eq!(approved.slot.status, SlotStatus::Approved);
    assert!(approved.slot.extracted_at.is_none());
    assert!(harness.profiles.profile(&case).is_empty());

    harness.profiles.set_failing(false);
    let report = harness.service.extraction().sweep().await.expect("sweep");
    assert_eq!(report.extracted, 1);
    assert_eq!(report.failed, 0);

    let slot = harness.slot(&case, DocumentKind::BankProof);
    assert_eq!(slot.status, SlotStatus::Approved);
    assert!(slot.extracted_at.is_some());
    assert_eq!(
        harness.profiles.profile(&case)["ifscCode"],
        json!("HDFC0001234")
    );

    let idle = harness.service.extraction().sweep().await.expect("sweep");
    assert_eq!(idle.extracted, 0);
    assert_eq!(harness.profiles.writes(), 1);
}

#[tokio::test]
async fn slow_profile_write_times_out_without_marking_the_slot() {
    let harness = build_service_with(
        Arc::new(InMemorySlotRepository::default()),
        MemoryProfiles::slow(Duration::from_millis(400)),
    );
    let case = case_id("user-12");
    harness.upload(&case, DocumentKind::NationalId).await;
    harness
        .service
        .approve(&reviewer(), &case, DocumentKind::NationalId)
        .await
        .expect("approve returns after the timeout");

    let result = harness
        .service
        .extraction()
        .on_slot_approved(&case, DocumentKind::NationalId, &national_id_fields())
        .await;
    assert!(matches!(
        result,
        Err(ExtractionError::ProfileWrite(ProfileWriteError::Timeout(100)))
    ));
    assert!(harness
        .slot(&case, DocumentKind::NationalId)
        .extracted_at
        .is_none());
    assert_eq!(harness.profiles.writes(), 0);
}

#[tokio::test]
async fn concurrent_attempts_write_the_profile_once() {
    let harness = build_service_with(
        Arc::new(InMemorySlotRepository::default()),
        MemoryProfiles::slow(Duration::from_millis(20)),
    );
    let case = case_id("user-13");
    harness.upload(&case, DocumentKind::TaxId).await;

    harness.profiles.set_failing(true);
    harness
        .service
        .approve(&reviewer(), &case, DocumentKind::TaxId)
        .await
        .expect("approve");
    harness.profiles.set_failing(false);

    let pipeline = harness.service.extraction().clone();
    let fields = tax_id_fields();
    let (first, second) = tokio::join!(
        pipeline.on_slot_approved(&case, DocumentKind::TaxId, &fields),
        pipeline.on_slot_approved(&case, DocumentKind::TaxId, &fields),
    );

    let outcomes = [first.expect("first"), second.expect("second")];
    assert_eq!(
        outcomes
            .iter()
            .filter(|outcome| matches!(outcome, ExtractionOutcome::Extracted { .. }))
            .count(),
        1
    );
    assert!(outcomes.contains(&ExtractionOutcome::InFlight));
    assert_eq!(harness.profiles.writes(), 1);
}

#[tokio::test]
async fn unapproved_slots_are_not_extracted() {
    let harness = build_service();
    let case = case_id("user-14");
    harness.upload(&case, DocumentKind::TaxId).await;

    let outcome = harness
        .service
        .extraction()
        .on_slot_approved(&case, DocumentKind::TaxId, &tax_id_fields())
        .await
        .expect("attempt");
    assert_eq!(outcome, ExtractionOutcome::NotApproved);
    assert_eq!(harness.profiles.writes(), 0);
}

#[tokio::test]
async fn finalizing_the_case_reconciles_earlier_failures() {
    let harness = build_service_with(
        Arc::new(InMemorySlotRepository::default()),
        MemoryProfiles::failing(),
    );
    let case = case_id("user-15");
    harness.upload_all(&case).await;

    for kind in [DocumentKind::TaxId, DocumentKind::NationalId] {
        harness
            .service
            .approve(&reviewer(), &case, kind)
            .await
            .expect("approve");
    }
    assert_eq!(harness.profiles.writes(), 0);

    harness.profiles.set_failing(false);
    let last = harness
        .service
        .approve(&reviewer(), &case, DocumentKind::BankProof)
        .await
        .expect("approve");

    assert_eq!(last.case.status(), CaseStatus::Approved);
    assert!(last.case.slots.iter().all(|slot| slot.extracted_at.is_some()));
    assert_eq!(harness.profiles.writes(), 3);
    let profile = harness.profiles.profile(&case);
    for key in ["taxIdExtractedAt", "nationalIdExtractedAt", "bankProofExtractedAt"] {
        assert!(profile.contains_key(key), "missing {key}");
    }
}

#[tokio::test]
async fn background_sweeper_picks_up_pending_slots() {
    let harness = build_service_with(
        Arc::new(InMemorySlotRepository::default()),
        MemoryProfiles::failing(),
    );
    let case = case_id("user-16");
    harness.upload(&case, DocumentKind::NationalId).await;
    harness
        .service
        .approve(&reviewer(), &case, DocumentKind::NationalId)
        .await
        .expect("approve");

    assert!(spawn_sweeper(harness.service.extraction().clone(), Duration::ZERO).is_none());

    harness.profiles.set_failing(false);
    let handle = spawn_sweeper(
        harness.service.extraction().clone(),
        Duration::from_millis(10),
    )
    .expect("sweeper runs");
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.abort();

    assert!(harness
        .slot(&case, DocumentKind::NationalId)
        .extracted_at
        .is_some());
    assert_eq!(harness.profiles.writes(), 1);
}

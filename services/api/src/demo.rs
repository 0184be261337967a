use crate::infra::InMemoryAdapters;
use chrono::NaiveDate;
use clap::Args;
use docverify::config::WorkflowConfig;
use docverify::error::AppError;
use docverify::workflows::verification::{
    AccountType, Actor, BankProofFields, CaseId, CaseSnapshot, DocumentKind,
    InMemorySlotRepository, NationalIdFields, SlotFields, TaxIdFields, VerificationService,
};
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Identifier of the demo submitter; it doubles as the case id.
    #[arg(long, default_value = "demo-user")]
    pub(crate) case_id: String,
    /// Stop once the bank proof has been rejected instead of re-uploading it.
    #[arg(long)]
    pub(crate) stop_after_rejection: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            case_id: "demo-user".to_string(),
            stop_after_rejection: false,
        }
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        case_id,
        stop_after_rejection,
    } = args;

    let adapters = InMemoryAdapters::new();
    let service = Arc::new(VerificationService::new(
        Arc::new(InMemorySlotRepository::default()),
        adapters.collaborators(),
        &WorkflowConfig::default(),
    ));

    let case = CaseId(case_id);
    let owner = Actor::submitter(&case);
    let reviewer = Actor::reviewer("demo-reviewer");
    let mut feed = service.subscribe(&owner, &case)?;

    println!("Identity verification demo for case {case}");

    println!("\nSubmitter uploads all three documents");
    for kind in DocumentKind::ALL {
        service.put_fields(&owner, &case, kind, demo_fields(kind))?;
        let mutation = service
            .upload_file(&owner, &case, kind, demo_scan(kind), "application/pdf")
            .await?;
        println!(
            "- {:<11} -> {} (case {})",
            kind.label(),
            mutation.slot.status,
            mutation.case.status()
        );
    }

    println!("\nReviewer decisions");
    for kind in [DocumentKind::TaxId, DocumentKind::NationalId] {
        let mutation = service.approve(&reviewer, &case, kind).await?;
        println!(
            "- approve {:<11} -> case {}",
            kind.label(),
            mutation.case.status()
        );
    }
    let rejected = service
        .reject(
            &reviewer,
            &case,
            DocumentKind::BankProof,
            "Account holder name does not match the tax id",
        )
        .await?;
    println!(
        "- reject  {:<11} -> case {} (reason: {})",
        DocumentKind::BankProof.label(),
        rejected.case.status(),
        rejected
            .slot
            .rejection_reason
            .as_deref()
            .unwrap_or("none given")
    );

    if !stop_after_rejection {
        println!("\nSubmitter replaces the bank proof");
        let resubmitted = service
            .upload_file(
                &owner,
                &case,
                DocumentKind::BankProof,
                demo_scan(DocumentKind::BankProof),
                "image/png",
            )
            .await?;
        println!(
            "- {:<11} -> {} (case {})",
            DocumentKind::BankProof.label(),
            resubmitted.slot.status,
            resubmitted.case.status()
        );

        let approved = service
            .approve(&reviewer, &case, DocumentKind::BankProof)
            .await?;
        println!(
            "- approve {:<11} -> case {}",
            DocumentKind::BankProof.label(),
            approved.case.status()
        );
    }

    render_case(&service.case(&case)?);

    println!("\nSnapshots delivered to the submitter's live view");
    while let Ok(Some(snapshot)) =
        tokio::time::timeout(Duration::from_millis(20), feed.next_snapshot()).await
    {
        println!(
            "- revision {:>2}: {}",
            snapshot.case.revision,
            snapshot.status()
        );
    }

    println!("\nProfile fields written by extraction");
    for (key, value) in adapters.profiles.profile(&case) {
        println!("- {key}: {value}");
    }

    let sent = adapters.notifications.sent();
    if sent.is_empty() {
        println!("\nNotifications: none dispatched");
    } else {
        println!("\nNotifications");
        for notification in sent {
            println!(
                "- template={} -> {}",
                notification.template, notification.destination
            );
        }
    }
    println!(
        "\nObjects held in storage: {}",
        adapters.storage.object_count()
    );

    Ok(())
}

fn render_case(snapshot: &CaseSnapshot) {
    println!("\nCase {} is {}", snapshot.case_id(), snapshot.status());
    if let Some(submitted_at) = snapshot.case.submitted_at {
        println!("  submitted at {submitted_at}");
    }
    if let Some(finalized_at) = snapshot.case.finalized_at {
        println!("  finalized at {finalized_at}");
    }
    for slot in snapshot.slots.iter() {
        let extracted = if slot.extracted_at.is_some() {
            "extracted"
        } else {
            "not extracted"
        };
        println!(
            "  - {:<11} {:<9} {}",
            slot.kind.label(),
            slot.status.label(),
            extracted
        );
    }
}

fn demo_scan(kind: DocumentKind) -> Vec<u8> {
    format!("%PDF-1.7 demo scan of {}", kind.label()).into_bytes()
}

fn demo_fields(kind: DocumentKind) -> SlotFields {
    match kind {
        DocumentKind::TaxId => SlotFields::TaxId(TaxIdFields {
            pan_number: "ABCPR1234K".to_string(),
            name_on_card: "Meera Pillai".to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1993, 3, 9).unwrap_or_default(),
        }),
        DocumentKind::NationalId => SlotFields::NationalId(NationalIdFields {
            id_number: "4321 8765 2109".to_string(),
            name_on_card: "Meera Pillai".to_string(),
            address: "22 Marine Drive, Kochi".to_string(),
        }),
        DocumentKind::BankProof => SlotFields::BankProof(BankProofFields {
            account_holder_name: "Meera Pillai".to_string(),
            account_number: "918273645501".to_string(),
            confirm_account_number: "918273645501".to_string(),
            bank_name: "Federal Bank".to_string(),
            ifsc_code: "FDRL0001122".to_string(),
            branch_name: "Ernakulam South".to_string(),
            account_type: AccountType::Savings,
        }),
    }
}

/// admission walkthrough - enroll, allocate, schedule, collect, refund
use fee_allocation_rs::chrono::{NaiveDate, TimeZone, Utc};
use fee_allocation_rs::{
    AdmissionRequest, AllocationPlan, AllocationStep, Confirmation, Credentials, ExecutionContext,
    FeeConfig, FeeDesk, InMemoryBackend, Money, Operator, PaymentInput, PaymentMode, PlanType,
    SafeTimeProvider, TimeSource, Uuid,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // seed a course with one batch and one student
    let mut backend = InMemoryBackend::new();
    let course = backend.add_course("Full Stack Development", Some(Money::from_major(25_000)));
    let batch = backend.add_batch(course, "Weekend");
    let student = backend.add_student(batch, "A. Student");

    let ctx = ExecutionContext::new(
        Operator { id: Uuid::new_v4(), name: "front desk".to_string() },
        Credentials::bearer("demo-token"),
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).single().ok_or("bad time")?)),
    );
    let mut desk = FeeDesk::from_config(backend, FeeConfig::default())?;

    // enroll and look up the fee
    let admission = desk.admit(
        &ctx,
        AdmissionRequest {
            course_id: course,
            batch_id: batch,
            student_id: student,
            expected_base_amount: None,
            structure_name: Some("FSD weekend 2024".to_string()),
        },
    )?;
    let proposal = match admission.allocation {
        AllocationStep::Planned(AllocationPlan::NeedsConfirmation(proposal)) => proposal,
        other => return Err(format!("unexpected allocation step: {other:?}").into()),
    };
    println!("proposed payable: {}", proposal.payable_amount);

    let created = desk.confirm_allocation(&ctx, &proposal, Confirmation::Confirmed)?;
    let record = created.record;

    // quarterly plan with monthly due dates
    let mut draft = desk.draft_schedule(&record, PlanType::Quarterly)?;
    draft.assign_monthly_due_dates(NaiveDate::from_ymd_opt(2024, 7, 1).ok_or("bad date")?)?;
    desk.save_installment_plan(&ctx, &record, &draft)?;

    // collect the first installment and part of the second
    let receipt = desk.record_payment(
        &ctx,
        &record,
        PaymentInput {
            amount: Money::from_major(9_000),
            date: NaiveDate::from_ymd_opt(2024, 7, 1).ok_or("bad date")?,
            mode: PaymentMode::Upi,
            reference: String::new(),
        },
    )?;
    println!("receipt {} pending {}", receipt.payment.record.reference, receipt.pending_after);

    // refund part of it
    desk.refund(&ctx, &record, receipt.payment.record.id, Money::from_major(1_000), None)?;

    let statement = desk.statement(&ctx, student, record.id)?;
    println!("{}", statement.to_json_pretty()?);
    println!("{} audit events", desk.events.events().len());

    Ok(())
}

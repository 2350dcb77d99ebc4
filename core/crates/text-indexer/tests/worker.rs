use sd_core_text_indexer::{
	BatchOutcome, BatchReport, EngineTag, Emission, Error, ExtractionRecordStore, IndexerContext,
	MediaEnumerator, ProgressStore, ProgressUpdate, WorkScheduler,
};
use sd_ocr::EngineRegistry;
use sd_task_system::{Dispatched, TaskHandle, TaskOutput, TaskStatus, TaskSystemError};

use std::{collections::HashSet, sync::Arc};

use tracing_test::traced_test;

mod common;

use common::{eventually, test_config, text_for, Harness, ScriptedBackend};

fn handle(dispatched: Dispatched<Error>) -> TaskHandle<Error> {
	match dispatched {
		Dispatched::Enqueued(handle) => handle,
		Dispatched::Kept(id) => panic!("expected enqueued work, got kept <id='{id}'>"),
	}
}

fn report(status: Result<TaskStatus<Error>, TaskSystemError>) -> BatchReport {
	match status {
		Ok(TaskStatus::Done((_, TaskOutput::Out(out)))) => *out.downcast::<BatchReport>().unwrap(),
		other => panic!("expected a batch report, got {other:?}"),
	}
}

async fn run(scheduler: &WorkScheduler, batch_size: usize, continuous: bool) -> BatchReport {
	report(
		handle(
			scheduler
				.enqueue_batch(&EngineTag::LATIN, batch_size, continuous)
				.await
				.unwrap(),
		)
		.await,
	)
}

async fn recorded(harness: &Harness) -> HashSet<i64> {
	harness.db.recorded_ids(&EngineTag::LATIN).await.unwrap()
}

#[tokio::test]
#[traced_test]
async fn one_batch_over_a_fresh_universe_is_bounded() {
	let harness = Harness::new().await;
	harness.add_items(1..=100);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let report = run(&scheduler, 10, false).await;

	assert_eq!(report.written, 10);
	assert_eq!(report.outcome, BatchOutcome::Sliced);

	// Newest first
	assert_eq!(recorded(&harness).await, (91..=100).collect());

	let record = harness.db.get_record(&EngineTag::LATIN, 100).await.unwrap().unwrap();
	assert_eq!(record.text, text_for(100));

	let state = harness.db.get(&EngineTag::LATIN).await.unwrap().unwrap();
	assert_eq!(state.total_items, 100);
	assert_eq!(state.processed_items, 10);
	assert!(state.processed_items <= state.total_items);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn failed_items_are_counted_and_dont_abort_the_batch() {
	let harness = Harness::new().await;
	harness.add_items(1..=5);
	harness.add_broken(6);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let report = run(&scheduler, 10, false).await;

	assert_eq!(report.failed, 1);
	assert_eq!(report.written, 5);

	assert!(!harness.db.is_recorded(&EngineTag::LATIN, 6).await.unwrap());
	assert_eq!(recorded(&harness).await, (1..=5).collect());

	let state = harness.db.get(&EngineTag::LATIN).await.unwrap().unwrap();
	assert_eq!(state.failed_items, 1);
	assert_eq!(state.processed_items, 5);
	assert_eq!(state.total_items, 6);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn running_twice_over_the_same_universe_is_a_no_op() {
	let harness = Harness::new().await;
	harness.add_items(1..=20);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let first = run(&scheduler, 10, true).await;
	assert_eq!(first.written, 20);
	assert_eq!(first.outcome, BatchOutcome::Completed);

	let records_before = recorded(&harness).await;
	let calls_before = harness.backend.calls();

	let second = run(&scheduler, 10, false).await;
	assert_eq!(second.written, 0);
	assert_eq!(second.outcome, BatchOutcome::Completed);

	assert_eq!(recorded(&harness).await, records_before);
	assert_eq!(harness.backend.calls(), calls_before);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn continuous_run_takes_slices_until_only_failures_remain() {
	let harness = Harness::new().await;
	harness.add_items(1..=25);
	harness.add_broken(26);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::processing(true),
			Emission::Forced,
		)
		.await
		.unwrap();

	let report = run(&scheduler, 10, true).await;

	assert_eq!(report.outcome, BatchOutcome::Completed);
	assert_eq!(report.written, 25);
	assert_eq!(report.failed, 1);
	assert_eq!(report.slices, 3);

	let state = harness.db.get(&EngineTag::LATIN).await.unwrap().unwrap();
	assert!(!state.is_processing);
	assert_eq!(state.failed_items, 1);
	assert_eq!(state.processed_items, 25);
	assert_eq!(state.total_items, 26);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn pause_stops_before_the_next_item_and_resume_finishes_the_rest() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=5);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::processing(true),
			Emission::Forced,
		)
		.await
		.unwrap();

	let paused = handle(
		scheduler
			.enqueue_batch(&EngineTag::LATIN, 10, false)
			.await
			.unwrap(),
	);

	eventually("first extraction", || async { backend.calls() == 1 }).await;

	harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::flags(false, true),
			Emission::OnChange,
		)
		.await
		.unwrap();

	// Let the item in flight finish
	gate.add_permits(1);

	let report = report(paused.await);
	assert_eq!(report.outcome, BatchOutcome::Paused);
	assert_eq!(report.written, 1);
	assert_eq!(recorded(&harness).await, HashSet::from([5]));
	assert_eq!(backend.calls(), 1);

	harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::flags(true, false),
			Emission::OnChange,
		)
		.await
		.unwrap();
	gate.add_permits(100);

	let report = run(&scheduler, 10, true).await;
	assert_eq!(report.outcome, BatchOutcome::Completed);
	assert_eq!(report.written, 4);

	assert_eq!(recorded(&harness).await, (1..=5).collect());
	assert_eq!(backend.calls(), 5);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn canceled_item_in_flight_is_never_recorded() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=3);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let canceled = handle(
		scheduler
			.enqueue_batch(&EngineTag::LATIN, 10, true)
			.await
			.unwrap(),
	);

	eventually("first extraction", || async { backend.calls() == 1 }).await;

	assert_eq!(scheduler.cancel_all(&EngineTag::LATIN).await, 1);
	gate.add_permits(1);

	assert!(matches!(canceled.await, Ok(TaskStatus::Canceled)));
	assert!(recorded(&harness).await.is_empty());
	assert!(scheduler.work(&EngineTag::LATIN).await.is_empty());

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn missing_engine_fails_the_whole_batch() {
	let harness = Harness::new().await;
	harness.add_items(1..=3);

	let scheduler = WorkScheduler::new(Arc::new(IndexerContext {
		engines: EngineRegistry::new(),
		..harness.context()
	}));

	let status = handle(
		scheduler
			.enqueue_batch(&EngineTag::LATIN, 10, false)
			.await
			.unwrap(),
	)
	.await;

	assert!(matches!(
		status,
		Ok(TaskStatus::Error(Error::EngineUnavailable(tag))) if tag == EngineTag::LATIN
	));
	assert_eq!(harness.backend.calls(), 0);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn unavailable_media_source_leaves_progress_untouched() {
	let harness = Harness::new().await;
	harness.add_items(1..=5);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let before = harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::counts(5, 0).with_processing(true),
			Emission::Forced,
		)
		.await
		.unwrap();

	harness.enumerator.set_unavailable(true);

	let status = handle(
		scheduler
			.enqueue_batch(&EngineTag::LATIN, 10, false)
			.await
			.unwrap(),
	)
	.await;

	assert!(matches!(status, Ok(TaskStatus::Error(Error::Enumeration(_)))));

	let after = harness.db.get(&EngineTag::LATIN).await.unwrap().unwrap();
	assert!(after.same_progress(&before));
	assert_eq!(after.last_updated, before.last_updated);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn single_item_mode_only_touches_that_item() {
	let harness = Harness::new().await;
	let items = harness.add_items(1..=3);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	harness
		.db
		.upsert(
			&EngineTag::LATIN,
			ProgressUpdate::counts(3, 0),
			Emission::Forced,
		)
		.await
		.unwrap();

	let first = report(
		handle(
			scheduler
				.enqueue_single(&EngineTag::LATIN, items[1].clone())
				.await
				.unwrap(),
		)
		.await,
	);
	assert_eq!(first.written, 1);
	assert_eq!(first.outcome, BatchOutcome::Completed);
	assert_eq!(recorded(&harness).await, HashSet::from([2]));

	let state = harness.db.get(&EngineTag::LATIN).await.unwrap().unwrap();
	assert_eq!(state.processed_items, 1);
	assert!(!state.is_processing);

	let again = report(
		handle(
			scheduler
				.enqueue_single(&EngineTag::LATIN, items[1].clone())
				.await
				.unwrap(),
		)
		.await,
	);
	assert_eq!(again.written, 0);
	assert_eq!(again.skipped, 1);
	assert_eq!(harness.backend.calls(), 1);

	assert_eq!(harness.enumerator.count().await.unwrap(), 3);

	scheduler.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn outstanding_single_item_work_is_kept() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	let items = harness.add_items([1]);
	let scheduler = WorkScheduler::new(Arc::new(harness.context()));

	let first = handle(
		scheduler
			.enqueue_single(&EngineTag::LATIN, items[0].clone())
			.await
			.unwrap(),
	);

	let second = scheduler
		.enqueue_single(&EngineTag::LATIN, items[0].clone())
		.await
		.unwrap();
	assert!(matches!(second, Dispatched::Kept(id) if id == first.task_id()));

	gate.add_permits(1);
	assert_eq!(report(first.await).written, 1);
	assert_eq!(backend.calls(), 1);

	scheduler.shutdown().await;
}

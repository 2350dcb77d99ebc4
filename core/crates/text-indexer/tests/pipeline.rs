use sd_core_text_indexer::{
	Command, DisplayState, EngineTag, Emission, ExtractionRecord, ExtractionRecordStore,
	IndexerConfig, KeepAliveFacility, KeepAliveSupervisor, MediaChange, MonitorExit, NotificationSurface, ProgressMonitor,
	ProgressStore, ProgressUpdate, Renderer,
};

use std::{
	sync::{atomic::Ordering, Arc},
	time::Duration,
};

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

mod common;

use common::{eventually, test_config, Harness, ScriptedBackend, SurfaceEvent};

const LATIN: EngineTag = EngineTag::LATIN;

async fn wait_until_complete(harness: &Harness) {
	eventually("indexing completion", || async {
		harness
			.db
			.get(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| state.is_complete() && !state.is_processing)
	})
	.await;
}

fn completed_notices(harness: &Harness) -> usize {
	harness
		.surface
		.events()
		.iter()
		.filter(|event| {
			matches!(event, SurfaceEvent::Show(view) if view.display == DisplayState::Completed)
		})
		.count()
}

#[tokio::test]
#[traced_test]
async fn start_indexes_everything_and_lets_go_of_the_keep_alive() {
	let harness = Harness::new().await;
	harness.add_items(1..=15);
	let indexer = harness.indexer();

	let state = indexer.start(&LATIN).await.unwrap();
	assert!(state.is_processing);
	assert_eq!(state.total_items, 15);

	wait_until_complete(&harness).await;

	assert_eq!(harness.db.count(&LATIN).await.unwrap(), 15);
	assert_eq!(indexer.stats(&LATIN).await.unwrap().count, 15);
	assert_eq!(
		indexer.search(&LATIN, "text of 7", 10).await.unwrap()[0].item_id,
		7
	);
	assert!(indexer.get_record(&LATIN, 15).await.unwrap().is_some());

	eventually("keep-alive release", || async {
		!harness.keep_alive.is_holding()
	})
	.await;
	assert_eq!(harness.keep_alive.acquired.load(Ordering::SeqCst), 1);
	assert_eq!(harness.keep_alive.released.load(Ordering::SeqCst), 1);

	eventually("monitor exit", || async { !indexer.is_monitoring(&LATIN).await }).await;
	assert_eq!(completed_notices(&harness), 1);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn new_item_gets_a_single_item_job() {
	let harness = Harness::new().await;
	harness.add_items(1..=10);
	let indexer = harness.indexer();

	indexer.start(&LATIN).await.unwrap();
	wait_until_complete(&harness).await;
	assert_eq!(harness.backend.calls(), 10);

	let new_item = harness.add_items([11]).remove(0);
	indexer
		.changes()
		.send(MediaChange::Added(new_item))
		.await
		.unwrap();

	eventually("new item record", || async {
		harness.db.is_recorded(&LATIN, 11).await.unwrap()
	})
	.await;

	// Only the new item went through recognition
	assert_eq!(harness.backend.calls(), 11);

	eventually("progress catching up", || async {
		harness
			.db
			.get(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| state.total_items == 11 && state.processed_items == 11)
	})
	.await;

	assert!(!indexer.progress(&LATIN).await.unwrap().unwrap().is_processing);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn ambiguous_change_catches_up_the_backlog() {
	let harness = Harness::new().await;
	harness.add_items(1..=5);
	let indexer = harness.indexer();

	indexer.start(&LATIN).await.unwrap();
	wait_until_complete(&harness).await;

	harness.add_items(6..=8);
	indexer.changes().send(MediaChange::Unknown).await.unwrap();

	eventually("backlog indexed", || async {
		harness.db.count(&LATIN).await.unwrap() == 8
	})
	.await;
	wait_until_complete(&harness).await;

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn records_of_vanished_items_dont_count_as_progress() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=3);

	// Item 1 is still around, 100 and 101 left the media source without being cleaned up
	for item_id in [1, 100, 101] {
		harness
			.db
			.insert_if_absent(&ExtractionRecord {
				engine: LATIN,
				item_id,
				text: format!("text of {item_id}"),
				confidence: 0.9,
				block_count: 1,
				extracted_at: Utc::now(),
				processing_time: Duration::from_millis(5),
			})
			.await
			.unwrap();
	}

	let indexer = harness.indexer();

	let state = indexer.start(&LATIN).await.unwrap();
	assert_eq!(state.total_items, 3);
	assert_eq!(state.processed_items, 1);
	assert!(state.is_processing);
	assert!(!state.is_complete());

	eventually("first extraction", || async { backend.calls() == 1 }).await;
	assert!(indexer.is_monitoring(&LATIN).await);

	let polled = indexer.progress(&LATIN).await.unwrap().unwrap();
	assert_eq!(polled.processed_items, 1);
	assert!(!polled.is_complete());

	gate.add_permits(100);
	wait_until_complete(&harness).await;

	let state = indexer.progress(&LATIN).await.unwrap().unwrap();
	assert_eq!(state.processed_items, 3);
	for item_id in [2, 3] {
		assert!(indexer.get_record(&LATIN, item_id).await.unwrap().is_some());
	}

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn cancel_mid_batch_stops_everything() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=5);
	let indexer = harness.indexer();

	indexer.start(&LATIN).await.unwrap();
	eventually("first extraction", || async { backend.calls() == 1 }).await;

	indexer.cancel(&LATIN).await.unwrap();

	let state = indexer.progress(&LATIN).await.unwrap().unwrap();
	assert!(!state.is_processing);
	assert!(!state.is_paused);
	assert!(harness.surface.events().contains(&SurfaceEvent::Hide(LATIN)));

	gate.add_permits(100);

	eventually("work drained", || async { indexer.work(&LATIN).await.is_empty() }).await;
	eventually("keep-alive release", || async {
		!harness.keep_alive.is_holding()
	})
	.await;
	eventually("monitor exit", || async { !indexer.is_monitoring(&LATIN).await }).await;

	sleep(Duration::from_millis(100)).await;
	assert_eq!(harness.db.count(&LATIN).await.unwrap(), 0);
	assert_eq!(backend.calls(), 1);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn pause_and_resume_through_the_command_channel() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=6);
	let indexer = harness.indexer();
	let commands = indexer.commands();

	indexer.start(&LATIN).await.unwrap();
	eventually("first extraction", || async { backend.calls() == 1 }).await;

	commands.send((LATIN, Command::Pause)).await.unwrap();

	eventually("pause", || async {
		indexer
			.progress(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| state.is_paused && !state.is_processing)
	})
	.await;

	gate.add_permits(100);
	eventually("work drained", || async { indexer.work(&LATIN).await.is_empty() }).await;

	assert!(harness.db.count(&LATIN).await.unwrap() <= 1);
	assert!(harness.surface.events().iter().any(
		|event| matches!(event, SurfaceEvent::Show(view) if view.display == DisplayState::Paused)
	));

	// Paused engines stay monitored but aren't kept alive
	assert!(indexer.is_monitoring(&LATIN).await);
	eventually("keep-alive release", || async {
		!indexer.is_kept_alive(&LATIN).await
	})
	.await;

	commands.send((LATIN, Command::Resume)).await.unwrap();

	wait_until_complete(&harness).await;
	assert_eq!(
		harness.db.recorded_ids(&LATIN).await.unwrap(),
		(1..=6).collect()
	);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn watchdog_clears_a_stalled_engine() {
	let harness = Harness::with(
		ScriptedBackend::open(),
		IndexerConfig {
			stall_threshold_polls: 3,
			..test_config()
		},
	)
	.await;
	harness.add_items(1..=3);
	let ctx = Arc::new(harness.context());

	// Processing with no worker around, as after a crash
	harness
		.db
		.upsert(
			&LATIN,
			ProgressUpdate::counts(3, 0).with_processing(true),
			Emission::Forced,
		)
		.await
		.unwrap();

	let monitor = ProgressMonitor::new(
		LATIN,
		Arc::clone(&ctx),
		Arc::new(Renderer::new(
			Arc::clone(&harness.surface) as Arc<dyn NotificationSurface>
		)),
	);

	let exit = timeout(
		Duration::from_secs(5),
		monitor.run(CancellationToken::new()),
	)
	.await
	.unwrap();

	assert_eq!(exit, MonitorExit::Idle);

	let state = harness.db.get(&LATIN).await.unwrap().unwrap();
	assert!(!state.is_processing);
	assert!(!state.is_paused);
	assert_eq!(state.processed_items, 0);
	assert!(logs_contain("Indexing stalled"));
}

#[tokio::test]
#[traced_test]
async fn monitor_without_stored_progress_exits() {
	let harness = Harness::new().await;
	let ctx = Arc::new(harness.context());

	let monitor = ProgressMonitor::new(
		LATIN,
		ctx,
		Arc::new(Renderer::new(
			Arc::clone(&harness.surface) as Arc<dyn NotificationSurface>
		)),
	);

	assert_eq!(
		timeout(Duration::from_secs(5), monitor.run(CancellationToken::new()))
			.await
			.unwrap(),
		MonitorExit::Absent
	);
}

#[tokio::test]
#[traced_test]
async fn monitoring_is_restored_after_a_restart() {
	let harness = Harness::new().await;
	harness.add_items(1..=4);

	// Left processing by a previous run that died
	harness
		.db
		.upsert(
			&LATIN,
			ProgressUpdate::counts(4, 0).with_processing(true),
			Emission::Forced,
		)
		.await
		.unwrap();

	let indexer = harness.indexer();
	assert_eq!(indexer.ensure_monitoring().await.unwrap(), 1);
	assert!(harness.keep_alive.is_holding());

	wait_until_complete(&harness).await;
	assert_eq!(harness.db.count(&LATIN).await.unwrap(), 4);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn paused_engine_is_monitored_but_not_resumed_after_a_restart() {
	let harness = Harness::new().await;
	harness.add_items(1..=4);

	harness
		.db
		.upsert(
			&LATIN,
			ProgressUpdate::counts(4, 0).with_processing(false),
			Emission::Forced,
		)
		.await
		.unwrap();
	harness
		.db
		.upsert(&LATIN, ProgressUpdate::flags(false, true), Emission::Forced)
		.await
		.unwrap();

	let indexer = harness.indexer();
	assert_eq!(indexer.ensure_monitoring().await.unwrap(), 1);
	assert!(indexer.is_monitoring(&LATIN).await);

	sleep(Duration::from_millis(200)).await;
	assert_eq!(harness.backend.calls(), 0);
	assert!(!harness.keep_alive.is_holding());

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn force_restart_starts_over_from_the_media_source() {
	let harness = Harness::new().await;
	harness.add_items(1..=5);
	harness.add_broken(6);
	let indexer = harness.indexer();

	indexer.start(&LATIN).await.unwrap();

	eventually("first pass", || async {
		indexer
			.progress(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| !state.is_processing && state.failed_items == 1)
	})
	.await;
	assert_eq!(harness.db.count(&LATIN).await.unwrap(), 5);

	let restarted = indexer.force_restart(&LATIN).await.unwrap();
	assert!(restarted.is_processing);
	assert_eq!(restarted.failed_items, 0);
	assert_eq!(restarted.total_items, 6);
	assert_eq!(restarted.processed_items, 5);

	eventually("second pass", || async {
		indexer
			.progress(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| !state.is_processing && state.failed_items == 1)
	})
	.await;

	// Recorded items weren't extracted again
	assert_eq!(harness.backend.calls(), 5);

	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn progress_indicator_visibility() {
	let (backend, gate) = ScriptedBackend::gated();
	let harness = Harness::with(Arc::clone(&backend), test_config()).await;
	harness.add_items(1..=3);
	let indexer = harness.indexer();

	indexer.start(&LATIN).await.unwrap();

	let dismissed = indexer.dismiss_progress(&LATIN).await.unwrap();
	assert!(dismissed.dismissed);
	assert!(harness.surface.events().iter().any(
		|event| matches!(event, SurfaceEvent::Show(view) if view.dismissed)
	));

	indexer
		.commands()
		.send((LATIN, Command::ViewProgress))
		.await
		.unwrap();

	eventually("indicator back in foreground", || async {
		indexer
			.progress(&LATIN)
			.await
			.unwrap()
			.is_some_and(|state| !state.dismissed)
	})
	.await;
	assert!(harness.surface.events().contains(&SurfaceEvent::Hide(LATIN)));

	indexer.cancel(&LATIN).await.unwrap();
	gate.add_permits(100);
	indexer.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn keep_alive_is_held_while_any_engine_processes() {
	let harness = Harness::new().await;
	let progress = Arc::clone(&harness.db) as Arc<dyn ProgressStore>;

	let supervisor = Arc::new(KeepAliveSupervisor::new(
		Arc::clone(&harness.keep_alive) as Arc<dyn KeepAliveFacility>,
		Arc::clone(&progress),
		Duration::from_millis(30),
	));

	for engine in [EngineTag::LATIN, EngineTag::DEVANAGARI] {
		progress
			.upsert(&engine, ProgressUpdate::processing(true), Emission::Forced)
			.await
			.unwrap();
		supervisor.start(&engine).await;
	}

	assert!(harness.keep_alive.is_holding());

	// Bounded assertions get renewed
	eventually("renewal", || async {
		harness.keep_alive.acquired.load(Ordering::SeqCst) >= 2
	})
	.await;

	progress
		.upsert(&EngineTag::LATIN, ProgressUpdate::processing(false), Emission::Forced)
		.await
		.unwrap();

	eventually("latin dropped", || async {
		!supervisor.is_active(&EngineTag::LATIN).await
	})
	.await;
	assert!(supervisor.is_holding().await);
	assert!(harness.keep_alive.is_holding());

	progress
		.upsert(
			&EngineTag::DEVANAGARI,
			ProgressUpdate::processing(false),
			Emission::Forced,
		)
		.await
		.unwrap();

	eventually("release", || async { !harness.keep_alive.is_holding() }).await;
	assert_eq!(harness.keep_alive.released.load(Ordering::SeqCst), 1);
	assert!(!supervisor.is_holding().await);

	supervisor.shutdown().await;
}

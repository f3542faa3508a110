//! End-to-end queue scenarios: resolve a request, run it, inspect the log

use std::sync::Arc;

use libcrosspost::destinations::{resolve, MediaMode, ResolveRequest};
use libcrosspost::progress::{remaining_destinations, unselect_succeeded, ProgressReport};
use libcrosspost::queue::{EntryStatus, QueueRunner, QueueSettings, RunnerState};
use libcrosspost::service::events::{Event, EventBus};
use libcrosspost::submitters::mock::MockSubmitter;
use libcrosspost::types::{MediaFile, MediaType, PostContent, PostKind};

fn text_request(subreddits: &[&str]) -> ResolveRequest {
    ResolveRequest {
        subreddits: subreddits.iter().map(|s| s.to_string()).collect(),
        title: "Release notes".to_string(),
        body: Some("What changed".to_string()),
        ..Default::default()
    }
}

#[test]
fn test_three_subreddits_one_image() {
    let image = MediaFile::new("/tmp/cat.png", MediaType::Png);
    let request = ResolveRequest {
        subreddits: vec!["aww".into(), "cats".into(), "pics".into()],
        title: "My cat".to_string(),
        files: vec![image.clone()],
        media_mode: MediaMode::Files,
        ..Default::default()
    };

    let items = resolve(&request).unwrap();

    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i.kind == PostKind::Image));
    assert!(items
        .iter()
        .all(|i| i.content == PostContent::File(image.clone())));
    let names: Vec<&str> = items.iter().map(|i| i.subreddit.as_str()).collect();
    assert_eq!(names, vec!["aww", "cats", "pics"]);
}

#[tokio::test]
async fn test_partial_failure_then_retry_remaining() {
    let submitter = MockSubmitter::with_url_base("https://reddit.test/r").fail_on("b", "banned");
    let runner = QueueRunner::new(
        Arc::new(submitter.clone()),
        QueueSettings::with_cooldown(0),
        EventBus::new(100),
    );

    let items = resolve(&text_request(&["a", "b"])).unwrap();
    let snapshot = runner.start(items.clone()).await.unwrap();

    let report = ProgressReport::from_snapshot(&snapshot);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(snapshot.log[0].url.as_deref(), Some("https://reddit.test/r/a"));
    assert_eq!(snapshot.log[1].error.as_deref(), Some("banned"));

    // Dropping the succeeded destinations leaves exactly the failed one
    let done = unselect_succeeded(&snapshot.log);
    let retry: Vec<_> = items
        .into_iter()
        .filter(|i| !done.contains(&i.subreddit))
        .collect();
    assert_eq!(remaining_destinations(&snapshot.log), vec!["b"]);

    let second = runner.start(retry).await.unwrap();
    assert_eq!(second.log.len(), 1);
    assert_eq!(second.log[0].status, EntryStatus::Error);
    assert_eq!(submitter.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_right_after_first_success() {
    let runner = Arc::new(QueueRunner::new(
        Arc::new(MockSubmitter::success()),
        QueueSettings::with_cooldown(30),
        EventBus::new(100),
    ));
    let mut watcher = runner.subscribe();
    let items = resolve(&text_request(&["a", "b", "c"])).unwrap();

    let task = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.start(items).await })
    };

    watcher
        .wait_for(|s| s.current_wait.is_some())
        .await
        .unwrap();
    runner.cancel_handle().cancel();

    let snapshot = task.await.unwrap().unwrap();
    assert_eq!(snapshot.state, RunnerState::Cancelled);
    let statuses: Vec<EntryStatus> = snapshot.log.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![EntryStatus::Success, EntryStatus::Queued, EntryStatus::Queued]
    );
    assert!(snapshot.current_wait.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_order() {
    let bus = EventBus::new(100);
    let mut events = bus.subscribe();
    let runner = QueueRunner::new(
        Arc::new(MockSubmitter::success().fail_on("b", "removed by filter")),
        QueueSettings::with_cooldown(1),
        bus,
    );

    runner
        .start(resolve(&text_request(&["a", "b", "c"])).unwrap())
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            Event::RunStarted { .. } => "start".to_string(),
            Event::ItemPosting { index, .. } => format!("posting{}", index),
            Event::ItemSucceeded { index, .. } => format!("ok{}", index),
            Event::ItemFailed { index, .. } => format!("err{}", index),
            Event::WaitTick { remaining, .. } => format!("wait{}", remaining),
            Event::RunFinished { succeeded, failed, .. } => {
                format!("finished{}/{}", succeeded, failed)
            }
        });
    }

    assert_eq!(
        kinds,
        vec![
            "start", "posting0", "ok0", "wait1", "wait0", "posting1", "err1", "posting2", "ok2",
            "finished2/1",
        ]
    );
}

#[tokio::test]
async fn test_profile_destination_in_queue() {
    let request = ResolveRequest {
        post_to_profile: true,
        username: Some("ferris".to_string()),
        ..text_request(&["rust"])
    };
    let runner = QueueRunner::new(
        Arc::new(MockSubmitter::success()),
        QueueSettings::with_cooldown(0),
        EventBus::new(10),
    );

    let snapshot = runner.start(resolve(&request).unwrap()).await.unwrap();
    let report = ProgressReport::from_snapshot(&snapshot);

    assert_eq!(report.rows[1].label, "u/ferris (profile)");
    assert_eq!(report.succeeded, 2);
}

//! End-to-end job lifecycle scenarios against the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use job_coordinator::testing::{response_channel, ResponseInjector, TestQueue, TestStore};
use job_coordinator::{
    Coordinator, DispatchConfig, DispatchLoop, HostHandle, JobId, JobResponse, JobState,
    ResponseConsumer, ServiceHost,
};

struct Harness {
    coordinator: Arc<Coordinator>,
    queue: Arc<TestQueue>,
    store: Arc<TestStore>,
    injector: ResponseInjector,
    handle: HostHandle,
}

/// Starts only the response consumer; dispatch is driven by the test.
fn start_consumer() -> Harness {
    let queue = Arc::new(TestQueue::new());
    let store = Arc::new(TestStore::new());
    let coordinator = Arc::new(Coordinator::new(queue.clone(), store.clone()));
    let (injector, subscriber) = response_channel();

    let handle = ServiceHost::new(coordinator.clone())
        .with_service(ResponseConsumer::new(
            coordinator.clone(),
            Box::new(subscriber),
        ))
        .start();

    Harness {
        coordinator,
        queue,
        store,
        injector,
        handle,
    }
}

async fn eventually_state(coordinator: &Coordinator, id: JobId, expected: JobState) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if coordinator.job(id).await.map(|job| job.state()) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "job {id} never reached {expected}");
}

#[tokio::test]
async fn test_news_job_completes() {
    let h = start_consumer();

    let job = h.coordinator.generate_job("News").unwrap();
    h.coordinator.queue_job(job.id()).await.unwrap();
    assert_eq!(
        h.coordinator.job(job.id()).await.unwrap().state(),
        JobState::Queued
    );

    h.injector.respond(job.id(), JobResponse::success(job.id()));
    eventually_state(&h.coordinator, job.id(), JobState::Complete).await;

    let finished = h.coordinator.job(job.id()).await.unwrap();
    assert!(finished.finished_at().is_some());
    assert_eq!(
        h.store.snapshot(job.id()).unwrap().state(),
        JobState::Complete
    );

    h.handle.shutdown().await;
}

#[tokio::test]
async fn test_failure_before_dispatch_confirmation() {
    let h = start_consumer();
    let job = h.coordinator.generate_job("News").unwrap();

    h.queue.pause();
    let dispatch = tokio::spawn({
        let coordinator = h.coordinator.clone();
        let id = job.id();
        async move { coordinator.queue_job(id).await }
    });
    while h.queue.pending_publishes() == 0 {
        tokio::task::yield_now().await;
    }

    h.injector.respond(job.id(), JobResponse::failure(job.id()));
    eventually_state(&h.coordinator, job.id(), JobState::Failed).await;

    h.queue.resume();
    dispatch.await.unwrap().unwrap();

    let job = h.coordinator.job(job.id()).await.unwrap();
    assert_eq!(job.state(), JobState::Failed);
    assert!(job.finished_at().is_some());
    assert_eq!(h.store.snapshot(job.id()).unwrap().state(), JobState::Failed);

    h.handle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_job_response_keeps_loop_running() {
    let h = start_consumer();
    let job = h.coordinator.generate_job("PP").unwrap();
    h.coordinator.queue_job(job.id()).await.unwrap();

    let stranger = JobId::new();
    assert!(h.injector.respond(stranger, JobResponse::success(stranger)));
    assert!(h.injector.respond(job.id(), JobResponse::failure(job.id())));

    eventually_state(&h.coordinator, job.id(), JobState::Failed).await;
    assert_eq!(h.coordinator.len(), 1);
    assert!(!h.coordinator.contains(stranger));
    assert!(h.store.snapshot(stranger).is_none());

    h.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_and_responses_do_not_lose_updates() {
    let h = start_consumer();
    let coordinator = h.coordinator.clone();

    // Jobs answered by the response loop while the dispatcher keeps creating
    // and queueing other jobs.
    let mut answered = Vec::new();
    for _ in 0..50 {
        let job = coordinator.generate_job("News").unwrap();
        coordinator.queue_job(job.id()).await.unwrap();
        answered.push(job.id());
    }

    let dispatcher = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            let mut ids = Vec::new();
            for i in 0..200 {
                let job_type = if i % 2 == 0 { "PP" } else { "News" };
                let job = coordinator.generate_job(job_type).unwrap();
                if fastrand::bool() {
                    tokio::task::yield_now().await;
                }
                coordinator.queue_job(job.id()).await.unwrap();
                ids.push(job.id());
            }
            ids
        }
    });

    let mut expected = Vec::new();
    for id in &answered {
        let response = if fastrand::bool() {
            expected.push((*id, JobState::Complete));
            JobResponse::success(*id)
        } else {
            expected.push((*id, JobState::Failed));
            JobResponse::failure(*id)
        };
        h.injector.respond(*id, response);
        if fastrand::u8(..4) == 0 {
            tokio::task::yield_now().await;
        }
    }

    let dispatched = dispatcher.await.unwrap();

    for (id, state) in &expected {
        eventually_state(&coordinator, *id, *state).await;
    }
    for id in &dispatched {
        assert_eq!(coordinator.job(*id).await.unwrap().state(), JobState::Queued);
    }
    assert_eq!(coordinator.len(), 250);
    assert_eq!(h.queue.publish_count(), 250);

    h.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_generation_yields_unique_ids() {
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(TestQueue::new()),
        Arc::new(TestStore::new()),
    ));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            (0..250)
                .map(|_| coordinator.generate_job("PP").unwrap().id())
                .collect::<Vec<_>>()
        }));
    }

    let mut ids = std::collections::HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(ids.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(coordinator.len(), 2000);
}

#[tokio::test]
async fn test_full_service_round_trip() {
    let queue = Arc::new(TestQueue::new());
    let store = Arc::new(TestStore::new());
    let coordinator = Arc::new(Coordinator::new(queue.clone(), store.clone()));
    let (injector, subscriber) = response_channel();
    let subscriber_closes = subscriber.close_counter();

    let handle = ServiceHost::new(coordinator.clone())
        .with_service(ResponseConsumer::new(
            coordinator.clone(),
            Box::new(subscriber),
        ))
        .with_service(DispatchLoop::new(
            coordinator.clone(),
            DispatchConfig {
                interval: Duration::from_secs(3600),
                job_types: vec!["PP".to_string(), "News".to_string()],
                retention: None,
                pending_ttl: None,
            },
        ))
        .start();

    // The first tick fires immediately.
    tokio::time::timeout(Duration::from_secs(5), async {
        while queue.publish_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first tick should dispatch both job types");

    // Play the external worker.
    for message in queue.published_messages() {
        let job = message.job().unwrap();
        assert_eq!(message.destination, job.job_type());
        injector.respond(job.id(), JobResponse::success(job.id()));
    }

    for job in coordinator.jobs().await {
        eventually_state(&coordinator, job.id(), JobState::Complete).await;
    }

    handle.shutdown().await;
    handle.shutdown().await;

    assert_eq!(queue.close_count(), 1);
    assert_eq!(store.close_count(), 1);
    assert_eq!(
        subscriber_closes.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert!(handle.shutdown_token().is_cancelled());
}

#[tokio::test]
async fn test_lost_subscription_stops_dispatching() {
    let queue = Arc::new(TestQueue::new());
    let coordinator = Arc::new(Coordinator::new(queue.clone(), Arc::new(TestStore::new())));
    let (injector, subscriber) = response_channel();

    let handle = ServiceHost::new(coordinator.clone())
        .with_service(ResponseConsumer::new(
            coordinator.clone(),
            Box::new(subscriber),
        ))
        .with_service(DispatchLoop::new(
            coordinator.clone(),
            DispatchConfig {
                interval: Duration::from_millis(10),
                job_types: vec!["PP".to_string()],
                retention: None,
                pending_ttl: None,
            },
        ))
        .start();

    drop(injector);

    tokio::time::timeout(Duration::from_secs(5), handle.cancelled())
        .await
        .expect("a closed subscription should stop the host");
    handle.shutdown().await;

    let published = queue.publish_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.publish_count(), published);
    assert_eq!(queue.close_count(), 1);
}

//! Integration tests for the VM lifecycle flow.
//!
//! These tests drive the full path from an image-level request to the
//! asynchronous completion callback: enqueue on the per-resource queue,
//! submit against the mock provider, poll the operation to a terminal
//! status, and mutate instance state. MockCloud scripts provider behavior.

use std::sync::Arc;
use std::time::Duration;

use cirrus_fleet::{
    ActionQueue, ClonePolicy, ImageDetails, ImageError, InstanceStatus, PollPolicy, VmImage,
    VmInstance,
};
use cirrus_provider::{CallKind, CloudClient, MockCloud, VmUserData};

fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(2),
        max_attempts: 100,
    }
}

fn test_details(clone_policy: ClonePolicy) -> ImageDetails {
    ImageDetails {
        image_name: "build-agent".to_string(),
        service_name: "svc".to_string(),
        deployment_name: "deploy".to_string(),
        vm_name_prefix: "agent".to_string(),
        clone_policy,
    }
}

fn test_user_data() -> VmUserData {
    VmUserData::new("agent-1", "https://coordinator.example")
}

async fn test_image(clone_policy: ClonePolicy) -> (Arc<MockCloud>, Arc<VmImage>) {
    let cloud = Arc::new(MockCloud::new());
    let queue = ActionQueue::new(fast_policy());
    let image = VmImage::new(
        test_details(clone_policy),
        cloud.clone() as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");
    (cloud, image)
}

async fn wait_for_status(instance: &Arc<VmInstance>, status: InstanceStatus) {
    wait_until(|| instance.status() == status).await;
}

async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within deadline");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_start_returns_scheduled_instance_immediately() {
    let (cloud, image) = test_image(ClonePolicy::ClonePersist).await;
    cloud.set_pending_polls(10);

    let instance = image.start_new_instance(test_user_data());

    // Visible before the background action completes.
    assert_eq!(instance.status(), InstanceStatus::ScheduledToStart);
    assert!(image.find_instance(instance.name()).is_some());

    wait_for_status(&instance, InstanceStatus::Running).await;
    assert!(instance.errors().is_empty());
}

#[tokio::test]
async fn test_start_submit_failure_marks_error_and_unlocks() {
    let (cloud, image) = test_image(ClonePolicy::ClonePersist).await;
    cloud.refuse(CallKind::CreateAndStart, "403", "Forbidden");

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Error).await;

    let errors = instance.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "403");
    assert_eq!(errors[0].message, "Forbidden");

    // A failed action must not stall the queue.
    wait_until(|| image.can_start_new_instance()).await;
}

#[tokio::test]
async fn test_round_trip_start_then_failing_stop() {
    let (cloud, image) = test_image(ClonePolicy::ClonePersist).await;

    let instance = image.start_new_instance(test_user_data());
    assert_eq!(instance.status(), InstanceStatus::ScheduledToStart);
    wait_for_status(&instance, InstanceStatus::Running).await;

    cloud.fail_operation(CallKind::Stop, "409", "Conflict");
    image.terminate_instance(&instance);

    // Synchronous pre-transition: never a stale `running` while the stop is
    // outstanding.
    assert_eq!(instance.status(), InstanceStatus::Stopping);

    wait_for_status(&instance, InstanceStatus::ErrorCannotStop).await;
    let errors = instance.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "409");
    assert_eq!(errors[0].message, "Conflict");

    // Instance stays in the collection; error states are not terminal.
    assert!(image.find_instance(instance.name()).is_some());
}

#[tokio::test]
async fn test_delete_after_stop_removes_instance() {
    let (cloud, image) = test_image(ClonePolicy::CloneAndDeleteAfterStop).await;

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Running).await;

    image.terminate_instance(&instance);
    wait_until(|| image.find_instance(instance.name()).is_none()).await;

    let vm = instance.name();
    assert_eq!(
        cloud.submissions(),
        vec![
            format!("create {vm} from build-agent"),
            format!("stop {vm}"),
            format!("delete {vm}"),
        ]
    );
}

#[tokio::test]
async fn test_clone_persist_keeps_stopped_instance() {
    let (_cloud, image) = test_image(ClonePolicy::ClonePersist).await;

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Running).await;

    image.terminate_instance(&instance);
    wait_for_status(&instance, InstanceStatus::Stopped).await;

    assert!(image.find_instance(instance.name()).is_some());
}

#[tokio::test]
async fn test_use_original_reuses_canonical_vm() {
    let (cloud, image) = test_image(ClonePolicy::UseOriginal).await;

    let instance = image.start_new_instance(test_user_data());
    assert_eq!(instance.name(), "build-agent");
    wait_for_status(&instance, InstanceStatus::Running).await;

    // The canonical VM is started, not created.
    assert_eq!(cloud.submissions(), vec!["start build-agent".to_string()]);
    assert!(!image.generalized());
}

#[tokio::test]
async fn test_generalized_flag_computed_for_clone_policies() {
    let cloud = Arc::new(MockCloud::new());
    cloud.set_generalized("build-agent", true);
    let queue = ActionQueue::new(fast_policy());

    let image = VmImage::new(
        test_details(ClonePolicy::ClonePersist),
        cloud.clone() as Arc<dyn CloudClient>,
        queue.clone(),
    )
    .await
    .expect("image construction");
    assert!(image.generalized());

    // use_original ignores the template flag entirely.
    let image = VmImage::new(
        test_details(ClonePolicy::UseOriginal),
        cloud.clone() as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");
    assert!(!image.generalized());
}

#[tokio::test]
async fn test_can_start_reflects_queue_lock() {
    let (cloud, image) = test_image(ClonePolicy::ClonePersist).await;
    cloud.set_pending_polls(20);

    assert!(image.can_start_new_instance());

    let instance = image.start_new_instance(test_user_data());
    // Locked immediately after enqueue.
    assert!(!image.can_start_new_instance());

    wait_for_status(&instance, InstanceStatus::Running).await;
    wait_until(|| image.can_start_new_instance()).await;
}

#[tokio::test]
async fn test_restart_is_unsupported() {
    let (_cloud, image) = test_image(ClonePolicy::ClonePersist).await;

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Running).await;

    let err = image.restart_instance(&instance).unwrap_err();
    assert!(matches!(err, ImageError::RestartUnsupported(_)));

    // No state mutation.
    assert_eq!(instance.status(), InstanceStatus::Running);
    assert!(instance.errors().is_empty());
}

#[tokio::test]
async fn test_discovery_seeds_collection() {
    let cloud = Arc::new(MockCloud::new());
    cloud.seed_instance("vm-old", "running");
    cloud.seed_instance("vm-parked", "stopped");
    let queue = ActionQueue::new(fast_policy());

    let image = VmImage::new(
        test_details(ClonePolicy::ClonePersist),
        cloud as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");

    assert_eq!(image.instance_count(), 2);
    let old = image.find_instance("vm-old").expect("discovered instance");
    assert_eq!(old.status(), InstanceStatus::Running);
    let parked = image.find_instance("vm-parked").expect("discovered instance");
    assert_eq!(parked.status(), InstanceStatus::Stopped);
}

#[tokio::test]
async fn test_images_sharing_a_key_serialize_against_each_other() {
    // Two images over the same (service, deployment) pair and one queue:
    // their actions must run one at a time.
    let cloud = Arc::new(MockCloud::new());
    cloud.set_pending_polls(3);
    let queue = ActionQueue::new(fast_policy());

    let image_a = VmImage::new(
        test_details(ClonePolicy::UseOriginal),
        cloud.clone() as Arc<dyn CloudClient>,
        queue.clone(),
    )
    .await
    .expect("image construction");
    let image_b = VmImage::new(
        ImageDetails {
            image_name: "build-agent-xl".to_string(),
            ..test_details(ClonePolicy::UseOriginal)
        },
        cloud.clone() as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");

    let first = image_a.start_new_instance(test_user_data());
    // Sibling image over the same resource group observes the lock.
    assert!(!image_b.can_start_new_instance());
    let second = image_b.start_new_instance(test_user_data());

    wait_for_status(&first, InstanceStatus::Running).await;
    wait_for_status(&second, InstanceStatus::Running).await;

    assert_eq!(cloud.max_open_operations(), 1);
    assert_eq!(cloud.submissions().len(), 2);
}

#[tokio::test]
async fn test_independent_keys_progress_concurrently() {
    // Key A is saturated by a slow operation; key B completes regardless.
    let slow_cloud = Arc::new(MockCloud::new());
    slow_cloud.set_pending_polls(1_000);
    let fast_cloud = Arc::new(MockCloud::new());
    let queue = ActionQueue::new(fast_policy());

    let image_a = VmImage::new(
        test_details(ClonePolicy::ClonePersist),
        slow_cloud.clone() as Arc<dyn CloudClient>,
        queue.clone(),
    )
    .await
    .expect("image construction");
    let image_b = VmImage::new(
        ImageDetails {
            deployment_name: "other-deploy".to_string(),
            ..test_details(ClonePolicy::ClonePersist)
        },
        fast_cloud.clone() as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");

    let blocked = image_a.start_new_instance(test_user_data());
    let free = image_b.start_new_instance(test_user_data());

    wait_for_status(&free, InstanceStatus::Running).await;
    assert_eq!(blocked.status(), InstanceStatus::ScheduledToStart);
    assert!(!image_a.can_start_new_instance());
    assert!(image_b.can_start_new_instance());
}

#[tokio::test]
async fn test_poll_exhaustion_surfaces_as_error() {
    let cloud = Arc::new(MockCloud::new());
    cloud.set_pending_polls(1_000);
    let queue = ActionQueue::new(PollPolicy {
        interval: Duration::from_millis(1),
        max_attempts: 5,
    });
    let image = VmImage::new(
        test_details(ClonePolicy::ClonePersist),
        cloud as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Error).await;

    let errors = instance.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "poll.exhausted");
    wait_until(|| image.can_start_new_instance()).await;
}

#[tokio::test]
async fn test_stale_operation_id_fails_start() {
    let cloud = Arc::new(MockCloud::new());
    cloud.disown_operations(true);
    let queue = ActionQueue::new(fast_policy());
    let image = VmImage::new(
        test_details(ClonePolicy::ClonePersist),
        cloud as Arc<dyn CloudClient>,
        queue,
    )
    .await
    .expect("image construction");

    let instance = image.start_new_instance(test_user_data());
    wait_for_status(&instance, InstanceStatus::Error).await;
    assert_eq!(instance.errors()[0].code, "operation.stale");
}

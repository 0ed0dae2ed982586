//! Cycle-level tests for the reconciliation task, driven through a scripted
//! connector and a static client.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use vmfleet_model::{
    CloudError, CloudImage, CloudInstance, InstanceStatus, ObservedInstance,
};
use vmfleet_reconcile::{
    CloudClient, CloudConnector, MockConnector, ObservedWorld, ReconcileConfig, ReconcileTask,
    StaticClient,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn image(id: &str) -> Arc<CloudImage> {
    CloudImage::new(id, id, serde_json::json!({"zone": "europe-west1-b"}))
}

fn task_over(connector: &Arc<MockConnector>, client: &Arc<StaticClient>) -> ReconcileTask {
    ReconcileTask::new(
        Arc::clone(connector) as Arc<dyn CloudConnector>,
        Arc::clone(client) as Arc<dyn CloudClient>,
    )
}

#[tokio::test]
async fn clean_probe_leaves_image_error_free() {
    init_tracing();
    let img = image("img1");
    let connector = Arc::new(MockConnector::new());
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    assert!(!img.has_errors());
    assert!(!client.error_state().has_errors());
}

#[tokio::test]
async fn failed_probe_is_transient_noise() {
    init_tracing();
    let img = image("img1");
    // A tracked instance that would be removed if the image were processed.
    img.add_instance(Arc::new(CloudInstance::new(
        "vm1",
        "vm1",
        InstanceStatus::Running,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.set_image_errors("img1", vec![CloudError::new("probe", "api unreachable")]);
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    // The probe failure is not persisted, and the image sat the cycle out.
    assert!(!img.has_errors());
    assert!(img.find_instance_by_id("vm1").is_some());
    assert_eq!(connector.start_checks(), 0);
}

#[tokio::test]
async fn vanished_running_instance_is_removed_and_start_failure_sticks() {
    init_tracing();
    let img = image("img2");
    img.add_instance(Arc::new(CloudInstance::new(
        "i2",
        "i2",
        InstanceStatus::Running,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.set_start_errors("i2", vec![CloudError::new("start_failed", "no capacity")]);
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = task_over(&connector, &client);

    task.run_cycle().await.unwrap();

    // Removed, probed, aggregated, window armed.
    assert!(img.find_instance_by_id("i2").is_none());
    assert_eq!(connector.start_checks(), 1);
    let errors = img.error_state().current().unwrap();
    assert_eq!(errors[0].code, "start_failed");
    assert!(img.is_timed_out());

    // A clean probe on the next cycle must not clear the aggregate while
    // the window is active.
    task.run_cycle().await.unwrap();
    assert!(img.has_errors());
    assert!(client.error_state().has_errors());
}

#[tokio::test]
async fn sticky_errors_clear_once_window_expires() {
    init_tracing();
    let img = image("img2");
    img.add_instance(Arc::new(CloudInstance::new(
        "i2",
        "i2",
        InstanceStatus::Running,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.set_start_errors("i2", vec![CloudError::new("start_failed", "no capacity")]);
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = ReconcileTask::with_config(
        Arc::clone(&connector) as Arc<dyn CloudConnector>,
        Arc::clone(&client) as Arc<dyn CloudClient>,
        ReconcileConfig {
            error_timeout: Duration::from_millis(20),
            ..ReconcileConfig::default()
        },
    );

    task.run_cycle().await.unwrap();
    assert!(img.has_errors());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!img.is_timed_out());

    task.run_cycle().await.unwrap();
    assert!(!img.has_errors());
}

#[tokio::test]
async fn young_transitional_status_is_not_overwritten() {
    init_tracing();
    let img = image("img1");
    img.add_instance(Arc::new(CloudInstance::new(
        "i1",
        "i1",
        InstanceStatus::Starting,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.observe("img1", "i1", ObservedInstance::new(InstanceStatus::Running));
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    // Updated one second ago: not stuck yet, the snapshot may simply be
    // inconsistent.
    assert_eq!(
        img.find_instance_by_id("i1").unwrap().status(),
        InstanceStatus::Starting
    );
}

#[tokio::test]
async fn stuck_transitional_status_is_overwritten() {
    init_tracing();
    let img = image("img1");
    let instance = Arc::new(CloudInstance::new("i1", "i1", InstanceStatus::Starting));
    instance.set_status_updated_at(Utc::now() - chrono::Duration::minutes(11));
    img.add_instance(Arc::clone(&instance));

    let connector = Arc::new(MockConnector::new());
    connector.observe("img1", "i1", ObservedInstance::new(InstanceStatus::Running));
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    assert_eq!(instance.status(), InstanceStatus::Running);
}

#[tokio::test]
async fn disagreeing_permanent_statuses_resolve_to_observed() {
    init_tracing();
    let img = image("img1");
    let instance = Arc::new(CloudInstance::new("i1", "i1", InstanceStatus::Stopped));
    img.add_instance(Arc::clone(&instance));

    let connector = Arc::new(MockConnector::new());
    connector.observe("img1", "i1", ObservedInstance::new(InstanceStatus::Running));
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    assert_eq!(instance.status(), InstanceStatus::Running);
}

#[tokio::test]
async fn observed_attributes_propagate_to_tracked_instance() {
    init_tracing();
    let img = image("img1");
    let instance = Arc::new(CloudInstance::new("i1", "i1", InstanceStatus::Running));
    img.add_instance(Arc::clone(&instance));

    let started = Utc::now() - chrono::Duration::minutes(5);
    let connector = Arc::new(MockConnector::new());
    connector.observe(
        "img1",
        "i1",
        ObservedInstance {
            status: InstanceStatus::Running,
            start_date: Some(started),
            network_identity: Some("10.1.2.3".to_string()),
        },
    );
    connector.set_instance_errors("i1", vec![CloudError::new("disk", "degraded volume")]);
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    assert_eq!(instance.start_date(), Some(started));
    assert_eq!(instance.network_identity().as_deref(), Some("10.1.2.3"));
    let errors = instance.error_state().current().unwrap();
    assert_eq!(errors[0].code, "disk");
}

#[tokio::test]
async fn vanished_instance_in_startup_grace_is_left_alone() {
    init_tracing();
    let img = image("img1");
    img.add_instance(Arc::new(CloudInstance::new(
        "i1",
        "i1",
        InstanceStatus::Starting,
    )));

    let connector = Arc::new(MockConnector::new());
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));

    task_over(&connector, &client).run_cycle().await.unwrap();

    assert!(img.find_instance_by_id("i1").is_some());
    assert_eq!(connector.start_checks(), 0);
    assert!(!img.has_errors());
}

#[tokio::test]
async fn instance_that_disappears_between_cycles_is_dropped() {
    init_tracing();
    let img = image("img1");
    img.add_instance(Arc::new(CloudInstance::new(
        "i1",
        "i1",
        InstanceStatus::Running,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.observe("img1", "i1", ObservedInstance::new(InstanceStatus::Running));
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = task_over(&connector, &client);

    task.run_cycle().await.unwrap();
    assert!(img.find_instance_by_id("i1").is_some());

    connector.forget("img1", "i1");
    task.run_cycle().await.unwrap();

    assert!(img.find_instance_by_id("i1").is_none());
    assert_eq!(connector.start_checks(), 1);
}

#[tokio::test]
async fn untracked_observed_instance_is_detected_once() {
    init_tracing();
    let img = image("img1");
    let connector = Arc::new(MockConnector::new());
    connector.observe(
        "img1",
        "agent1",
        ObservedInstance::new(InstanceStatus::Running),
    );
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = task_over(&connector, &client);

    task.run_cycle().await.unwrap();

    let detected = img.find_instance_by_id("agent1").unwrap();
    assert_eq!(detected.status(), InstanceStatus::Running);
    assert_eq!(img.instances().len(), 1);

    // A second cycle over the same world reuses the tracked entry.
    task.run_cycle().await.unwrap();
    assert_eq!(img.instances().len(), 1);
    assert!(Arc::ptr_eq(
        &detected,
        &img.find_instance_by_id("agent1").unwrap()
    ));
}

#[tokio::test]
async fn repeated_cycle_over_unchanged_world_is_idempotent() {
    init_tracing();
    let img = image("img1");
    img.add_instance(Arc::new(CloudInstance::new(
        "i1",
        "i1",
        InstanceStatus::Running,
    )));
    img.add_instance(Arc::new(CloudInstance::new(
        "i2",
        "i2",
        InstanceStatus::Starting,
    )));

    let connector = Arc::new(MockConnector::new());
    connector.observe("img1", "i1", ObservedInstance::new(InstanceStatus::Running));
    connector.observe(
        "img1",
        "agent1",
        ObservedInstance::new(InstanceStatus::Stopped),
    );
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = task_over(&connector, &client);

    task.run_cycle().await.unwrap();
    let snapshot = |img: &Arc<CloudImage>| {
        let mut state: Vec<(String, InstanceStatus)> = img
            .instances()
            .iter()
            .map(|i| (i.instance_id().to_string(), i.status()))
            .collect();
        state.sort_by(|a, b| a.0.cmp(&b.0));
        (state, img.error_state().current(), img.is_timed_out())
    };
    let first = snapshot(&img);

    task.run_cycle().await.unwrap();
    let second = snapshot(&img);

    assert_eq!(first, second);
}

#[tokio::test]
async fn whole_cycle_failure_is_swallowed_by_run() {
    init_tracing();
    let img = image("img1");
    let connector = Arc::new(MockConnector::failing());
    let client = Arc::new(StaticClient::new(vec![img]));
    let task = task_over(&connector, &client);

    // The diagnostic entry point surfaces the failure...
    assert!(task.run_cycle().await.is_err());
    // ...while the production entry point logs and keeps going.
    task.run().await;
}

/// Connector whose per-instance health check fails for one instance only.
struct FlakyInstanceProbe {
    inner: MockConnector,
    broken_instance: String,
}

#[async_trait]
impl CloudConnector for FlakyInstanceProbe {
    async fn check_image(&self, image: &CloudImage) -> Result<Vec<CloudError>> {
        self.inner.check_image(image).await
    }

    async fn fetch_instances(&self, images: &[Arc<CloudImage>]) -> Result<ObservedWorld> {
        self.inner.fetch_instances(images).await
    }

    async fn check_instance(&self, instance: &CloudInstance) -> Result<Vec<CloudError>> {
        if instance.instance_id() == self.broken_instance {
            anyhow::bail!("probe timeout");
        }
        self.inner.check_instance(instance).await
    }

    async fn check_start_operation(&self, instance: &CloudInstance) -> Result<Vec<CloudError>> {
        self.inner.check_start_operation(instance).await
    }
}

#[tokio::test]
async fn per_instance_probe_failure_does_not_abort_siblings() {
    init_tracing();
    let img = image("img1");
    let broken = Arc::new(CloudInstance::new("i1", "i1", InstanceStatus::Running));
    let healthy = Arc::new(CloudInstance::new("i2", "i2", InstanceStatus::Running));
    img.add_instance(Arc::clone(&broken));
    img.add_instance(Arc::clone(&healthy));

    let started = Utc::now();
    let inner = MockConnector::new();
    inner.observe(
        "img1",
        "i1",
        ObservedInstance {
            status: InstanceStatus::Running,
            start_date: Some(started),
            network_identity: None,
        },
    );
    inner.observe(
        "img1",
        "i2",
        ObservedInstance {
            status: InstanceStatus::Running,
            start_date: Some(started),
            network_identity: None,
        },
    );
    let connector = Arc::new(FlakyInstanceProbe {
        inner,
        broken_instance: "i1".to_string(),
    });
    let client = Arc::new(StaticClient::new(vec![Arc::clone(&img)]));
    let task = ReconcileTask::new(
        connector as Arc<dyn CloudConnector>,
        Arc::clone(&client) as Arc<dyn CloudClient>,
    );

    task.run_cycle().await.unwrap();

    // The failed probe skipped attribute propagation for its instance but
    // the sibling was fully processed.
    assert_eq!(broken.start_date(), None);
    assert_eq!(healthy.start_date(), Some(started));
}

//! The reconciliation task.
//!
//! One cycle converges the tracked fleet view with the provider's observed
//! world, image by image:
//!
//! 1. Health-check every image; images whose probe reports errors sit the
//!    cycle out (transient probe noise is cleared unless a sticky-error
//!    window is active)
//! 2. Bulk-fetch the observed instances for the remaining images
//! 3. Apply the status transition rule to matching instances, drop tracked
//!    instances the provider no longer reports, and propagate observed
//!    attributes
//! 4. Aggregate start failures into the image's error state, arming its
//!    sticky-error window
//! 5. Detect observed instances that are not tracked yet
//! 6. Have the client recompute its aggregate error status
//!
//! Cycles are idempotent; a failed cycle is simply retried next period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use vmfleet_model::{CloudError, CloudImage, CloudInstance, InstanceStatus, ObservedInstance};

use crate::client::CloudClient;
use crate::connector::CloudConnector;

/// Tunables for the reconciliation task.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// How long an instance may sit in a transitional status before a
    /// differing permanent observation is allowed to overwrite it.
    pub stuck_threshold: Duration,

    /// Length of the sticky-error window armed when instances fail to
    /// start. While the window is active, a clean image probe does not
    /// clear the aggregated errors.
    pub error_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stuck_threshold: Duration::from_secs(10 * 60),
            error_timeout: Duration::from_secs(3 * 60),
        }
    }
}

/// The reconciliation control loop over one client's images.
///
/// The task assumes at most one cycle is in flight per client at any time;
/// [`crate::ReconcileWorker`] guarantees this by awaiting each cycle before
/// the next tick.
pub struct ReconcileTask {
    connector: Arc<dyn CloudConnector>,
    client: Arc<dyn CloudClient>,
    config: ReconcileConfig,
}

impl ReconcileTask {
    pub fn new(connector: Arc<dyn CloudConnector>, client: Arc<dyn CloudClient>) -> Self {
        Self::with_config(connector, client, ReconcileConfig::default())
    }

    pub fn with_config(
        connector: Arc<dyn CloudConnector>,
        client: Arc<dyn CloudClient>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            connector,
            client,
            config,
        }
    }

    /// Runs one cycle, logging and swallowing any error.
    ///
    /// Production callers use this entry point: a failed cycle leaves the
    /// tracked state as it was and the next period retries. Callers that
    /// need to observe failures use [`Self::run_cycle`].
    pub async fn run(&self) {
        if let Err(error) = self.run_cycle().await {
            warn!(error = %error, "Reconciliation cycle failed");
        }
    }

    /// Runs one cycle, propagating any error that escapes it.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let images = self.client.images();
        let mut good_images = Vec::with_capacity(images.len());

        for image in images {
            let errors = self.connector.check_image(&image).await?;
            // A clean probe must not wipe errors aggregated from start
            // failures; those are cleared below only once the sticky-error
            // window has passed.
            if !errors.is_empty() {
                image.update_errors(errors);
            }
            if image.has_errors() {
                // A failed probe is transient noise unless the image is
                // inside a sticky-error window; it sits this cycle out
                // either way.
                if !image.is_timed_out() {
                    image.clear_errors();
                }
                continue;
            }
            good_images.push(image);
        }

        let mut observed_world = self.connector.fetch_instances(&good_images).await?;
        for image in &good_images {
            if let Some(instances) = observed_world.get(image.id()) {
                debug!(
                    image_id = %image.id(),
                    instances = ?instances.keys().collect::<Vec<_>>(),
                    "Observed instances"
                );
            }
        }

        let mut status_tally: HashMap<InstanceStatus, Vec<String>> = HashMap::new();
        for image in &good_images {
            let observed = observed_world.remove(image.id()).unwrap_or_default();
            self.reconcile_image(image, &observed, &mut status_tally)
                .await;
            image.detect_new_instances(&observed);
        }

        self.client.update_errors();

        for (status, instances) in &status_tally {
            debug!(status = %status, instances = ?instances, "Instances by observed status");
        }

        Ok(())
    }

    /// Reconciles one image's tracked instances against its observed slice.
    async fn reconcile_image(
        &self,
        image: &Arc<CloudImage>,
        observed: &HashMap<String, ObservedInstance>,
        status_tally: &mut HashMap<InstanceStatus, Vec<String>>,
    ) {
        for (name, observation) in observed {
            let Some(instance) = image.find_instance_by_id(name) else {
                continue;
            };
            status_tally
                .entry(observation.status)
                .or_default()
                .push(name.clone());

            let tracked = instance.status();
            if (tracked.is_permanent() || self.is_stuck(&instance))
                && observation.status.is_permanent()
                && observation.status != tracked
            {
                info!(
                    instance = %name,
                    from = %tracked,
                    to = %observation.status,
                    "Updated instance status from observed state"
                );
                instance.set_status(observation.status);
            }
        }

        let mut start_errors: Vec<CloudError> = Vec::new();
        for instance in image.instances() {
            match observed.get(instance.name()) {
                None => {
                    // Not visible yet is normal during early startup.
                    if instance.status().in_startup_grace() {
                        continue;
                    }
                    match self.connector.check_start_operation(&instance).await {
                        Ok(errors) => {
                            info!(
                                instance = %instance.name(),
                                image_id = %image.id(),
                                "Instance vanished from observed world, removing"
                            );
                            start_errors.extend(errors);
                            image.remove_instance(instance.instance_id());
                        }
                        Err(error) => {
                            debug!(
                                instance = %instance.name(),
                                error = %error,
                                "Start operation check failed"
                            );
                        }
                    }
                }
                Some(observation) => {
                    match self.connector.check_instance(&instance).await {
                        Ok(errors) => instance.error_state().update(errors),
                        Err(error) => {
                            debug!(
                                instance = %instance.name(),
                                error = %error,
                                "Instance health check failed"
                            );
                            continue;
                        }
                    }
                    if let Some(start_date) = observation.start_date {
                        instance.set_start_date(start_date);
                    }
                    if let Some(address) = &observation.network_identity {
                        instance.set_network_identity(address.clone());
                    }
                }
            }
        }

        if !start_errors.is_empty() {
            image.arm_timeout(self.config.error_timeout);
            image.update_errors(start_errors);
        }
    }

    /// An instance is stuck when it has sat in a transitional status for
    /// longer than the configured threshold.
    fn is_stuck(&self, instance: &CloudInstance) -> bool {
        if !instance.status().is_transitional() {
            return false;
        }
        (Utc::now() - instance.status_updated_at())
            .to_std()
            .map(|elapsed| elapsed > self.config.stuck_threshold)
            .unwrap_or(false)
    }
}

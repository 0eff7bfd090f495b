//! The Lifecycle Controller: the only path that changes `Instance` state.
//!
//! Every create/destroy/pause/resume call resolves the instance's current
//! state, invokes the provider, and appends exactly one `LifecycleEvent`
//! before returning — on success or failure alike — so an audit reader never
//! observes a new provider-reported state without a matching record. Direct
//! `InstanceProvider` calls from any other crate in this workspace are a
//! defect: every other engine (race provisioner, warm pool, regional volume,
//! failover orchestrator) holds an `Arc<LifecycleController>`, not an
//! `Arc<dyn InstanceProvider>`, for anything that mutates instance state.

use crate::event_store::LifecycleEventStore;
use gpufleet_core::model::{
    ActualStatus, CallerSite, CallerSource, Instance, InstanceContext, InstanceId,
    LifecycleAction, LifecycleEvent, Offer, OfferId, SnapshotId,
};
use gpufleet_core::ports::{Balance, CreateInstanceOptions, InstanceProvider, OfferFilter};
use gpufleet_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

pub struct LifecycleController {
    provider: Arc<dyn InstanceProvider>,
    events: Arc<dyn LifecycleEventStore>,
}

impl LifecycleController {
    pub fn new(provider: Arc<dyn InstanceProvider>, events: Arc<dyn LifecycleEventStore>) -> Self {
        Self { provider, events }
    }

    // -- reading operations, provided for operators; no audit trail of their own --

    pub async fn search_offers(&self, filter: &OfferFilter) -> CoreResult<Vec<Offer>> {
        self.provider.search_offers(filter).await
    }

    pub async fn get_instance(&self, instance_id: &InstanceId) -> CoreResult<Option<Instance>> {
        self.provider.get_instance(instance_id).await
    }

    pub async fn list_instances(&self) -> CoreResult<Vec<Instance>> {
        self.provider.list_instances().await
    }

    pub async fn get_balance(&self) -> CoreResult<Balance> {
        self.provider.get_balance().await
    }

    pub async fn history(&self, instance_id: &InstanceId) -> CoreResult<Vec<LifecycleEvent>> {
        self.events.for_instance(instance_id).await
    }

    pub async fn all_events(&self) -> CoreResult<Vec<LifecycleEvent>> {
        self.events.all().await
    }

    // -- the only state-changing operations in the workspace --

    #[track_caller]
    pub async fn create_instance(
        &self,
        offer_id: &OfferId,
        image: &str,
        opts: &CreateInstanceOptions,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<Instance> {
        let reason = validate_reason(reason)?;
        let caller_site = CallerSite::capture(std::panic::Location::caller(), "create_instance");

        let result = self.provider.create_instance(offer_id, image, opts).await;
        self.record_create(result, caller_source, caller_site, reason).await
    }

    #[track_caller]
    pub async fn create_instance_bid(
        &self,
        offer_id: &OfferId,
        image: &str,
        opts: &CreateInstanceOptions,
        bid_price: f64,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<Instance> {
        let reason = validate_reason(reason)?;
        let caller_site = CallerSite::capture(std::panic::Location::caller(), "create_instance_bid");

        let result = self
            .provider
            .create_instance_bid(offer_id, image, opts, bid_price)
            .await;
        self.record_create(result, caller_source, caller_site, reason).await
    }

    async fn record_create(
        &self,
        result: CoreResult<Instance>,
        caller_source: CallerSource,
        caller_site: CallerSite,
        reason: String,
    ) -> CoreResult<Instance> {
        match result {
            Ok(instance) => {
                self.append_event(LifecycleEvent {
                    id: self.events.next_id(),
                    instance_id: instance.instance_id.clone(),
                    user_id: "system".to_string(),
                    action: LifecycleAction::Create,
                    previous_status: None,
                    new_status: Some(instance.actual_status),
                    success: true,
                    caller_source,
                    caller_site,
                    reason,
                    reason_details: None,
                    snapshot_id: None,
                    instance_context: context_of(&instance),
                    metadata: HashMap::new(),
                    created_at: chrono::Utc::now(),
                })
                .await;
                Ok(instance)
            }
            Err(err) => {
                self.append_event(LifecycleEvent {
                    id: self.events.next_id(),
                    instance_id: String::new(),
                    user_id: "system".to_string(),
                    action: LifecycleAction::Error,
                    previous_status: None,
                    new_status: None,
                    success: false,
                    caller_source,
                    caller_site,
                    reason,
                    reason_details: Some(err.to_string()),
                    snapshot_id: None,
                    instance_context: InstanceContext::default(),
                    metadata: HashMap::new(),
                    created_at: chrono::Utc::now(),
                })
                .await;
                Err(err)
            }
        }
    }

    #[track_caller]
    pub async fn destroy_instance(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.mutate(
            instance_id,
            LifecycleAction::Destroy,
            caller_source,
            reason,
            "destroy_instance",
            None,
            |provider, id| Box::pin(async move { provider.destroy_instance(id).await }),
        )
        .await
    }

    #[track_caller]
    pub async fn pause_instance(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.mutate(
            instance_id,
            LifecycleAction::Pause,
            caller_source,
            reason,
            "pause_instance",
            None,
            |provider, id| Box::pin(async move { provider.pause_instance(id).await }),
        )
        .await
    }

    #[track_caller]
    pub async fn resume_instance(
        &self,
        instance_id: &InstanceId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.mutate(
            instance_id,
            LifecycleAction::Resume,
            caller_source,
            reason,
            "resume_instance",
            None,
            |provider, id| Box::pin(async move { provider.resume_instance(id).await }),
        )
        .await
    }

    /// Soft stop (billing/host state retained) is `pause_instance`.
    /// `hibernate_instance` is the stronger action: the caller has already
    /// taken a Snapshot Engine capture of the workspace, and this call
    /// destroys the instance while recording which snapshot backs the
    /// teardown — distinct from `pause` per the data model's split between
    /// the two actions.
    #[track_caller]
    pub async fn hibernate_instance(
        &self,
        instance_id: &InstanceId,
        snapshot_id: SnapshotId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<bool> {
        self.mutate(
            instance_id,
            LifecycleAction::Hibernate,
            caller_source,
            reason,
            "hibernate_instance",
            Some(snapshot_id),
            |provider, id| Box::pin(async move { provider.destroy_instance(id).await }),
        )
        .await
    }

    /// Records that `new_instance_id` (already provisioned and restored by
    /// the caller — this controller never provisions) is the wake-up of a
    /// prior hibernation backed by `snapshot_id`. Pure bookkeeping: no
    /// provider call, since creation was already audited by whichever
    /// `create_instance` call produced `new_instance_id`.
    #[track_caller]
    pub async fn wake_instance(
        &self,
        new_instance_id: &InstanceId,
        snapshot_id: SnapshotId,
        caller_source: CallerSource,
        reason: impl Into<String>,
    ) -> CoreResult<()> {
        let reason = validate_reason(reason)?;
        let caller_site = CallerSite::capture(std::panic::Location::caller(), "wake_instance");
        let current = self.provider.get_instance(new_instance_id).await?;

        self.append_event(LifecycleEvent {
            id: self.events.next_id(),
            instance_id: new_instance_id.clone(),
            user_id: "system".to_string(),
            action: LifecycleAction::Wake,
            previous_status: None,
            new_status: current.map(|i| i.actual_status),
            success: true,
            caller_source,
            caller_site,
            reason,
            reason_details: None,
            snapshot_id: Some(snapshot_id),
            instance_context: InstanceContext::default(),
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        })
        .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    #[track_caller]
    async fn mutate<'a, F>(
        &'a self,
        instance_id: &'a InstanceId,
        action: LifecycleAction,
        caller_source: CallerSource,
        reason: impl Into<String>,
        function: &'static str,
        snapshot_id: Option<SnapshotId>,
        call: F,
    ) -> CoreResult<bool>
    where
        F: FnOnce(
            &'a Arc<dyn InstanceProvider>,
            &'a InstanceId,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = CoreResult<bool>> + Send + 'a>>,
    {
        let reason = validate_reason(reason)?;
        let caller_site = CallerSite::capture(std::panic::Location::caller(), function);

        // Tolerates not_found: a destroy/pause/resume racing with the
        // provider side reporting the instance already gone is a normal
        // outcome, not a bug in this controller.
        let previous = self
            .provider
            .get_instance(instance_id)
            .await
            .ok()
            .flatten()
            .map(|i| i.actual_status);

        let result = call(&self.provider, instance_id).await;

        let (success, new_status, reason_details) = match &result {
            Ok(_) => (true, expected_new_status(action), None),
            Err(err) => (false, None, Some(err.to_string())),
        };

        self.append_event(LifecycleEvent {
            id: self.events.next_id(),
            instance_id: instance_id.clone(),
            user_id: "system".to_string(),
            action,
            previous_status: previous,
            new_status,
            success,
            caller_source,
            caller_site,
            reason,
            reason_details,
            snapshot_id,
            instance_context: InstanceContext::default(),
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        })
        .await;

        result
    }

    async fn append_event(&self, event: LifecycleEvent) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            instance_id = %event.instance_id,
            action = ?event.action,
            success = event.success,
            "lifecycle event recorded"
        );
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "gpufleet_lifecycle_events_total",
            "action" => format!("{:?}", event.action),
            "success" => event.success.to_string(),
        )
        .increment(1);

        // Appending is infallible in the in-memory default; a durable
        // backend's write failure here would itself need to surface, but
        // this controller has no fallback path if the audit log cannot be
        // written, so the error is swallowed into a trace rather than
        // compounding the original result.
        if let Err(_e) = self.events.append(event).await {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %_e, "failed to append lifecycle event");
        }
    }
}

fn validate_reason(reason: impl Into<String>) -> CoreResult<String> {
    let reason = reason.into();
    if reason.trim().is_empty() {
        return Err(CoreError::ValidationError(
            "reason must be non-empty".to_string(),
        ));
    }
    Ok(reason)
}

fn expected_new_status(action: LifecycleAction) -> Option<ActualStatus> {
    match action {
        LifecycleAction::Destroy | LifecycleAction::Hibernate => Some(ActualStatus::Destroyed),
        LifecycleAction::Pause => Some(ActualStatus::Stopped),
        LifecycleAction::Resume => Some(ActualStatus::Running),
        _ => None,
    }
}

fn context_of(instance: &Instance) -> InstanceContext {
    InstanceContext {
        gpu_type: None,
        price_per_hour: Some(instance.price_per_hour),
        gpu_utilization: None,
        ssh_host: instance.ssh_host.clone(),
        ssh_port: instance.ssh_port,
    }
}

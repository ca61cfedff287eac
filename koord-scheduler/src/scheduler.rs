// Copyright 2025 The Koordinator Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0

//! Top-level wiring: event sources, subsystems, worker tasks.
//!
//! Everything process-wide (adapter, sources, recorder, clients) is
//! constructed here and handed down explicitly; call sites never reach
//! for globals.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use koord_common::config::SchedulerConfig;
use koord_common::constants::{DEFAULT_SCHEDULER_NAME, SLO_CONFIG_NAME, SLO_CONFIG_NAMESPACE};
use koord_common::objects::{ConfigMap, ElasticQuota, Node, Pod, PodGroup, Reservation};
use koord_util::counter::ErrorCounter;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::SchedulerAdapter;
use crate::error_handler::{
    ErrorHandler, EventRecorder, LogEventRecorder, LogStatusClient, ReservationStatusClient,
};
use crate::event_source::{EventHandler, EventSource};
use crate::gang::{GangCache, GangPermit};
use crate::quota::{
    DefaultEstimator, LogPodEvictor, PodEvictor, PodRequestEstimator, QuotaRevoker, QuotaTreeHub,
};
use crate::reservation::{ReservationCache, ReservationHandler};

/// The typed watch sources driving the three subsystems.
pub struct EventSources {
    pub pods: Arc<EventSource<Pod>>,
    pub pod_groups: Arc<EventSource<PodGroup>>,
    pub quotas: Arc<EventSource<ElasticQuota>>,
    pub reservations: Arc<EventSource<Reservation>>,
    pub nodes: Arc<EventSource<Node>>,
    pub config_maps: Arc<EventSource<ConfigMap>>,
}

impl Default for EventSources {
    fn default() -> Self {
        Self {
            pods: EventSource::new("pods"),
            pod_groups: EventSource::new("podgroups"),
            quotas: EventSource::new("elasticquotas"),
            reservations: EventSource::new("reservations"),
            nodes: EventSource::new("nodes"),
            config_maps: EventSource::new("configmaps"),
        }
    }
}

/// External collaborators, injectable for tests and embedding.
pub struct Collaborators {
    pub recorder: Arc<dyn EventRecorder>,
    pub status_client: Arc<dyn ReservationStatusClient>,
    pub evictor: Arc<dyn PodEvictor>,
    pub estimator: Arc<dyn PodRequestEstimator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            recorder: Arc::new(LogEventRecorder),
            status_client: Arc::new(LogStatusClient),
            evictor: Arc::new(LogPodEvictor),
            estimator: Arc::new(DefaultEstimator::default()),
        }
    }
}

/// Latest SLO ConfigMap with the fixed namespace/name; other config
/// maps are ignored.
#[derive(Default)]
pub struct SloConfigCache {
    inner: RwLock<Option<Arc<ConfigMap>>>,
}

impl SloConfigCache {
    fn is_slo_config(config_map: &ConfigMap) -> bool {
        config_map.metadata.namespace == SLO_CONFIG_NAMESPACE
            && config_map.metadata.name == SLO_CONFIG_NAME
    }

    pub fn current(&self) -> Option<Arc<ConfigMap>> {
        self.inner.read().clone()
    }
}

impl EventHandler<ConfigMap> for SloConfigCache {
    fn on_add(&self, config_map: &Arc<ConfigMap>) {
        if Self::is_slo_config(config_map) {
            *self.inner.write() = Some(config_map.clone());
        }
    }

    fn on_update(&self, _old: &Arc<ConfigMap>, new: &Arc<ConfigMap>) {
        if Self::is_slo_config(new) {
            *self.inner.write() = Some(new.clone());
        }
    }

    fn on_delete(&self, config_map: &Arc<ConfigMap>) {
        if Self::is_slo_config(config_map) {
            *self.inner.write() = None;
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    adapter: Arc<SchedulerAdapter>,
    sources: EventSources,
    errors: Arc<ErrorCounter>,

    gang_cache: Arc<GangCache>,
    gang_permit: Arc<GangPermit>,
    quota_hub: Arc<QuotaTreeHub>,
    revoker: Arc<QuotaRevoker>,
    reservation_cache: Arc<ReservationCache>,
    reservation_handler: Arc<ReservationHandler>,
    error_handler: Arc<ErrorHandler>,
    slo_config: Arc<SloConfigCache>,

    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Self {
        let adapter = Arc::new(SchedulerAdapter::new());
        let sources = EventSources::default();
        let errors = Arc::new(ErrorCounter::new());
        let scheduler_names: HashSet<String> = HashSet::from([config
            .scheduler_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SCHEDULER_NAME.to_string())]);

        let gang_cache = Arc::new(GangCache::new(
            config.coscheduling.clone(),
            adapter.clone(),
            errors.clone(),
        ));
        let gang_permit = Arc::new(GangPermit::new(gang_cache.clone(), adapter.clone()));

        let quota_args = Arc::new(config.elastic_quota.clone());
        let quota_hub = Arc::new(QuotaTreeHub::new(
            quota_args.clone(),
            collaborators.estimator.clone(),
            errors.clone(),
        ));
        let revoker = Arc::new(QuotaRevoker::new(
            quota_hub.clone(),
            collaborators.evictor.clone(),
            quota_args,
        ));

        let reservation_cache = Arc::new(ReservationCache::new());
        let reservation_handler = Arc::new(ReservationHandler::new(
            adapter.clone(),
            reservation_cache.clone(),
            scheduler_names.clone(),
            errors.clone(),
        ));

        let error_handler = Arc::new(ErrorHandler::new(
            adapter.clone(),
            sources.reservations.clone(),
            collaborators.status_client,
            collaborators.recorder,
            scheduler_names,
            &config.reservation,
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            adapter,
            sources,
            errors,
            gang_cache,
            gang_permit,
            quota_hub,
            revoker,
            reservation_cache,
            reservation_handler,
            error_handler,
            slo_config: Arc::new(SloConfigCache::default()),
            shutdown_tx,
        }
    }

    /// Spawn the event workers and periodic loops. Handlers run on
    /// separate worker tasks and never block the scheduling cycle.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut workers = Vec::new();

        let gang_pods: Arc<dyn EventHandler<Pod>> = self.gang_cache.clone();
        workers.push(self.sources.pods.spawn_handler("gang-pods", gang_pods));
        let gang_pod_groups: Arc<dyn EventHandler<PodGroup>> = self.gang_cache.clone();
        workers.push(
            self.sources
                .pod_groups
                .spawn_handler("gang-podgroups", gang_pod_groups),
        );

        let quota_pods: Arc<dyn EventHandler<Pod>> = self.quota_hub.clone();
        workers.push(self.sources.pods.spawn_handler("quota-pods", quota_pods));
        let quota_quotas: Arc<dyn EventHandler<ElasticQuota>> = self.quota_hub.clone();
        workers.push(self.sources.quotas.spawn_handler("quota-quotas", quota_quotas));
        let quota_nodes: Arc<dyn EventHandler<Node>> = self.quota_hub.clone();
        workers.push(self.sources.nodes.spawn_handler("quota-nodes", quota_nodes));

        let reservations: Arc<dyn EventHandler<Reservation>> = self.reservation_handler.clone();
        workers.push(
            self.sources
                .reservations
                .spawn_handler("reservations", reservations),
        );

        let slo: Arc<dyn EventHandler<ConfigMap>> = self.slo_config.clone();
        workers.push(self.sources.config_maps.spawn_handler("slo-config", slo));

        workers.push(tokio::spawn(
            self.revoker.clone().run(self.shutdown_tx.subscribe()),
        ));
        workers.push(self.spawn_backoff_flusher());

        tracing::info!(
            scheduler = %self
                .config
                .scheduler_name
                .as_deref()
                .unwrap_or(DEFAULT_SCHEDULER_NAME),
            "scheduler core started"
        );
        workers
    }

    fn spawn_backoff_flusher(&self) -> JoinHandle<()> {
        let queue = self.adapter.queue().clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => queue.flush_backoff(),
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    // ─── Accessors ─────────────────────────────────────────────────────

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<SchedulerAdapter> {
        &self.adapter
    }

    pub fn sources(&self) -> &EventSources {
        &self.sources
    }

    pub fn gang_cache(&self) -> &Arc<GangCache> {
        &self.gang_cache
    }

    pub fn gang_permit(&self) -> &Arc<GangPermit> {
        &self.gang_permit
    }

    pub fn quota_hub(&self) -> &Arc<QuotaTreeHub> {
        &self.quota_hub
    }

    pub fn revoker(&self) -> &Arc<QuotaRevoker> {
        &self.revoker
    }

    pub fn reservation_cache(&self) -> &Arc<ReservationCache> {
        &self.reservation_cache
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn slo_config(&self) -> &Arc<SloConfigCache> {
        &self.slo_config
    }

    pub fn error_counts(&self) -> &Arc<ErrorCounter> {
        &self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use koord_common::objects::ObjectMeta;

    #[test]
    fn test_slo_config_cache_filters_by_identity() {
        let cache = SloConfigCache::default();
        let other = Arc::new(ConfigMap {
            metadata: ObjectMeta {
                name: "unrelated".to_string(),
                namespace: "default".to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        cache.on_add(&other);
        assert!(cache.current().is_none());

        let slo = Arc::new(ConfigMap {
            metadata: ObjectMeta {
                name: SLO_CONFIG_NAME.to_string(),
                namespace: SLO_CONFIG_NAMESPACE.to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        cache.on_add(&slo);
        assert!(cache.current().is_some());

        cache.on_delete(&slo);
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_scheduler_starts_and_shuts_down() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), Collaborators::default());
        let workers = scheduler.start();
        assert!(!workers.is_empty());
        scheduler.shutdown();
        for worker in workers {
            worker.abort();
        }
    }
}

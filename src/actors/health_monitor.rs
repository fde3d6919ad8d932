use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::health::{ComponentHealth, HealthCheckable, HealthStatus};

// ============================================================================
// Health Monitor Actor
// ============================================================================
//
// Owns the latest health report of every component. Probes run on an
// interval and push their results in; readers ask for the aggregate.
//
// ============================================================================

enum HealthRequest {
    Update(ComponentHealth),
    Snapshot {
        respond_to: oneshot::Sender<SystemHealth>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

pub struct HealthMonitorActor {
    receiver: mpsc::Receiver<HealthRequest>,
    components: HashMap<String, ComponentHealth>,
}

/// Cheap, cloneable handle to the monitor.
#[derive(Clone)]
pub struct HealthMonitorHandle {
    sender: mpsc::Sender<HealthRequest>,
}

impl HealthMonitorActor {
    /// Start the actor and, when `probes` is non-empty, a task polling them
    /// every `interval`.
    pub fn spawn(
        probes: Vec<Arc<dyn HealthCheckable>>,
        interval: Duration,
    ) -> (HealthMonitorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(64);
        let actor = Self {
            receiver,
            components: HashMap::new(),
        };
        let handle = HealthMonitorHandle { sender };

        let task = tokio::spawn(actor.run());
        tracing::info!(probes = probes.len(), "HealthMonitorActor started");

        if !probes.is_empty() {
            let poller = handle.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    for probe in &probes {
                        let health = probe.check_health().await;
                        if !poller.update(health).await {
                            return;
                        }
                    }
                }
            });
        }

        (handle, task)
    }

    async fn run(mut self) {
        while let Some(request) = self.receiver.recv().await {
            match request {
                HealthRequest::Update(health) => {
                    tracing::debug!(
                        component = %health.name,
                        status = ?health.status,
                        "Updated component health"
                    );
                    self.components.insert(health.name.clone(), health);
                }
                HealthRequest::Snapshot { respond_to } => {
                    let _ = respond_to.send(SystemHealth {
                        overall_status: self.compute_overall_status(),
                        components: self.components.clone(),
                        check_time: Utc::now(),
                    });
                }
            }
        }
        tracing::info!("HealthMonitorActor stopped");
    }

    fn compute_overall_status(&self) -> HealthStatus {
        let mut degraded = false;
        let mut unhealthy: Vec<String> = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{}: {}", name, msg)),
                HealthStatus::Degraded(_) => degraded = true,
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy.is_empty() {
            unhealthy.sort();
            HealthStatus::Unhealthy(unhealthy.join(", "))
        } else if degraded {
            HealthStatus::Degraded("Some components degraded".to_string())
        } else {
            HealthStatus::Healthy
        }
    }
}

impl HealthMonitorHandle {
    /// Returns false once the actor has stopped.
    pub async fn update(&self, health: ComponentHealth) -> bool {
        self.sender.send(HealthRequest::Update(health)).await.is_ok()
    }

    pub async fn system_health(&self) -> Option<SystemHealth> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(HealthRequest::Snapshot { respond_to })
            .await
            .ok()?;
        response.await.ok()
    }
}

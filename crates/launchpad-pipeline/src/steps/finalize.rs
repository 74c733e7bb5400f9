use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use launchpad_types::{AuditEntry, Notification, Result};
use serde_json::json;

use crate::context::InitializationContext;
use crate::services::{AuditSink, Notifier, ProjectStore};
use crate::step::{names, InitStep, StepProgress};

use super::FINALIZE_WEIGHT;

pub const AUDIT_ACTION: &str = "project.initialized";

/// Marks the project active, then records an audit entry and notifies the user.
///
/// Only the status change can fail the step; audit and notification are best effort.
pub struct FinalizeStep {
    projects: Arc<dyn ProjectStore>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
}

impl FinalizeStep {
    pub fn new(projects: Arc<dyn ProjectStore>, audit: Arc<dyn AuditSink>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            projects,
            audit,
            notifier,
        }
    }
}

#[async_trait]
impl InitStep for FinalizeStep {
    fn name(&self) -> &str {
        names::FINALIZE
    }

    fn display_name(&self) -> &str {
        "Finalize"
    }

    fn weight(&self) -> u32 {
        FINALIZE_WEIGHT
    }

    fn can_handle(&self, _ctx: &InitializationContext) -> bool {
        true
    }

    async fn execute(&self, ctx: &mut InitializationContext, progress: &StepProgress) -> Result<()> {
        let project = ctx.require_project()?.clone();
        let now = Utc::now();

        self.projects.mark_active(&project.id, now).await?;
        progress.report("activate", 50, "Project activated").await;

        let entry = AuditEntry {
            action: AUDIT_ACTION.into(),
            project_id: project.id.clone(),
            user_id: ctx.job.user_id.clone(),
            organization_id: project.organization_id.clone(),
            metadata: json!({
                "templateId": project.template_id,
                "environmentCount": ctx.environments.len(),
                "hasRepository": ctx.repository.is_some(),
                "repository": ctx.repository.as_ref().map(|r| r.full_name.clone()),
                "gitopsResourceCount": ctx.sync_resource_ids.len(),
                "warnings": ctx.warnings,
            }),
            timestamp: now,
        };
        if let Err(e) = self.audit.record(entry).await {
            tracing::warn!(project_id = %project.id, error = %e, "Failed to write audit entry");
        }

        let notification = Notification {
            user_id: ctx.job.user_id.clone(),
            project_id: project.id.clone(),
            title: "Project ready".into(),
            message: format!("{} has been initialized", project.name),
        };
        if let Err(e) = self.notifier.notify(notification).await {
            tracing::warn!(project_id = %project.id, error = %e, "Failed to send notification");
        }

        tracing::info!(project_id = %project.id, "Project finalized");
        progress.report("notify", 100, "Initialization finalized").await;
        Ok(())
    }
}

//! Admin checks and report triage.

use std::fmt;
use std::str::FromStr;

use chirp_types::models::Report;
use chirp_types::ActorId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{require_actor, require_positive, rows, ActionResponse, Gateway};
use crate::backend::{ActionRequest, Operation, Order, Params, Select};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewed => "reviewed",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "reviewed" => Ok(ReportStatus::Reviewed),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(format!("unknown report status: {other}")),
        }
    }
}

impl Gateway {
    /// Server-side admin check. Anything but a literal `true` is `false`.
    pub async fn is_admin(&self, actor: &ActorId) -> ActionResponse<bool> {
        if let Err(err) = require_actor(actor) {
            return self.reject("is_admin", err);
        }
        let request = ActionRequest::new(Operation::rpc("is_admin")).param("p_user_id", actor);
        let response = self.execute(request).await;
        if !response.success {
            return ActionResponse {
                success: false,
                data: None,
                error: response.error,
            };
        }
        ActionResponse::ok(response.data.as_ref().and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn list_reports(&self) -> ActionResponse<Vec<Report>> {
        let request = ActionRequest::new(Operation::select(
            "reports",
            Select {
                order: Some(Order::desc("created_at")),
                ..Select::default()
            },
        ));
        rows(self.fetch(request).await)
    }

    pub async fn update_report_status(
        &self,
        report_id: i64,
        status: ReportStatus,
    ) -> ActionResponse<()> {
        if let Err(err) = require_positive("report id", report_id) {
            return self.reject("update_report_status", err);
        }
        let mut set = Params::new();
        set.insert("status".into(), status.as_str().into());
        let request =
            ActionRequest::new(Operation::update("reports", set)).param("id", report_id);
        self.execute(request).await.map(|_| ())
    }
}

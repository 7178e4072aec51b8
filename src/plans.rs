//! Test plans, held in memory for the lifetime of the process.

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    #[default]
    Draft,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    pub id: String,
    pub title: String,
    pub status: PlanStatus,
    pub creator: String,
    /// ISO-8601; server-set on create.
    pub create_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_time: Option<String>,
}

/// Body of a create request. `id` and `createTime` are assigned by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestPlan {
    pub title: String,
    #[serde(default)]
    pub status: PlanStatus,
    pub creator: String,
    #[serde(default)]
    pub finalizer: Option<String>,
    #[serde(default)]
    pub finalize_time: Option<String>,
}

/// Body of an update request. Present fields overwrite, absent ones are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlanPatch {
    pub title: Option<String>,
    pub status: Option<PlanStatus>,
    pub creator: Option<String>,
    pub create_time: Option<String>,
    pub finalizer: Option<String>,
    pub finalize_time: Option<String>,
}

pub struct TestPlanService {
    plans: RwLock<Vec<TestPlan>>,
}

impl Default for TestPlanService {
    fn default() -> Self {
        Self::with_plans(demo_plans())
    }
}

impl TestPlanService {
    pub fn with_plans(plans: Vec<TestPlan>) -> Self {
        Self {
            plans: RwLock::new(plans),
        }
    }

    /// All plans, optionally filtered by a case-insensitive keyword matched
    /// against title and creator.
    pub async fn list(&self, keyword: Option<&str>) -> Vec<TestPlan> {
        let plans = self.plans.read().await;
        match keyword.map(str::trim).filter(|k| !k.is_empty()) {
            Some(keyword) => {
                let needle = keyword.to_lowercase();
                plans
                    .iter()
                    .filter(|p| {
                        p.title.to_lowercase().contains(&needle)
                            || p.creator.to_lowercase().contains(&needle)
                    })
                    .cloned()
                    .collect()
            }
            None => plans.clone(),
        }
    }

    pub async fn get(&self, id: &str) -> Option<TestPlan> {
        self.plans.read().await.iter().find(|p| p.id == id).cloned()
    }

    pub async fn create(&self, new: NewTestPlan) -> TestPlan {
        let plan = TestPlan {
            id: Uuid::new_v4().to_string(),
            title: new.title,
            status: new.status,
            creator: new.creator,
            create_time: chrono::Utc::now().to_rfc3339(),
            finalizer: new.finalizer,
            finalize_time: new.finalize_time,
        };
        self.plans.write().await.push(plan.clone());
        tracing::info!(id = %plan.id, title = %plan.title, "created test plan");
        plan
    }

    pub async fn update(&self, id: &str, patch: TestPlanPatch) -> Option<TestPlan> {
        let mut plans = self.plans.write().await;
        let plan = plans.iter_mut().find(|p| p.id == id)?;

        if let Some(title) = patch.title {
            plan.title = title;
        }
        if let Some(status) = patch.status {
            plan.status = status;
        }
        if let Some(creator) = patch.creator {
            plan.creator = creator;
        }
        if let Some(create_time) = patch.create_time {
            plan.create_time = create_time;
        }
        if patch.finalizer.is_some() {
            plan.finalizer = patch.finalizer;
        }
        if patch.finalize_time.is_some() {
            plan.finalize_time = patch.finalize_time;
        }
        Some(plan.clone())
    }

    /// Returns whether a plan was removed.
    pub async fn delete(&self, id: &str) -> bool {
        let mut plans = self.plans.write().await;
        let before = plans.len();
        plans.retain(|p| p.id != id);
        plans.len() != before
    }
}

/// Plans the service starts with.
pub fn demo_plans() -> Vec<TestPlan> {
    vec![
        TestPlan {
            id: "1".to_string(),
            title: "COM-CTest test plan".to_string(),
            status: PlanStatus::Completed,
            creator: "Demo User".to_string(),
            create_time: "2022-11-16T16:57:30".to_string(),
            finalizer: Some("Demo User".to_string()),
            finalize_time: Some("2022-11-16T16:59:52".to_string()),
        },
        TestPlan {
            id: "2".to_string(),
            title: "DOM-cTest test plan".to_string(),
            status: PlanStatus::Draft,
            creator: "Demo User".to_string(),
            create_time: "2022-11-16T16:57:08".to_string(),
            finalizer: None,
            finalize_time: None,
        },
        TestPlan {
            id: "3".to_string(),
            title: "[5.0] test plan".to_string(),
            status: PlanStatus::Completed,
            creator: "Demo User".to_string(),
            create_time: "2022-11-16T15:47:53".to_string(),
            finalizer: Some("Demo User".to_string()),
            finalize_time: Some("2022-11-16T16:57:38".to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_and_keyword_filter() {
        let service = TestPlanService::default();
        assert_eq!(service.list(None).await.len(), 3);
        assert_eq!(service.list(Some("")).await.len(), 3);

        let hits = service.list(Some("dom-ctest")).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");

        // Creator matches too
        assert_eq!(service.list(Some("demo")).await.len(), 3);
        assert!(service.list(Some("nothing")).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_time() {
        let service = TestPlanService::with_plans(Vec::new());
        let plan = service
            .create(NewTestPlan {
                title: "Release 6".into(),
                status: PlanStatus::Draft,
                creator: "qa".into(),
                finalizer: None,
                finalize_time: None,
            })
            .await;

        assert!(Uuid::parse_str(&plan.id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&plan.create_time).is_ok());
        assert_eq!(service.get(&plan.id).await, Some(plan));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let service = TestPlanService::default();
        let updated = service
            .update(
                "2",
                TestPlanPatch {
                    status: Some(PlanStatus::Completed),
                    finalizer: Some("lead".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.id, "2");
        assert_eq!(updated.title, "DOM-cTest test plan");
        assert_eq!(updated.status, PlanStatus::Completed);
        assert_eq!(updated.finalizer.as_deref(), Some("lead"));

        assert!(service.update("missing", TestPlanPatch::default()).await.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let service = TestPlanService::default();
        assert!(service.delete("1").await);
        assert!(!service.delete("1").await);
        assert!(service.get("1").await.is_none());
        assert_eq!(service.list(None).await.len(), 2);
    }
}

//! Action-plan tracking: per-goal day toggles and the active-plan overview.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{FlowError, StoreError};
use crate::records::HealthRecords;
use crate::types::{ActionPlan, GoalCategory, PlanGoal};

/// One goal card. Local state changes only after the store accepted the update.
pub struct GoalTracker {
    records: Arc<dyn HealthRecords>,
    goal: PlanGoal,
}

impl GoalTracker {
    pub fn new(records: Arc<dyn HealthRecords>, goal: PlanGoal) -> Self {
        Self { records, goal }
    }

    pub fn goal(&self) -> &PlanGoal {
        &self.goal
    }

    pub fn into_goal(self) -> PlanGoal {
        self.goal
    }

    /// Flip `day` (1-based). Completion holds once the checked-day count reaches `total_days`.
    pub async fn toggle_day(&mut self, day: u32) -> Result<(), FlowError> {
        if day == 0 || day > self.goal.total_days {
            return Err(FlowError::DayOutOfRange(day));
        }

        let mut days = self.goal.completed_days.clone();
        match days.iter().position(|d| *d == day) {
            Some(i) => {
                days.remove(i);
            }
            None => days.push(day),
        }
        let is_completed = days.len() >= self.goal.total_days as usize;

        self.records
            .update_goal_progress(&self.goal.id, &days, is_completed)
            .await?;

        tracing::debug!(target: "cardiosense::plan", goal_id = %self.goal.id, day, is_completed, "goal day toggled");
        self.goal.completed_days = days;
        self.goal.is_completed = is_completed;
        Ok(())
    }

    pub fn progress_percent(&self) -> f64 {
        if self.goal.total_days == 0 {
            return 0.0;
        }
        self.goal.completed_days.len() as f64 / self.goal.total_days as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryGoals {
    pub category: GoalCategory,
    pub goals: Vec<PlanGoal>,
}

/// Summary of a plan as of `today`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanOverview {
    pub plan: ActionPlan,
    pub completed_goals: usize,
    /// Share of goals marked completed, 0 to 100.
    pub progress_percent: f64,
    pub total_days: i64,
    pub days_remaining: i64,
    pub goals_by_category: Vec<CategoryGoals>,
}

impl PlanOverview {
    pub fn from_plan(plan: ActionPlan, today: NaiveDate) -> Self {
        let completed_goals = plan.goals.iter().filter(|g| g.is_completed).count();
        let progress_percent = if plan.goals.is_empty() {
            0.0
        } else {
            completed_goals as f64 / plan.goals.len() as f64 * 100.0
        };

        let total_days = (plan.end_date - plan.start_date).num_days();
        // Partial days count as started, so the start date itself is day one.
        let days_elapsed = (today - plan.start_date).num_days() + 1;
        let days_remaining = (total_days - days_elapsed).max(0);

        let goals_by_category = GoalCategory::ALL
            .iter()
            .map(|category| CategoryGoals {
                category: *category,
                goals: plan
                    .goals
                    .iter()
                    .filter(|g| g.category == *category)
                    .cloned()
                    .collect(),
            })
            .collect();

        Self {
            plan,
            completed_goals,
            progress_percent,
            total_days,
            days_remaining,
            goals_by_category,
        }
    }

    /// The user's active plan, if any.
    pub async fn load_active(
        records: &dyn HealthRecords,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Option<Self>, StoreError> {
        Ok(records
            .active_plan(user_id, today)
            .await?
            .map(|plan| Self::from_plan(plan, today)))
    }
}

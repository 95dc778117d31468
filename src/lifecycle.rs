use crate::errors::{AppError, AppResult};
use crate::models::{Experiment, ExperimentStatus};

use ExperimentStatus::{Active, Archived, Completed, Created, Draft, Paused};

/// Allowed experiment status edges. `Archived` is terminal.
const TRANSITIONS: &[(ExperimentStatus, ExperimentStatus)] = &[
    (Draft, Created),
    (Created, Active),
    (Active, Paused),
    (Paused, Active),
    (Active, Completed),
    (Paused, Completed),
    (Active, Archived),
    (Paused, Archived),
    (Completed, Archived),
];

pub fn can_transition(from: ExperimentStatus, to: ExperimentStatus) -> bool {
    TRANSITIONS.iter().any(|(edge_from, edge_to)| *edge_from == from && *edge_to == to)
}

pub fn check_transition(from: ExperimentStatus, to: ExperimentStatus) -> AppResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Cannot move experiment from {} to {}",
            from.as_str(),
            to.as_str()
        )))
    }
}

/// A draft can only be materialized once it has at least two variants to compare.
pub fn check_draft_ready(variant_count: usize) -> AppResult<()> {
    if variant_count < 2 {
        return Err(AppError::Validation(format!(
            "An experiment needs at least 2 variants (got {})",
            variant_count
        )));
    }
    check_transition(Draft, Created)
}

pub fn validate_winner(experiment: &Experiment, winner_creative_id: &str) -> AppResult<()> {
    if !experiment
        .variant_creative_ids
        .iter()
        .any(|creative_id| creative_id == winner_creative_id)
    {
        return Err(AppError::Validation(format!(
            "Creative {} is not a variant of experiment {}",
            winner_creative_id, experiment.id
        )));
    }
    check_transition(experiment.status, Completed)
}

#[cfg(test)]
mod tests {
    use super::{can_transition, check_draft_ready, validate_winner};
    use crate::models::{Experiment, ExperimentStatus};
    use crate::vocabulary::PlatformObjective;
    use chrono::Utc;

    const ALL: [ExperimentStatus; 6] = [
        ExperimentStatus::Draft,
        ExperimentStatus::Created,
        ExperimentStatus::Active,
        ExperimentStatus::Paused,
        ExperimentStatus::Completed,
        ExperimentStatus::Archived,
    ];

    fn experiment(status: ExperimentStatus) -> Experiment {
        let now = Utc::now();
        Experiment {
            id: "exp-1".to_string(),
            owner_id: "owner-1".to_string(),
            name: "Lifecycle".to_string(),
            variant_creative_ids: vec!["a".to_string(), "b".to_string()],
            external_campaign_id: Some("cmp-1".to_string()),
            external_ad_set_id: Some("set-1".to_string()),
            objective: PlatformObjective::OutcomeTraffic,
            budget_total: 10.0,
            daily_budget: 2.0,
            duration_days: 5,
            status,
            winner_creative_id: None,
            start_date: None,
            end_date: None,
            idempotency_key: None,
            last_synced_at: None,
            last_sync_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn archived_is_terminal() {
        for to in ALL {
            assert!(!can_transition(ExperimentStatus::Archived, to));
        }
    }

    #[test]
    fn pause_and_resume_are_symmetric() {
        assert!(can_transition(ExperimentStatus::Active, ExperimentStatus::Paused));
        assert!(can_transition(ExperimentStatus::Paused, ExperimentStatus::Active));
        assert!(!can_transition(ExperimentStatus::Created, ExperimentStatus::Paused));
        assert!(!can_transition(ExperimentStatus::Completed, ExperimentStatus::Active));
    }

    #[test]
    fn winner_must_be_a_variant() {
        let active = experiment(ExperimentStatus::Active);
        assert!(validate_winner(&active, "a").is_ok());
        assert!(validate_winner(&active, "z").is_err());
        assert!(validate_winner(&experiment(ExperimentStatus::Created), "a").is_err());
    }

    #[test]
    fn draft_needs_two_variants() {
        assert!(check_draft_ready(1).is_err());
        assert!(check_draft_ready(2).is_ok());
    }
}

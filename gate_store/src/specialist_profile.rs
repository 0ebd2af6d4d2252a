use chrono::Utc;
use gate_entities::specialist_profiles;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{Value, json};

pub struct SpecialistProfileStore {
    db: DatabaseConnection,
}

/// Per-session signals folded into the rolling profile update below.
pub struct SessionSignals {
    pub case_id: String,
    pub tsi: Option<f64>,
    pub yellow_signals: u32,
    pub red_signals: u32,
    pub total_signals: u32,
    pub average_delta_trust: Option<f64>,
}

impl SpecialistProfileStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        specialist_telegram_id: i64,
    ) -> anyhow::Result<Option<specialist_profiles::Model>> {
        Ok(specialist_profiles::Entity::find_by_id(specialist_telegram_id)
            .one(&self.db)
            .await?)
    }

    /// Recomputes the rolling profile for a completed simulator session.
    /// Every ratio/average is a weighted rolling mean: `(prev * (n-1) +
    /// this_session) / n` when a profile already existed, or the session's
    /// own value when this is the specialist's first session.
    pub async fn update_after_session(
        &self,
        specialist_telegram_id: i64,
        signals: &SessionSignals,
    ) -> anyhow::Result<specialist_profiles::Model> {
        let existing = self.get(specialist_telegram_id).await?;

        let prev_sessions = existing.as_ref().map_or(0, |p| p.sessions_count);
        let sessions_count = prev_sessions + 1;

        let mut tsi_history: Vec<f64> = existing
            .as_ref()
            .and_then(|p| serde_json::from_value(p.tsi_history.clone()).ok())
            .unwrap_or_default();
        let mut cases_completed: Vec<String> = existing
            .as_ref()
            .and_then(|p| serde_json::from_value(p.cases_completed.clone()).ok())
            .unwrap_or_default();
        cases_completed.push(signals.case_id.clone());

        let average_tsi = if let Some(tsi) = signals.tsi {
            tsi_history.push(tsi);
            round2(tsi_history.iter().sum::<f64>() / tsi_history.len() as f64)
        } else {
            existing.as_ref().map_or(0.0, |p| p.average_tsi)
        };

        let (yellow_ratio, red_ratio) = if signals.total_signals > 0 {
            let yellow_this = f64::from(signals.yellow_signals) / f64::from(signals.total_signals);
            let red_this = f64::from(signals.red_signals) / f64::from(signals.total_signals);
            let yellow_ratio = rolling(
                existing.as_ref().map(|p| p.yellow_ratio),
                prev_sessions,
                sessions_count,
                yellow_this,
            );
            let red_ratio = rolling(
                existing.as_ref().map(|p| p.red_ratio),
                prev_sessions,
                sessions_count,
                red_this,
            );
            (yellow_ratio, red_ratio)
        } else {
            (
                existing.as_ref().map_or(0.0, |p| p.yellow_ratio),
                existing.as_ref().map_or(0.0, |p| p.red_ratio),
            )
        };

        let average_delta_trust = signals.average_delta_trust.map_or_else(
            || existing.as_ref().map_or(0.0, |p| p.average_delta_trust),
            |delta| rolling(existing.as_ref().map(|p| p.average_delta_trust), prev_sessions, sessions_count, delta),
        );

        let now = Utc::now();
        let active = specialist_profiles::ActiveModel {
            specialist_telegram_id: Set(specialist_telegram_id),
            sessions_count: Set(sessions_count),
            average_tsi: Set(average_tsi),
            average_delta_trust: Set(average_delta_trust),
            yellow_ratio: Set(yellow_ratio),
            red_ratio: Set(red_ratio),
            dominant_error_pattern: Set(existing
                .as_ref()
                .map_or_else(String::new, |p| p.dominant_error_pattern.clone())),
            typical_jump_level: Set(existing
                .as_ref()
                .map_or_else(String::new, |p| p.typical_jump_level.clone())),
            recommended_case_complexity: Set(existing
                .as_ref()
                .map_or(0.6, |p| p.recommended_case_complexity)),
            tsi_history: Set(json_of(&tsi_history)),
            cases_completed: Set(json_of(&cases_completed)),
            updated_at: Set(now.into()),
        };

        if existing.is_some() {
            active.update(&self.db).await?;
        } else {
            active.insert(&self.db).await?;
        }
        self.get(specialist_telegram_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("specialist profile vanished immediately after upsert"))
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn rolling(prev_value: Option<f64>, prev_sessions: i32, sessions_count: i32, this_session: f64) -> f64 {
    match (prev_value, prev_sessions) {
        (Some(prev), p) if p > 0 => {
            round2((prev * f64::from(p) + this_session) / f64::from(sessions_count))
        }
        _ => round2(this_session),
    }
}

fn json_of<T: serde::Serialize>(v: &T) -> Value {
    json!(v)
}

#[cfg(test)]
mod tests {
    use super::{rolling, round2};

    #[test]
    fn round2_rounds_to_two_decimal_places() {
        assert!((round2(0.123_456) - 0.12).abs() < f64::EPSILON);
        assert!((round2(0.125) - 0.13).abs() < f64::EPSILON);
    }

    #[test]
    fn rolling_uses_the_raw_value_on_the_first_session() {
        assert!((rolling(None, 0, 1, 0.8) - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn rolling_weights_by_prior_session_count() {
        // prev average 0.5 over 2 sessions, this session 0.8 -> (0.5*2 + 0.8) / 3
        let result = rolling(Some(0.5), 2, 3, 0.8);
        assert!((result - round2((0.5 * 2.0 + 0.8) / 3.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn rolling_falls_back_to_raw_value_when_prior_sessions_is_zero() {
        // an existing profile row with sessions_count still at 0 shouldn't happen,
        // but if it did the rolling mean should not divide by zero
        assert!((rolling(Some(0.5), 0, 1, 0.9) - 0.9).abs() < f64::EPSILON);
    }
}

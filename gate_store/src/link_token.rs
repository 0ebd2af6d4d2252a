use chrono::{Duration, Utc};
use gate_entities::link_tokens;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set, prelude::*};
use thiserror::Error;

const TOKEN_TTL_HOURS: i64 = 24;

pub const TOOL_SERVICES: [&str; 4] = ["screen", "interpretator", "conceptualizator", "simulator"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkVerifyError {
    #[error("invalid token format")]
    InvalidFormat,
    #[error("token not found")]
    NotFound,
    #[error("token already used")]
    AlreadyUsed,
    #[error("token expired")]
    Expired,
    #[error("token not valid for this service")]
    WrongService,
    #[error("token not valid for this user")]
    WrongUser,
    #[error("client token cannot be used with non-screen service")]
    ClientMustUseScreen,
}

/// Everything `verify` checks once the row is in hand. Pulled out of `verify`
/// so the check order can be exercised without a database.
fn check_token_state(
    token: &link_tokens::Model,
    service_id: &str,
    subject_id: i64,
) -> Result<(), LinkVerifyError> {
    if token.used_at.is_some() {
        return Err(LinkVerifyError::AlreadyUsed);
    }
    if Utc::now() > token.expires_at {
        return Err(LinkVerifyError::Expired);
    }
    if token.service_id != service_id {
        return Err(LinkVerifyError::WrongService);
    }
    if token.subject_id != subject_id {
        return Err(LinkVerifyError::WrongUser);
    }
    if token.role == "client" && token.service_id != "screen" {
        return Err(LinkVerifyError::ClientMustUseScreen);
    }
    Ok(())
}

pub struct LinkTokenStore {
    db: DatabaseConnection,
}

impl LinkTokenStore {
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn issue(
        &self,
        service_id: &str,
        context_id: Uuid,
        role: &str,
        subject_id: i64,
    ) -> anyhow::Result<link_tokens::Model> {
        let now = Utc::now();
        let model = link_tokens::ActiveModel {
            jti: Set(Uuid::new_v4()),
            run_id: Set(Uuid::new_v4()),
            service_id: Set(service_id.to_string()),
            context_id: Set(context_id),
            role: Set(role.to_string()),
            subject_id: Set(subject_id),
            expires_at: Set((now + Duration::hours(TOKEN_TTL_HOURS)).into()),
            used_at: Set(None),
            created_at: Set(now.into()),
        };
        Ok(model.insert(&self.db).await?)
    }

    /// Verifies a link token and marks it used, in the exact check order
    /// the link-token service uses: format, existence, use, expiry,
    /// service match, subject match, then the client-must-use-screen rule.
    pub async fn verify(
        &self,
        raw_token: &str,
        service_id: &str,
        subject_id: i64,
    ) -> Result<link_tokens::Model, LinkVerifyError> {
        let jti: Uuid = raw_token
            .parse()
            .map_err(|_| LinkVerifyError::InvalidFormat)?;

        let token = link_tokens::Entity::find_by_id(jti)
            .one(&self.db)
            .await
            .map_err(|_| LinkVerifyError::NotFound)?
            .ok_or(LinkVerifyError::NotFound)?;

        check_token_state(&token, service_id, subject_id)?;

        let mut active: link_tokens::ActiveModel = token.into();
        active.used_at = Set(Some(Utc::now().into()));
        active
            .update(&self.db)
            .await
            .map_err(|_| LinkVerifyError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::{LinkVerifyError, check_token_state};
    use chrono::{Duration, Utc};
    use gate_entities::link_tokens;
    use uuid::Uuid;

    fn sample_token() -> link_tokens::Model {
        link_tokens::Model {
            jti: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            service_id: "screen".to_string(),
            context_id: Uuid::new_v4(),
            role: "specialist".to_string(),
            subject_id: 42,
            expires_at: (Utc::now() + Duration::hours(1)).into(),
            used_at: None,
            created_at: Utc::now().into(),
        }
    }

    #[test]
    fn accepts_a_fresh_matching_token() {
        let token = sample_token();
        assert!(check_token_state(&token, "screen", 42).is_ok());
    }

    #[test]
    fn rejects_an_already_used_token() {
        let mut token = sample_token();
        token.used_at = Some(Utc::now().into());
        assert_eq!(check_token_state(&token, "screen", 42), Err(LinkVerifyError::AlreadyUsed));
    }

    #[test]
    fn rejects_an_expired_token_even_if_otherwise_unused() {
        let mut token = sample_token();
        token.expires_at = (Utc::now() - Duration::hours(1)).into();
        assert_eq!(check_token_state(&token, "screen", 42), Err(LinkVerifyError::Expired));
    }

    #[test]
    fn expiry_is_checked_before_service_match() {
        let mut token = sample_token();
        token.expires_at = (Utc::now() - Duration::hours(1)).into();
        token.service_id = "interpretator".to_string();
        assert_eq!(check_token_state(&token, "screen", 42), Err(LinkVerifyError::Expired));
    }

    #[test]
    fn rejects_a_token_issued_for_a_different_service() {
        let token = sample_token();
        assert_eq!(
            check_token_state(&token, "interpretator", 42),
            Err(LinkVerifyError::WrongService)
        );
    }

    #[test]
    fn service_match_is_checked_before_subject_match() {
        let mut token = sample_token();
        token.service_id = "interpretator".to_string();
        assert_eq!(
            check_token_state(&token, "screen", 7),
            Err(LinkVerifyError::WrongService)
        );
    }

    #[test]
    fn rejects_a_token_issued_for_a_different_subject() {
        let token = sample_token();
        assert_eq!(check_token_state(&token, "screen", 7), Err(LinkVerifyError::WrongUser));
    }

    #[test]
    fn rejects_a_client_token_for_a_non_screen_service() {
        let mut token = sample_token();
        token.service_id = "interpretator".to_string();
        token.role = "client".to_string();
        assert_eq!(
            check_token_state(&token, "interpretator", 42),
            Err(LinkVerifyError::ClientMustUseScreen)
        );
    }

    #[test]
    fn allows_a_client_token_for_the_screen_service() {
        let mut token = sample_token();
        token.role = "client".to_string();
        assert!(check_token_state(&token, "screen", 42).is_ok());
    }
}

use async_trait::async_trait;
use sea_orm_migration::prelude::*;

/// One migration per table, in dependency order. Raw SQL is used rather
/// than the `sea_query` table builder: several columns need Postgres
/// specifics (`gen_random_uuid()`, `JSONB`, partial unique constraints)
/// that the builder doesn't model directly.
pub struct Migrator;

#[async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m_users::Migration),
            Box::new(m_contexts::Migration),
            Box::new(m_link_tokens::Migration),
            Box::new(m_telegram_update_dedup::Migration),
            Box::new(m_bot_chat_state::Migration),
            Box::new(m_artifacts::Migration),
            Box::new(m_screening_assessment::Migration),
            Box::new(m_specialist_profiles::Migration),
        ]
    }
}

macro_rules! raw_migration {
    ($name:ident, $up:expr, $down:expr) => {
        mod $name {
            use super::{DbErr, MigrationName, MigrationTrait, SchemaManager, async_trait};

            pub struct Migration;

            impl MigrationName for Migration {
                fn name(&self) -> &str {
                    stringify!($name)
                }
            }

            #[async_trait]
            impl MigrationTrait for Migration {
                async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
                    manager.get_connection().execute_unprepared($up).await?;
                    Ok(())
                }

                async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
                    manager.get_connection().execute_unprepared($down).await?;
                    Ok(())
                }
            }
        }
    };
}

use sea_orm_migration::sea_orm::DbErr;

raw_migration!(
    m_users,
    r#"
    CREATE TABLE users (
        user_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        telegram_id BIGINT NOT NULL,
        role VARCHAR(20) NOT NULL DEFAULT 'specialist',
        username VARCHAR(255),
        full_name VARCHAR(255),
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE UNIQUE INDEX idx_users_telegram_id ON users (telegram_id);
    "#,
    "DROP TABLE IF EXISTS users;"
);

raw_migration!(
    m_contexts,
    r#"
    CREATE TABLE contexts (
        context_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        specialist_user_id UUID NOT NULL REFERENCES users (user_id),
        client_ref VARCHAR(255),
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    CREATE INDEX idx_contexts_specialist ON contexts (specialist_user_id);
    "#,
    "DROP TABLE IF EXISTS contexts;"
);

raw_migration!(
    m_link_tokens,
    r#"
    CREATE TABLE link_tokens (
        jti UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        run_id UUID NOT NULL,
        service_id VARCHAR(32) NOT NULL,
        context_id UUID NOT NULL REFERENCES contexts (context_id),
        role VARCHAR(20) NOT NULL,
        subject_id BIGINT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT uq_link_tokens_service_run UNIQUE (service_id, run_id)
    );
    CREATE INDEX idx_link_tokens_context ON link_tokens (context_id);
    CREATE INDEX idx_link_tokens_expires ON link_tokens (expires_at);
    "#,
    "DROP TABLE IF EXISTS link_tokens;"
);

raw_migration!(
    m_telegram_update_dedup,
    r#"
    CREATE TABLE telegram_update_dedup (
        bot_id VARCHAR(50) NOT NULL,
        update_id BIGINT NOT NULL,
        chat_id BIGINT NOT NULL,
        received_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (bot_id, update_id)
    );
    CREATE INDEX idx_telegram_update_dedup_chat ON telegram_update_dedup (bot_id, chat_id, update_id);
    "#,
    "DROP TABLE IF EXISTS telegram_update_dedup;"
);

raw_migration!(
    m_bot_chat_state,
    r#"
    CREATE TABLE bot_chat_state (
        bot_id VARCHAR(50) NOT NULL,
        chat_id BIGINT NOT NULL,
        user_id BIGINT,
        role VARCHAR(20) NOT NULL DEFAULT 'specialist',
        state VARCHAR(100) NOT NULL DEFAULT 'idle',
        state_payload JSONB NOT NULL DEFAULT '{}'::jsonb,
        context_id UUID,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (bot_id, chat_id)
    );
    CREATE INDEX idx_bot_chat_state_context ON bot_chat_state (context_id);
    "#,
    "DROP TABLE IF EXISTS bot_chat_state;"
);

raw_migration!(
    m_artifacts,
    r#"
    CREATE TABLE artifacts (
        artifact_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        context_id UUID NOT NULL REFERENCES contexts (context_id) ON DELETE CASCADE,
        service_id VARCHAR(32) NOT NULL,
        run_id UUID NOT NULL,
        specialist_telegram_id BIGINT NOT NULL,
        payload JSONB NOT NULL,
        summary TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CONSTRAINT uq_artifacts_run_service UNIQUE (run_id, service_id)
    );
    CREATE INDEX idx_artifacts_context_time ON artifacts (context_id, created_at);
    CREATE INDEX idx_artifacts_specialist ON artifacts (specialist_telegram_id, created_at);
    "#,
    "DROP TABLE IF EXISTS artifacts;"
);

raw_migration!(
    m_screening_assessment,
    r#"
    CREATE TABLE screening_assessment (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        context_id UUID NOT NULL REFERENCES contexts (context_id),
        specialist_user_id BIGINT NOT NULL,
        client_chat_id BIGINT,
        link_token_jti UUID REFERENCES link_tokens (jti),
        status VARCHAR(20) NOT NULL DEFAULT 'created',
        phase INTEGER NOT NULL DEFAULT 0,
        phase1_completed BOOLEAN NOT NULL DEFAULT FALSE,
        phase2_questions INTEGER NOT NULL DEFAULT 0,
        phase3_questions INTEGER NOT NULL DEFAULT 0,
        axis_vector JSONB NOT NULL DEFAULT '{}'::jsonb,
        layer_vector JSONB NOT NULL DEFAULT '{}'::jsonb,
        tension_matrix JSONB NOT NULL DEFAULT '{}'::jsonb,
        rigidity JSONB NOT NULL DEFAULT '{}'::jsonb,
        confidence DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        ambiguity_zones JSONB NOT NULL DEFAULT '[]'::jsonb,
        dominant_cells JSONB NOT NULL DEFAULT '[]'::jsonb,
        response_history JSONB NOT NULL DEFAULT '[]'::jsonb,
        report_json JSONB,
        report_text TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        expires_at TIMESTAMPTZ
    );
    CREATE INDEX idx_screening_assessment_context ON screening_assessment (context_id);
    CREATE INDEX idx_screening_assessment_status ON screening_assessment (status);
    "#,
    "DROP TABLE IF EXISTS screening_assessment;"
);

raw_migration!(
    m_specialist_profiles,
    r#"
    CREATE TABLE specialist_profiles (
        specialist_telegram_id BIGINT PRIMARY KEY,
        sessions_count INTEGER NOT NULL DEFAULT 0,
        average_tsi DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        average_delta_trust DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        yellow_ratio DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        red_ratio DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        dominant_error_pattern VARCHAR(100) NOT NULL DEFAULT '',
        typical_jump_level VARCHAR(50) NOT NULL DEFAULT '',
        recommended_case_complexity DOUBLE PRECISION NOT NULL DEFAULT 0.6,
        tsi_history JSONB NOT NULL DEFAULT '[]'::jsonb,
        cases_completed JSONB NOT NULL DEFAULT '[]'::jsonb,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    "DROP TABLE IF EXISTS specialist_profiles;"
);

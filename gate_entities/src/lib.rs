pub mod artifacts;
pub mod bot_chat_state;
pub mod contexts;
pub mod link_tokens;
pub mod migrator;
pub mod screening_assessments;
pub mod specialist_profiles;
pub mod telegram_update_dedup;
pub mod users;

pub use migrator::Migrator;

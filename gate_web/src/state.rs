use std::collections::HashMap;
use std::sync::Arc;

use gate_bots::{
    Handler, HandlerContext,
    conceptualizer::ConceptualizerHandler,
    interpreter::InterpreterHandler,
    pro::ProHandler,
    screen::ScreenHandler,
    simulator::SimulatorHandler,
};
use gate_config::Config;
use gate_core::Oracle;
use gate_store::{ArtifactStore, DedupStore, FsmStore, IdentityStore, LinkTokenStore, ScreeningStore, SpecialistProfileStore};
use sea_orm::DatabaseConnection;

use crate::telegram::TelegramApi;

/// Everything a webhook or REST request needs, cloned cheaply per request
/// the way `axum::extract::State` expects: one `Arc` per shared resource,
/// mirroring `ingress-telegram`'s `AppState`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub fsm: Arc<FsmStore>,
    pub dedup: Arc<DedupStore>,
    pub identity: Arc<IdentityStore>,
    pub link_tokens: Arc<LinkTokenStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub screenings: Arc<ScreeningStore>,
    pub specialist_profiles: Arc<SpecialistProfileStore>,
    pub oracle: Arc<dyn Oracle>,
    pub telegram: Arc<dyn TelegramApi>,
    pub handlers: Arc<HashMap<&'static str, Arc<dyn Handler>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, db: DatabaseConnection, oracle: Arc<dyn Oracle>, telegram: Arc<dyn TelegramApi>) -> Self {
        let mut handlers: HashMap<&'static str, Arc<dyn Handler>> = HashMap::new();
        let interpreter: Arc<dyn Handler> = Arc::new(InterpreterHandler::new());
        let conceptualizer: Arc<dyn Handler> = Arc::new(ConceptualizerHandler);
        let simulator: Arc<dyn Handler> = Arc::new(SimulatorHandler::new());
        let screen: Arc<dyn Handler> = Arc::new(ScreenHandler);
        let pro: Arc<dyn Handler> = Arc::new(ProHandler::new());
        handlers.insert(interpreter.bot_id(), interpreter);
        handlers.insert(conceptualizer.bot_id(), conceptualizer);
        handlers.insert(simulator.bot_id(), simulator);
        handlers.insert(screen.bot_id(), screen);
        handlers.insert(pro.bot_id(), pro);

        Self {
            config: Arc::new(config),
            fsm: Arc::new(FsmStore::new(db.clone())),
            dedup: Arc::new(DedupStore::new(db.clone())),
            identity: Arc::new(IdentityStore::new(db.clone())),
            link_tokens: Arc::new(LinkTokenStore::new(db.clone())),
            artifacts: Arc::new(ArtifactStore::new(db.clone())),
            screenings: Arc::new(ScreeningStore::new(db.clone())),
            specialist_profiles: Arc::new(SpecialistProfileStore::new(db.clone())),
            db,
            oracle,
            telegram,
            handlers: Arc::new(handlers),
        }
    }

    #[must_use]
    pub fn handler(&self, bot_id: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(bot_id).cloned()
    }

    /// Assembles a `HandlerContext` borrowing every store out of `self`.
    /// `state`/`incoming` are supplied per call since they vary per request.
    #[must_use]
    pub fn handler_context<'a>(
        &'a self,
        chat_id: i64,
        user_id: Option<i64>,
        incoming: &'a gate_bots::Incoming,
        state: Option<&'a gate_entities::bot_chat_state::Model>,
    ) -> HandlerContext<'a> {
        HandlerContext {
            chat_id,
            user_id,
            incoming,
            state,
            fsm: self.fsm.as_ref(),
            identity: self.identity.as_ref(),
            link_tokens: self.link_tokens.as_ref(),
            artifacts: self.artifacts.as_ref(),
            screenings: self.screenings.as_ref(),
            specialist_profiles: self.specialist_profiles.as_ref(),
            oracle: &self.oracle,
        }
    }
}

use std::collections::HashMap;
use std::sync::OnceLock;

use livedata_api::LiveDataError;

use super::{EventListener, HistoListener, ListenerContext, LiveListener};

pub type ListenerConstructor = fn(ListenerContext) -> Box<dyn LiveListener>;

/// Listener kinds by name. Filled once, read-only afterwards.
pub struct ListenerRegistry {
    constructors: HashMap<&'static str, ListenerConstructor>,
}

static REGISTRY: OnceLock<ListenerRegistry> = OnceLock::new();

/// Process-wide registry with the built-in kinds.
pub fn registry() -> &'static ListenerRegistry {
    REGISTRY.get_or_init(ListenerRegistry::with_builtins)
}

impl ListenerRegistry {
    fn with_builtins() -> Self {
        let mut constructors: HashMap<&'static str, ListenerConstructor> = HashMap::new();
        constructors.insert(EventListener::KIND, |ctx| Box::new(EventListener::new(ctx)));
        constructors.insert(HistoListener::KIND, |ctx| Box::new(HistoListener::new(ctx)));
        Self { constructors }
    }

    pub fn create(
        &self,
        kind: &str,
        ctx: ListenerContext,
    ) -> Result<Box<dyn LiveListener>, LiveDataError> {
        let constructor = self.constructors.get(kind).ok_or_else(|| {
            LiveDataError::Config(format!(
                "unknown listener kind '{kind}', available: {}",
                self.kinds().join(", ")
            ))
        })?;
        Ok(constructor(ctx))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.constructors.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RoundError;
use crate::round::{CollectionRound, DegenerateRound, Round, RoundId, RoundSpec};

pub type RoundFactory = Arc<dyn Fn() -> Box<dyn Round> + Send + Sync>;

/// Start-up table from round id to the constructor of a fresh round
#[derive(Clone, Default)]
pub struct RoundRegistry {
    factories: BTreeMap<RoundId, RoundFactory>,
}

impl RoundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: RoundId, factory: RoundFactory) -> Result<(), RoundError> {
        if self.factories.contains_key(&id) {
            return Err(RoundError::internal(format!(
                "round '{}' is already registered",
                id
            )));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    pub fn register_collection(&mut self, spec: RoundSpec) -> Result<(), RoundError> {
        let id = spec.id;
        self.register(
            id,
            Arc::new(move || Box::new(CollectionRound::new(spec.clone())) as Box<dyn Round>),
        )
    }

    pub fn register_degenerate(&mut self, id: RoundId) -> Result<(), RoundError> {
        self.register(
            id,
            Arc::new(move || Box::new(DegenerateRound::new(id)) as Box<dyn Round>),
        )
    }

    /// Merge every entry of `other`, failing on duplicates
    pub fn extend(&mut self, other: RoundRegistry) -> Result<(), RoundError> {
        for (id, factory) in other.factories {
            self.register(id, factory)?;
        }
        Ok(())
    }

    pub fn contains(&self, id: RoundId) -> bool {
        self.factories.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = RoundId> + '_ {
        self.factories.keys().copied()
    }

    /// Find a registered id by name
    pub fn lookup(&self, name: &str) -> Option<RoundId> {
        self.ids().find(|id| id.name() == name)
    }

    pub fn create(&self, id: RoundId) -> Result<Box<dyn Round>, RoundError> {
        let factory = self
            .factories
            .get(&id)
            .ok_or_else(|| RoundError::internal(format!("round '{}' is not registered", id)))?;
        let round = factory();
        if round.id() != id {
            return Err(RoundError::internal(format!(
                "factory for '{}' built round '{}'",
                id,
                round.id()
            )));
        }
        Ok(round)
    }
}

impl std::fmt::Debug for RoundRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

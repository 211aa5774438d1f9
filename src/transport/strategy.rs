//! Strategy table: which transports to try, in which order, for a scheme.
//!
//! The registry is built explicitly and handed to each composite channel.
//! There is no process-wide default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::{ChannelError, Transport, TransportContext, TransportFactory};

/// Identifier of a transport strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StrategyId(&'static str);

impl StrategyId {
    /// Direct persistent socket.
    pub const NATIVE: StrategyId = StrategyId("native");
    /// HTTP request based emulation.
    pub const EMULATED: StrategyId = StrategyId("emulated");

    /// Create a custom strategy identifier.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Strategy name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Ordered candidates for one scheme token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPlan {
    /// Strategies to try, front first.
    pub candidates: Vec<StrategyId>,
    /// Whether a failure before open may advance to the next candidate.
    pub fallback: bool,
}

/// Scheme table plus the factories that build each strategy.
#[derive(Default)]
pub struct StrategyRegistry {
    schemes: HashMap<String, StrategyPlan>,
    factories: HashMap<StrategyId, Arc<dyn TransportFactory>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the standard scheme table and no factories.
    ///
    /// | scheme | candidates | fallback |
    /// |---|---|---|
    /// | `ws`, `wss` | native, emulated | yes |
    /// | `native:ws`, `native:wss` | native | no |
    /// | `emulated:ws`, `emulated:wss` | emulated | no |
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for scheme in ["ws", "wss"] {
            registry = registry
                .scheme(scheme, &[StrategyId::NATIVE, StrategyId::EMULATED])
                .qualified_scheme(&format!("native:{scheme}"), StrategyId::NATIVE)
                .qualified_scheme(&format!("emulated:{scheme}"), StrategyId::EMULATED);
        }
        registry
    }

    /// Map `token` to candidates tried in order, with fallback.
    pub fn scheme(mut self, token: &str, candidates: &[StrategyId]) -> Self {
        self.schemes.insert(
            token.to_ascii_lowercase(),
            StrategyPlan {
                candidates: candidates.to_vec(),
                fallback: true,
            },
        );
        self
    }

    /// Map `token` to exactly one strategy, without fallback.
    pub fn qualified_scheme(mut self, token: &str, strategy: StrategyId) -> Self {
        self.schemes.insert(
            token.to_ascii_lowercase(),
            StrategyPlan {
                candidates: vec![strategy],
                fallback: false,
            },
        );
        self
    }

    /// Register the factory for `strategy`, replacing any previous one.
    pub fn register<F>(mut self, strategy: StrategyId, factory: F) -> Self
    where
        F: TransportFactory + 'static,
    {
        self.factories.insert(strategy, Arc::new(factory));
        self
    }

    /// Check if a factory is registered for `strategy`.
    pub fn has_factory(&self, strategy: StrategyId) -> bool {
        self.factories.contains_key(&strategy)
    }

    /// Candidates for `token`, limited to strategies with a factory.
    pub fn plan(&self, token: &str) -> Result<StrategyPlan, ChannelError> {
        let plan = self
            .schemes
            .get(&token.to_ascii_lowercase())
            .ok_or_else(|| ChannelError::UnknownScheme(token.to_string()))?;

        let candidates: Vec<_> = plan
            .candidates
            .iter()
            .copied()
            .filter(|strategy| self.has_factory(*strategy))
            .collect();
        if candidates.is_empty() {
            return Err(ChannelError::Config(format!(
                "no transport registered for scheme {token}"
            )));
        }

        Ok(StrategyPlan {
            candidates,
            fallback: plan.fallback,
        })
    }

    /// Build a transport for `context.strategy`.
    pub fn create(&self, context: &TransportContext) -> Result<Box<dyn Transport>, ChannelError> {
        let factory = self.factories.get(&context.strategy).ok_or_else(|| {
            ChannelError::Config(format!("no transport registered for {}", context.strategy))
        })?;
        factory.create(context)
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("schemes", &self.schemes)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

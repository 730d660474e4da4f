/// The directive engine: registries, configuration, pool tables and the
/// PRNG behind one facade. Built via `DirectiveEngine::builder()`.
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::config::{ConfigError, EngineConfig};
use crate::core::directive::{DirectiveError, Resolution, Resolver};
use crate::core::dispatch::Dispatcher;
use crate::core::draw::{self, IntoEntries, Weighted};
use crate::core::expression::{ClauseMode, ConditionParams, Evaluator, ExpressionError};
use crate::core::pool::{self, PoolRef};
use crate::core::registry::{ActionRecord, Registries, RegistryError};
use crate::schema::pool::{DrawSettings, PoolDrawSettings, PoolError, PoolTables};
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("pool data error: {0}")]
    Pool(#[from] PoolError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("directive error: {0}")]
    Directive(#[from] DirectiveError),
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DirectiveEngine {
    registries: Registries,
    config: EngineConfig,
    pools: PoolTables,
    seed: u64,
    rng: StdRng,
}

/// Builder for constructing a `DirectiveEngine`.
pub struct DirectiveEngineBuilder {
    seed: u64,
    config: Option<EngineConfig>,
    config_path: Option<PathBuf>,
    pool_files: Vec<PathBuf>,
    pools_dirs: Vec<PathBuf>,
    /// Directly provided pools (for testing without files).
    pools: Option<PoolTables>,
}

impl DirectiveEngine {
    pub fn builder() -> DirectiveEngineBuilder {
        DirectiveEngineBuilder {
            seed: 0,
            config: None,
            config_path: None,
            pool_files: Vec::new(),
            pools_dirs: Vec::new(),
            pools: None,
        }
    }

    /// Resolve a directive-bearing string. With `skip_actions` the actions
    /// are collected but not dispatched.
    pub fn resolve_string(
        &self,
        state: &mut dyn GameState,
        input: &str,
        skip_actions: bool,
    ) -> Result<Resolution, DirectiveError> {
        Resolver::new(&self.registries, &self.config).resolve(state, input, skip_actions)
    }

    /// Resolve a stored content line. `None` when the line does not exist.
    pub fn resolve_line(
        &self,
        state: &mut dyn GameState,
        line_id: &str,
        dungeon_id: Option<&str>,
    ) -> Result<Option<Resolution>, DirectiveError> {
        let Some(line) = state.line(line_id, dungeon_id) else {
            tracing::warn!(line = line_id, dungeon = ?dungeon_id, "content line not found");
            return Ok(None);
        };
        self.resolve_string(state, &line.val, false).map(Some)
    }

    /// Decide whether a choice is shown (`if` / `ifOr`) or, with
    /// `is_active_clause`, enabled (`active` / `activeOr`). No params passes.
    pub fn perform_conditional_evaluation(
        &self,
        state: &dyn GameState,
        params: Option<&ConditionParams>,
        is_active_clause: bool,
    ) -> Result<bool, ExpressionError> {
        let Some(params) = params else {
            return Ok(true);
        };
        params.evaluate(&self.evaluator(state), is_active_clause)
    }

    /// Evaluate a comma-separated condition list.
    pub fn evaluate(
        &self,
        state: &dyn GameState,
        expr: &str,
        mode: ClauseMode,
    ) -> Result<bool, ExpressionError> {
        self.evaluator(state).evaluate_list(expr, mode)
    }

    pub fn evaluate_single(
        &self,
        state: &dyn GameState,
        expr: &str,
    ) -> Result<bool, ExpressionError> {
        self.evaluator(state).evaluate_single(expr)
    }

    fn evaluator<'a>(&'a self, state: &'a dyn GameState) -> Evaluator<'a> {
        Evaluator::new(&self.registries.conditions, state)
    }

    pub fn register_condition<F>(&mut self, id: &str, condition: F) -> Result<(), RegistryError>
    where
        F: Fn(&dyn GameState, &[String]) -> Value + 'static,
    {
        self.registries.register_condition(id, condition)
    }

    pub fn register_action(&mut self, id: &str, record: ActionRecord) {
        self.registries.register_action(id, record);
    }

    pub fn register_placeholder<F>(&mut self, id: &str, placeholder: F)
    where
        F: Fn(&dyn GameState, &[String]) -> Option<String> + 'static,
    {
        self.registries.register_placeholder(id, placeholder);
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Dispatch an actions map. Returns the number of handler invocations.
    pub fn dispatch(
        &self,
        state: &mut dyn GameState,
        actions: &Map<String, Value>,
        skip_delayed: bool,
    ) -> usize {
        Dispatcher::new(&self.registries.actions).dispatch(state, actions, skip_delayed)
    }

    /// Run only the delayed subset of `actions`. Called by the scheduler
    /// once the deferred point is reached.
    pub fn dispatch_delayed(
        &self,
        state: &mut dyn GameState,
        actions: &Map<String, Value>,
    ) -> usize {
        let delayed = self.delayed_actions(actions);
        self.dispatch(state, &delayed, false)
    }

    /// Replay the on-game-load subset of `actions` after a save is restored.
    pub fn replay_on_game_load(
        &self,
        state: &mut dyn GameState,
        actions: &Map<String, Value>,
    ) -> usize {
        let on_load = self.on_game_load_actions(actions);
        self.dispatch(state, &on_load, false)
    }

    pub fn delayed_actions(&self, actions: &Map<String, Value>) -> Map<String, Value> {
        Dispatcher::new(&self.registries.actions).delayed_actions(actions)
    }

    pub fn on_game_load_actions(&self, actions: &Map<String, Value>) -> Map<String, Value> {
        Dispatcher::new(&self.registries.actions).on_game_load_actions(actions)
    }

    pub fn apply_choice_modifiers(
        &self,
        state: &dyn GameState,
        actions: &Map<String, Value>,
        choice: &mut Value,
    ) {
        Dispatcher::new(&self.registries.actions).apply_choice_modifiers(state, actions, choice);
    }

    /// Draw template keys from a pool entry, by id or directly.
    pub fn draw_from_pool<'p>(
        &mut self,
        state: &dyn GameState,
        pool: impl Into<PoolRef<'p>>,
        settings: &PoolDrawSettings,
    ) -> Vec<String> {
        let defaults = self.config.draw_defaults();
        pool::draw_from_pool(&self.pools, state, pool.into(), settings, &defaults, &mut self.rng)
    }

    /// Draw values straight from a collection.
    pub fn draw_from_collection<C>(&mut self, data: C, settings: &DrawSettings) -> Vec<C::Item>
    where
        C: IntoEntries,
        C::Item: Weighted + Clone,
    {
        let defaults = self.config.draw_defaults();
        draw::draw_from_collection(data, settings, &defaults, &mut self.rng)
    }

    pub fn pools(&self) -> &PoolTables {
        &self.pools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// New-game boundary: clear every registration, re-install built-ins
    /// when configured, and restart the PRNG from the current seed.
    pub fn reset_instance(&mut self) {
        self.registries.reset(self.config.builtins);
        self.rng = StdRng::seed_from_u64(self.seed);
        tracing::info!(seed = self.seed, "engine instance reset");
    }
}

impl DirectiveEngineBuilder {
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the config from a RON file. Takes precedence over `config`.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Add a pool RON file. Files load in the order given.
    pub fn pools_file(mut self, path: impl AsRef<Path>) -> Self {
        self.pool_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load every `.ron` pool file in a directory, in file-name order.
    pub fn pools_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.pools_dirs.push(path.as_ref().to_path_buf());
        self
    }

    /// Provide pools directly (for testing without files).
    pub fn with_pools(mut self, pools: PoolTables) -> Self {
        self.pools = Some(pools);
        self
    }

    pub fn build(self) -> Result<DirectiveEngine, EngineError> {
        let config = match &self.config_path {
            Some(path) => EngineConfig::load_from_ron(path)?,
            None => self.config.unwrap_or_default(),
        };

        // Directories first, then explicit files, so a named file can patch
        // a whole mod directory.
        let mut pools = self.pools.unwrap_or_default();
        for dir in &self.pools_dirs {
            if dir.exists() {
                load_ron_files_from_dir(dir, |path| {
                    pools.merge(PoolTables::load_from_ron(path)?);
                    Ok(())
                })?;
            } else {
                tracing::warn!(dir = %dir.display(), "pools directory does not exist");
            }
        }
        for path in &self.pool_files {
            pools.merge(PoolTables::load_from_ron(path)?);
        }

        let registries = if config.builtins {
            Registries::with_builtins()
        } else {
            Registries::new()
        };

        tracing::info!(
            seed = self.seed,
            pools = pools.entries.len(),
            builtins = config.builtins,
            "directive engine built"
        );

        Ok(DirectiveEngine {
            registries,
            config,
            pools,
            seed: self.seed,
            rng: StdRng::seed_from_u64(self.seed),
        })
    }
}

/// Load all .ron files from a directory in file-name order, calling
/// `loader` for each.
fn load_ron_files_from_dir<F>(dir: &Path, mut loader: F) -> Result<(), EngineError>
where
    F: FnMut(&Path) -> Result<(), EngineError>,
{
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            paths.push(path);
        }
    }
    paths.sort();
    for path in &paths {
        loader(path)?;
    }
    Ok(())
}

//! Model engine: the one place that owns the trained-model registry, the
//! per-model training locks, the model cache, the performance monitor and
//! the retrain scheduler.
//!
//! Construct one per process (or per test) and share it behind an `Arc`.

use crate::application::ml::cross_validation::{CrossValidator, CvReport};
use crate::application::ml::ensemble::EnsembleSettings;
use crate::application::ml::learner_factory::learner_from_metadata;
use crate::application::ml::model_cache::{CacheStats, ModelCache};
use crate::application::monitoring::performance_monitor::PerformanceMonitor;
use crate::application::monitoring::retrain_scheduler::RetrainScheduler;
use crate::config::EngineConfig;
use crate::domain::errors::TrainingError;
use crate::domain::ml::cancellation::CancellationToken;
use crate::domain::ml::dataset::Dataset;
use crate::domain::ml::learner::BaseLearner;
use crate::domain::ml::model::{ModelMetadata, ModelState, ValidationSummary};
use crate::domain::performance::performance_evaluator::PerformanceEvaluator;
use crate::domain::performance::prediction_record::{ModelPerformanceRecord, PerformanceStats};
use crate::domain::performance::retrain_trigger::RetrainReason;
use crate::domain::ports::TrainingDataProvider;
use crate::domain::repositories::MetadataRepository;
use crate::infrastructure::observability::Metrics;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime knobs the engine needs from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub training_timeout: Duration,
    pub retrain_cooldown: Duration,
    pub enforce_data_hash: bool,
    /// Cross-validated accuracy below this is logged as not acceptable.
    pub min_cv_accuracy: f64,
    /// Used when rebuilding ensembles from persisted metadata.
    pub ensemble: EnsembleSettings,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            training_timeout: config.training.timeout,
            retrain_cooldown: config.scheduler.cooldown,
            enforce_data_hash: config.cache.enforce_data_hash,
            min_cv_accuracy: config.scheduler.min_accuracy,
            ensemble: config.training.ensemble_settings(),
        }
    }
}

const MIN_RETRAIN_LOOP_INTERVAL: Duration = Duration::from_millis(1);

type TrainedModel = (Box<dyn BaseLearner>, Option<CvReport>);

struct RegisteredModel {
    symbol: String,
    prototype: Box<dyn BaseLearner>,
    trained: Option<Arc<dyn BaseLearner>>,
    state: ModelState,
    data_hash: Option<String>,
    last_completed: Option<Instant>,
    trained_at: Option<DateTime<Utc>>,
    validation: Option<ValidationSummary>,
}

/// Read-only view of a registered model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub name: String,
    pub symbol: String,
    pub learner: String,
    pub state: ModelState,
    pub trained_at: Option<DateTime<Utc>>,
    pub data_hash: Option<String>,
    pub validation: Option<ValidationSummary>,
}

#[derive(Debug)]
pub enum TrainingOutcome {
    Trained {
        report: Option<CvReport>,
        elapsed: Duration,
    },
    /// A retrain finished within the cooldown window; nothing was done.
    Skipped { since_last: Duration },
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RetrainCycleReport {
    pub evaluated: usize,
    pub retrained: Vec<String>,
    pub skipped: Vec<String>,
    pub no_data: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct ModelEngine {
    registry: RwLock<HashMap<String, RegisteredModel>>,
    training_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cache: ModelCache,
    monitor: PerformanceMonitor,
    scheduler: RetrainScheduler,
    validator: CrossValidator,
    metadata: Arc<dyn MetadataRepository>,
    data_provider: Option<Arc<dyn TrainingDataProvider>>,
    metrics: Metrics,
    settings: EngineSettings,
}

impl std::fmt::Debug for ModelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEngine")
            .field("registry", &"<RwLock>")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ModelEngine {
    pub fn new(config: &EngineConfig, metadata: Arc<dyn MetadataRepository>, metrics: Metrics) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            training_locks: Mutex::new(HashMap::new()),
            cache: ModelCache::new(config.cache.max_size, config.cache.ttl),
            monitor: PerformanceMonitor::new(config.scheduler.monitor_capacity),
            scheduler: RetrainScheduler::new(PerformanceEvaluator::new(config.scheduler.thresholds())),
            validator: CrossValidator::new(config.validation.cv_settings()),
            metadata,
            data_provider: None,
            metrics,
            settings: EngineSettings::from_config(config),
        }
    }

    pub fn with_data_provider(mut self, provider: Arc<dyn TrainingDataProvider>) -> Self {
        self.data_provider = Some(provider);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn read_registry(&self) -> RwLockReadGuard<'_, HashMap<String, RegisteredModel>> {
        match self.registry.read() {
            Ok(g) => g,
            Err(poisoned) => {
                error!("ModelEngine: Registry lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_registry(&self) -> RwLockWriteGuard<'_, HashMap<String, RegisteredModel>> {
        match self.registry.write() {
            Ok(g) => g,
            Err(poisoned) => {
                error!("ModelEngine: Registry lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn training_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.training_locks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn set_state(&self, name: &str, state: ModelState) {
        if let Some(entry) = self.write_registry().get_mut(name) {
            entry.state = state;
        }
    }

    /// Register an untrained model under `name`, tracked against `symbol`.
    pub fn register_model(
        &self,
        name: &str,
        symbol: &str,
        prototype: Box<dyn BaseLearner>,
    ) -> Result<(), TrainingError> {
        let mut registry = self.write_registry();
        if registry.contains_key(name) {
            return Err(TrainingError::invalid(format!(
                "model '{}' is already registered",
                name
            )));
        }
        registry.insert(
            name.to_string(),
            RegisteredModel {
                symbol: symbol.to_string(),
                prototype: prototype.clone_untrained(),
                trained: None,
                state: ModelState::Untrained,
                data_hash: None,
                last_completed: None,
                trained_at: None,
                validation: None,
            },
        );
        self.metrics.models_registered.set(registry.len() as f64);
        info!(
            "ModelEngine: Registered {} ({}) for {}",
            name,
            prototype.name(),
            symbol
        );
        Ok(())
    }

    /// Register a model rebuilt from persisted metadata. It starts untrained.
    /// Returns `false` when no metadata exists for `name`.
    pub async fn restore_from_metadata(&self, name: &str, symbol: &str) -> anyhow::Result<bool> {
        let Some(metadata) = self.metadata.load(name).await? else {
            return Ok(false);
        };
        let prototype = learner_from_metadata(&metadata, &self.settings.ensemble)?;
        self.register_model(name, symbol, prototype)?;
        info!(
            "ModelEngine: Restored {} from metadata (trained {}), retraining required",
            name, metadata.trained_at
        );
        Ok(true)
    }

    /// Train `name` on `data` now.
    pub async fn train_model(&self, name: &str, data: Dataset) -> Result<TrainingOutcome, TrainingError> {
        self.train_with_reason(name, data, RetrainReason::Manual).await
    }

    async fn train_with_reason(
        &self,
        name: &str,
        data: Dataset,
        reason: RetrainReason,
    ) -> Result<TrainingOutcome, TrainingError> {
        if !self.read_registry().contains_key(name) {
            return Err(TrainingError::UnknownModel {
                name: name.to_string(),
            });
        }

        // At most one training per name; later callers queue here
        let lock = self.training_lock(name);
        let _guard = lock.lock().await;

        let (prototype, previous_state, symbol, last_completed) = {
            let registry = self.read_registry();
            let entry = registry.get(name).ok_or_else(|| TrainingError::UnknownModel {
                name: name.to_string(),
            })?;
            (
                entry.prototype.clone_untrained(),
                entry.state,
                entry.symbol.clone(),
                entry.last_completed,
            )
        };

        if let Some(last) = last_completed {
            let since_last = last.elapsed();
            if since_last < self.settings.retrain_cooldown {
                info!(
                    "ModelEngine: {} finished training {:?} ago, within cooldown, skipping",
                    name, since_last
                );
                self.metrics.inc_training(name, "skipped");
                return Ok(TrainingOutcome::Skipped { since_last });
            }
        }

        self.set_state(name, ModelState::Retraining);
        info!(
            "ModelEngine: Training {} on {} rows ({})",
            name,
            data.len(),
            reason
        );

        let started = Instant::now();
        let data_hash = data.content_hash();
        let feature_names = data.feature_names.clone();
        let budget = self.settings.training_timeout;
        let token = CancellationToken::with_budget(budget);
        let task_token = token.clone();
        let validator = self.validator.clone();

        let task = tokio::task::spawn_blocking(move || -> Result<TrainedModel, TrainingError> {
            let mut model = prototype;
            model.train(&data.features, &data.targets, &task_token)?;
            let report = match validator.validate(model.as_ref(), &data, &task_token) {
                Ok(report) => Some(report),
                Err(e) if e.is_interruption() => return Err(e),
                Err(e) => {
                    warn!("ModelEngine: Cross-validation unavailable: {}", e);
                    None
                }
            };
            Ok((model, report))
        });

        let result = match tokio::time::timeout(budget, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(TrainingError::learner(
                name,
                format!("training task failed: {}", join_error),
            )),
            Err(_) => {
                // Stop the blocking work at its next checkpoint
                token.cancel();
                Err(TrainingError::Timeout {
                    budget_ms: budget.as_millis() as u64,
                })
            }
        };

        let elapsed = started.elapsed();
        self.metrics.observe_training(name, elapsed.as_secs_f64());

        let (model, report) = match result {
            Ok(trained) => trained,
            Err(e) => {
                self.set_state(name, previous_state);
                let outcome = if e.is_interruption() { "timeout" } else { "failed" };
                self.metrics.inc_training(name, outcome);
                warn!("ModelEngine: Training {} failed after {:?}: {}", name, elapsed, e);
                return Err(e);
            }
        };

        let validation = report.as_ref().map(CvReport::summary);
        if let Some(report) = &report {
            self.metrics.set_cv_accuracy(name, report.accuracy);
            if !report.is_acceptable(self.settings.min_cv_accuracy) {
                warn!(
                    "ModelEngine: {} validated below acceptance (accuracy {:.3}, overfitting {}), serving it anyway",
                    name, report.accuracy, report.assessment.severity
                );
            }
        }

        let model: Arc<dyn BaseLearner> = Arc::from(model);
        if let Some(evicted) = self.cache.put(name, model.clone_trained(), &data_hash) {
            debug!("ModelEngine: Cache evicted {} to store {}", evicted, name);
            self.metrics.cache_evictions_total.inc();
        }
        self.metrics.cache_entries.set(self.cache.len() as f64);

        {
            let mut registry = self.write_registry();
            if let Some(entry) = registry.get_mut(name) {
                entry.trained = Some(Arc::clone(&model));
                entry.state = ModelState::Trained;
                entry.data_hash = Some(data_hash.clone());
                entry.last_completed = Some(Instant::now());
                entry.trained_at = Some(Utc::now());
                entry.validation = validation.clone();
            }
        }
        self.scheduler.mark_scheduled(name, reason, Utc::now());
        // Live history judged the previous model
        self.monitor.reset(&symbol, name);
        self.metrics.inc_training(name, "trained");

        let metadata = ModelMetadata::describe(
            name,
            model.as_ref(),
            &feature_names,
            &data_hash,
            validation,
        );
        if let Err(e) = self.metadata.save(&metadata).await {
            warn!("ModelEngine: Failed to persist metadata for {}: {:#}", name, e);
        }

        info!(
            "ModelEngine: Trained {} in {:?}{}",
            name,
            elapsed,
            report
                .as_ref()
                .map(|r| format!(" (cv accuracy {:.3}, {} folds)", r.accuracy, r.folds.len()))
                .unwrap_or_default()
        );
        Ok(TrainingOutcome::Trained { report, elapsed })
    }

    /// Run `f` against the serving model for `name`: the cache first, then
    /// the registry. `None` for unknown or never-trained models.
    fn with_model<T>(&self, name: &str, f: impl FnOnce(&dyn BaseLearner) -> T) -> Option<T> {
        let (data_hash, registered) = {
            let registry = self.read_registry();
            let Some(entry) = registry.get(name) else {
                debug!("ModelEngine: Predict for unknown model {}", name);
                return None;
            };
            (entry.data_hash.clone(), entry.trained.clone())
        };

        let cached = match (&data_hash, self.settings.enforce_data_hash) {
            (Some(hash), true) => self.cache.get_matching(name, hash),
            _ => self.cache.get(name),
        };
        self.metrics.inc_cache_lookup(cached.is_some());
        if let Some(model) = cached {
            return Some(f(model.as_ref()));
        }

        let Some(model) = registered else {
            debug!("ModelEngine: {} has not been trained yet", name);
            return None;
        };
        if let Some(hash) = &data_hash {
            if self.cache.put(name, model.clone_trained(), hash).is_some() {
                self.metrics.cache_evictions_total.inc();
            }
        }
        Some(f(model.as_ref()))
    }

    pub fn predict(&self, name: &str, sample: &[f64]) -> Option<f64> {
        self.with_model(name, |model| model.predict(sample))
    }

    pub fn predict_batch(&self, name: &str, samples: &[Vec<f64>]) -> Option<Vec<f64>> {
        self.with_model(name, |model| model.predict_batch(samples))
    }

    /// Feed one observed live prediction into the monitor.
    pub fn record_prediction(&self, record: ModelPerformanceRecord) {
        let symbol = record.symbol.clone();
        let model = record.model.clone();
        self.monitor.record(record);
        let stats = self.monitor.stats(&symbol, &model);
        self.metrics
            .set_rolling_accuracy(&symbol, &model, stats.accuracy_rate);
    }

    pub fn performance(&self, name: &str) -> Option<PerformanceStats> {
        let symbol = self.read_registry().get(name)?.symbol.clone();
        Some(self.monitor.stats(&symbol, name))
    }

    /// Why `name` should be retrained now, if at all. A trained model that
    /// is due is marked stale.
    pub fn evaluate_retrain(&self, name: &str) -> Option<RetrainReason> {
        let symbol = self.read_registry().get(name)?.symbol.clone();
        let stats = self.monitor.stats(&symbol, name);
        let reason = self.scheduler.due(name, &stats, Utc::now())?;

        let mut registry = self.write_registry();
        if let Some(entry) = registry.get_mut(name) {
            if entry.state == ModelState::Trained {
                entry.state = ModelState::Stale;
                info!("ModelEngine: {} is stale ({})", name, reason);
            }
        }
        Some(reason)
    }

    /// Evaluate every registered model and retrain the ones that are due.
    pub async fn run_retrain_cycle(&self) -> RetrainCycleReport {
        let mut report = RetrainCycleReport::default();
        let names: Vec<(String, String)> = self
            .read_registry()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.symbol.clone()))
            .collect();

        for (name, symbol) in names {
            report.evaluated += 1;
            let Some(reason) = self.evaluate_retrain(&name) else {
                continue;
            };
            self.metrics.inc_retrain_scheduled(&reason.to_string());

            let Some(provider) = &self.data_provider else {
                report.no_data.push(name);
                continue;
            };
            let data = match provider.training_data(&symbol).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    report.no_data.push(name);
                    continue;
                }
                Err(e) => {
                    warn!("ModelEngine: Loading data for {} failed: {:#}", symbol, e);
                    report.failed.push((name, format!("{:#}", e)));
                    continue;
                }
            };

            match self.train_with_reason(&name, data, reason).await {
                Ok(TrainingOutcome::Trained { .. }) => report.retrained.push(name),
                Ok(TrainingOutcome::Skipped { .. }) => report.skipped.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }

        if !report.retrained.is_empty() || !report.failed.is_empty() {
            info!(
                "ModelEngine: Retrain cycle evaluated {} models, retrained {:?}, failed {}",
                report.evaluated,
                report.retrained,
                report.failed.len()
            );
        }
        report
    }

    /// Background loop that runs a retrain cycle every `interval`, starting
    /// immediately. Abort the handle to stop it. Intervals under one
    /// millisecond are raised to one millisecond.
    pub fn spawn_retrain_loop(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = if interval < MIN_RETRAIN_LOOP_INTERVAL {
            warn!(
                "ModelEngine: Retrain loop interval {:?} too short, using {:?}",
                interval, MIN_RETRAIN_LOOP_INTERVAL
            );
            MIN_RETRAIN_LOOP_INTERVAL
        } else {
            interval
        };
        tokio::spawn(async move {
            info!("ModelEngine: Retrain loop started (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = self.run_retrain_cycle().await;
                debug!("ModelEngine: Retrain cycle report: {:?}", report);
            }
        })
    }

    pub fn model_state(&self, name: &str) -> Option<ModelState> {
        self.read_registry().get(name).map(|e| e.state)
    }

    pub fn models(&self) -> Vec<ModelSummary> {
        let registry = self.read_registry();
        let mut models: Vec<ModelSummary> = registry
            .iter()
            .map(|(name, entry)| ModelSummary {
                name: name.clone(),
                symbol: entry.symbol.clone(),
                learner: entry.prototype.name().to_string(),
                state: entry.state,
                trained_at: entry.trained_at,
                data_hash: entry.data_hash.clone(),
                validation: entry.validation.clone(),
            })
            .collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    /// Drop the cached copy of `name` and mark a trained model stale.
    pub fn invalidate(&self, name: &str) -> bool {
        let removed = self.cache.invalidate(name);
        self.metrics.cache_entries.set(self.cache.len() as f64);
        let mut registry = self.write_registry();
        if let Some(entry) = registry.get_mut(name) {
            if entry.state == ModelState::Trained {
                entry.state = ModelState::Stale;
            }
        }
        removed
    }

    /// Unregister `name` and drop everything kept for it: cached copy,
    /// schedule, live history and persisted metadata. Waits for a running
    /// training of `name` to finish first.
    pub async fn remove_model(&self, name: &str) -> anyhow::Result<bool> {
        let lock = self.training_lock(name);
        let _guard = lock.lock().await;

        let removed = {
            let mut registry = self.write_registry();
            let removed = registry.remove(name);
            self.metrics.models_registered.set(registry.len() as f64);
            removed
        };
        let Some(entry) = removed else {
            return Ok(false);
        };

        self.cache.invalidate(name);
        self.metrics.cache_entries.set(self.cache.len() as f64);
        self.scheduler.forget(name);
        self.monitor.reset(&entry.symbol, name);
        self.metadata
            .delete(name)
            .await
            .with_context(|| format!("Failed to delete metadata for {}", name))?;

        info!("ModelEngine: Removed {} ({})", name, entry.symbol);
        Ok(true)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

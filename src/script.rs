//! Seam to the external interpreter: scripts, the catalog that resolves them, and the
//! shared service context handed to every running job.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::JobError;
use crate::site::ExecutionSite;

/// A runnable script definition.
///
/// `run` returns the script's explicit result, or `None` when it set none, in which case
/// the job result falls back to the flattened group results.
#[async_trait]
pub trait Script: Send + Sync {
  /// Content hash of the definition, carried in checkpoints.
  fn code_hash(&self) -> String {
    String::new()
  }

  async fn run(&self, site: ExecutionSite) -> Result<Option<Value>, JobError>;
}

/// Resolves a script reference to its definition.
pub trait ScriptCatalog: Send + Sync {
  fn lookup(&self, script: &str) -> Option<Arc<dyn Script>>;
}

/// Catalog kept in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
  scripts: RwLock<HashMap<String, Arc<dyn Script>>>,
}

impl InMemoryCatalog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&self, script_ref: impl Into<String>, script: impl Script + 'static) {
    self.register_arc(script_ref, Arc::new(script));
  }

  pub fn register_arc(&self, script_ref: impl Into<String>, script: Arc<dyn Script>) {
    self.scripts.write().insert(script_ref.into(), script);
  }

  pub fn with(self, script_ref: impl Into<String>, script: impl Script + 'static) -> Self {
    self.register(script_ref, script);
    self
  }
}

impl ScriptCatalog for InMemoryCatalog {
  fn lookup(&self, script: &str) -> Option<Arc<dyn Script>> {
    self.scripts.read().get(script).cloned()
  }
}

/// Script backed by an async closure.
pub struct ScriptFn<F> {
  f: F,
  code_hash: String,
}

/// Wraps an async closure taking the [ExecutionSite] as a [Script].
pub fn script_fn<F, Fut>(f: F) -> ScriptFn<F>
where
  F: Fn(ExecutionSite) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Option<Value>, JobError>> + Send + 'static,
{
  ScriptFn {
    f,
    code_hash: String::new(),
  }
}

impl<F> ScriptFn<F> {
  pub fn with_code_hash(mut self, code_hash: impl Into<String>) -> Self {
    self.code_hash = code_hash.into();
    self
  }
}

#[async_trait]
impl<F, Fut> Script for ScriptFn<F>
where
  F: Fn(ExecutionSite) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<Option<Value>, JobError>> + Send + 'static,
{
  fn code_hash(&self) -> String {
    self.code_hash.clone()
  }

  async fn run(&self, site: ExecutionSite) -> Result<Option<Value>, JobError> {
    (self.f)(site).await
  }
}

/// Typed map of shared services, cloned cheaply into every site.
#[derive(Clone, Default)]
pub struct ServiceContext {
  services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
    Arc::make_mut(&mut self.services).insert(TypeId::of::<T>(), Arc::new(service));
    self
  }

  pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self
      .services
      .get(&TypeId::of::<T>())
      .cloned()
      .and_then(|s| s.downcast::<T>().ok())
  }
}

impl std::fmt::Debug for ServiceContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServiceContext")
      .field("services", &self.services.len())
      .finish()
  }
}

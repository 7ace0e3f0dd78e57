use super::Compiler;
use super::output::{CompilationFailure, CompilationOutput, CompiledWorkflow};
use crate::ir::LogicalIr;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    /// Monotonic time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 256,
            ttl: Some(Duration::from_secs(300)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry {
    compiled: Arc<CompiledWorkflow>,
    created_at: Duration,
}

#[derive(Default)]
struct CacheState {
    entries: AHashMap<u64, CacheEntry>,
    lru_order: VecDeque<u64>,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn touch(&mut self, key: u64) {
        self.lru_order.retain(|k| *k != key);
        self.lru_order.push_back(key);
    }

    fn remove(&mut self, key: u64) {
        self.entries.remove(&key);
        self.lru_order.retain(|k| *k != key);
    }
}

/// Memoizes successful compilations by IR fingerprint. Failures are never cached.
pub struct CompilationCache<C: Clock = SystemClock> {
    clock: C,
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl CompilationCache<SystemClock> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::default())
    }
}

impl<C: Clock> CompilationCache<C> {
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            clock,
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// A fingerprint of an IR: identical documents hash identically within one
    /// build on one machine. Not suitable as a persisted or shared key.
    pub fn fingerprint(ir: &LogicalIr) -> u64 {
        let hasher = ahash::RandomState::with_seeds(
            0x7069_6c6f_7463_0001,
            0x7069_6c6f_7463_0002,
            0x7069_6c6f_7463_0003,
            0x7069_6c6f_7463_0004,
        );
        match serde_json::to_vec(ir) {
            Ok(bytes) => hasher.hash_one(bytes),
            Err(_) => hasher.hash_one(format!("{:?}", ir)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, ir: &LogicalIr) -> Option<Arc<CompiledWorkflow>> {
        let key = Self::fingerprint(ir);
        let now = self.clock.now();
        let mut state = self.lock();

        let expired = match state.entries.get(&key) {
            Some(entry) => self.is_expired(entry, now),
            None => {
                state.misses += 1;
                return None;
            }
        };
        if expired {
            debug!(fingerprint = key, "cache entry expired");
            state.remove(key);
            state.misses += 1;
            return None;
        }

        state.hits += 1;
        state.touch(key);
        state.entries.get(&key).map(|e| Arc::clone(&e.compiled))
    }

    pub fn insert(&self, ir: &LogicalIr, compiled: Arc<CompiledWorkflow>) {
        let key = Self::fingerprint(ir);
        let created_at = self.clock.now();
        let mut state = self.lock();
        state.entries.insert(key, CacheEntry { compiled, created_at });
        state.touch(key);

        while state.entries.len() > self.config.max_entries {
            let Some(oldest) = state.lru_order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            debug!(fingerprint = oldest, "evicted least recently used entry");
        }
    }

    /// Returns the cached workflow for `ir`, compiling and caching it on a miss.
    pub fn get_or_compile(
        &self,
        compiler: &Compiler,
        ir: &LogicalIr,
    ) -> Result<Arc<CompiledWorkflow>, CompilationFailure> {
        if let Some(compiled) = self.get(ir) {
            return Ok(compiled);
        }
        match compiler.compile(ir) {
            CompilationOutput::Success(workflow) => {
                let compiled: Arc<CompiledWorkflow> = Arc::new(*workflow);
                self.insert(ir, Arc::clone(&compiled));
                Ok(compiled)
            }
            CompilationOutput::Failure(failure) => Err(failure),
        }
    }

    pub fn invalidate(&self, ir: &LogicalIr) {
        self.lock().remove(Self::fingerprint(ir));
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_order.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: Duration) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| now.saturating_sub(entry.created_at) >= ttl)
    }
}

//! The engine: session registry, master-call store and shared worker pool.
//!
//! All operations are safe to call concurrently. Each session is guarded
//! by its own writer mutex (chunks for one session must be serialized by
//! the caller; different sessions proceed independently on the shared
//! rayon pool). Realtime similarity reads bypass the session lock through
//! the versioned snapshot.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, info};
use serde::Serialize;

use crate::bundle;
use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};
use crate::master::{MasterCallTemplate, MasterStore};
use crate::realtime::{RealtimeShared, RealtimeSnapshot};
use crate::session::{Session, SessionState};
use crate::summary::EnhancedSummary;

/// Opaque session identifier handed out by [`Engine::create_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemMetrics {
    pub active_sessions: usize,
    pub loaded_masters: usize,
    pub chunks_processed: u64,
    pub frames_processed: u64,
    pub dropped_samples: u64,
    pub pool_threads: usize,
}

/// Snapshot of one session's identity, state and timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub sample_rate: u32,
    #[serde(skip)]
    pub created_at: std::time::SystemTime,
    #[serde(skip)]
    pub first_audio_at: Option<std::time::SystemTime>,
    #[serde(skip)]
    pub finalized_at: Option<std::time::SystemTime>,
    pub frames_processed: u64,
}

struct SessionHandle {
    inner: Mutex<Session>,
    stop: AtomicBool,
    shared: Arc<RealtimeShared>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Engine {
    sessions: RwLock<HashMap<u64, Arc<SessionHandle>>>,
    masters: MasterStore,
    pool: rayon::ThreadPool,
    next_id: AtomicU64,
    chunks_processed: AtomicU64,
}

impl Engine {
    /// Engine with one worker per available core.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker pool cannot be built.
    pub fn new() -> EngineResult<Self> {
        let threads = std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
        Self::with_threads(threads)
    }

    /// Engine with an explicit worker-pool size.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker pool cannot be built.
    pub fn with_threads(threads: usize) -> EngineResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|index| format!("huntmaster-worker-{index}"))
            .build()
            .map_err(|error| EngineError::Internal(format!("worker pool: {error}")))?;
        info!("engine started with {} worker threads", pool.current_num_threads());
        Ok(Self {
            sessions: RwLock::new(HashMap::new()),
            masters: MasterStore::new(),
            pool,
            next_id: AtomicU64::new(1),
            chunks_processed: AtomicU64::new(0),
        })
    }

    fn handle(&self, id: SessionId) -> EngineResult<Arc<SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id.raw())
            .cloned()
            .ok_or(EngineError::SessionNotFound(id))
    }

    /// Create a session from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` when validation fails.
    pub fn create_session(&self, config: SessionConfig) -> EngineResult<SessionId> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(RealtimeShared::new());
        let session = Session::new(id, config, Arc::clone(&shared))?;
        let handle = Arc::new(SessionHandle {
            inner: Mutex::new(session),
            stop: AtomicBool::new(false),
            shared,
        });
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.raw(), handle);
        debug!("created session {id}");
        Ok(id)
    }

    /// Destroy a session. An in-flight chunk for this session completes
    /// first; operations arriving afterwards see `SessionNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub fn destroy_session(&self, id: SessionId) -> EngineResult<()> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id.raw());
        match removed {
            Some(handle) => {
                handle.stop.store(true, Ordering::Release);
                debug!("destroyed session {id}");
                Ok(())
            }
            None => Err(EngineError::SessionNotFound(id)),
        }
    }

    /// Register a prebuilt template under its own id.
    pub fn load_master_call(&self, template: MasterCallTemplate) {
        info!("loaded master call '{}'", template.id);
        self.masters.load(template);
    }

    /// Parse and register a persisted feature bundle.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBundle` when the blob fails validation.
    pub fn load_master_bundle(&self, id: &str, bytes: &[u8]) -> EngineResult<()> {
        let template = bundle::read(bytes, id)?;
        self.load_master_call(template);
        Ok(())
    }

    /// Drop the store's reference to a template. Sessions already bound
    /// to it keep their copy alive.
    ///
    /// # Errors
    ///
    /// Returns `MasterNotFound` for an unknown id.
    pub fn unload_master_call(&self, id: &str) -> EngineResult<()> {
        self.masters.unload(id)
    }

    /// Bind a registered master to a session (session must be `Created`).
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `MasterNotFound` or `WrongState`.
    pub fn set_master_call(&self, session: SessionId, master_id: &str) -> EngineResult<()> {
        let template = self.masters.get(master_id)?;
        let handle = self.handle(session)?;
        handle.lock().set_master(&template)
    }

    /// Feed one chunk of mono PCM. Chunks for a single session must be
    /// submitted in order by a single caller; this method blocks on the
    /// session's writer lock and on a worker-pool slot.
    ///
    /// # Errors
    ///
    /// `InvalidAudioData`, `Backpressure`, `WrongState` or
    /// `SessionNotFound`.
    pub fn process_audio_chunk(&self, session: SessionId, samples: &[f32]) -> EngineResult<()> {
        let handle = self.handle(session)?;
        if handle.stop.load(Ordering::Acquire) {
            return Err(EngineError::SessionNotFound(session));
        }
        let result = self.pool.install(|| handle.lock().process_chunk(samples));
        if result.is_ok() {
            self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Latest realtime similarity snapshot, read without the session
    /// lock.
    ///
    /// # Errors
    ///
    /// `InsufficientData` until the scorer has published at least once.
    pub fn get_realtime_similarity(&self, session: SessionId) -> EngineResult<RealtimeSnapshot> {
        let handle = self.handle(session)?;
        let snapshot = handle.shared.read();
        if snapshot.version == 0 || snapshot.frames_observed == 0 {
            return Err(EngineError::InsufficientData);
        }
        Ok(snapshot)
    }

    /// Run the finalize stage and return the summary. Idempotent.
    ///
    /// # Errors
    ///
    /// `NoMasterCall`, `WrongState` or `SessionNotFound`.
    pub fn finalize_session_analysis(&self, session: SessionId) -> EngineResult<EnhancedSummary> {
        let handle = self.handle(session)?;
        self.pool.install(|| handle.lock().finalize())
    }

    /// The stored summary of a finalized session.
    ///
    /// # Errors
    ///
    /// `WrongState` unless the session is `Finalized`.
    pub fn get_enhanced_summary(&self, session: SessionId) -> EngineResult<EnhancedSummary> {
        let handle = self.handle(session)?;
        let guard = handle.lock();
        guard.summary()
    }

    /// Return a session to `Created`, keeping config and master binding.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub fn reset_session(&self, session: SessionId) -> EngineResult<()> {
        let handle = self.handle(session)?;
        handle.lock().reset();
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub fn session_state(&self, session: SessionId) -> EngineResult<SessionState> {
        let handle = self.handle(session)?;
        let state = handle.lock().state();
        Ok(state)
    }

    /// # Errors
    ///
    /// Returns `SessionNotFound` for an unknown id.
    pub fn session_info(&self, session: SessionId) -> EngineResult<SessionInfo> {
        let handle = self.handle(session)?;
        let guard = handle.lock();
        Ok(SessionInfo {
            id: guard.id(),
            state: guard.state(),
            sample_rate: guard.sample_rate(),
            created_at: guard.created_at(),
            first_audio_at: guard.first_audio_at(),
            finalized_at: guard.finalized_at(),
            frames_processed: guard.frames_processed(),
        })
    }

    #[must_use]
    pub fn list_active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .map(|&raw| SessionId::new(raw))
            .collect();
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn system_metrics(&self) -> SystemMetrics {
        let handles: Vec<Arc<SessionHandle>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut frames_processed = 0;
        let mut dropped_samples = 0;
        for handle in &handles {
            let guard = handle.lock();
            frames_processed += guard.frames_processed();
            dropped_samples += guard.dropped_samples();
        }
        SystemMetrics {
            active_sessions: handles.len(),
            loaded_masters: self.masters.len(),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            frames_processed,
            dropped_samples,
            pool_threads: self.pool.current_num_threads(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huntmaster_analysis::utils::sine_wave;

    fn test_config() -> SessionConfig {
        SessionConfig {
            chunk_budget_ms: 10_000.,
            finalize_budget_ms: 10_000.,
            ..SessionConfig::default()
        }
    }

    fn engine_with_master() -> Engine {
        let engine = Engine::with_threads(2).unwrap();
        let template = MasterCallTemplate::from_samples(
            "buck-grunt",
            &sine_wave(440., 1.0, 44_100, 0.5),
            44_100,
            &test_config(),
        )
        .unwrap();
        engine.load_master_call(template);
        engine
    }

    #[test]
    fn test_session_lifecycle_through_engine() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        engine.set_master_call(session, "buck-grunt").unwrap();
        assert_eq!(engine.list_active_sessions(), vec![session]);

        for chunk in sine_wave(440., 1.0, 44_100, 0.5).chunks(4096) {
            engine.process_audio_chunk(session, chunk).unwrap();
        }
        let summary = engine.finalize_session_analysis(session).unwrap();
        assert!(summary.overall > 0.9, "overall {}", summary.overall);
        assert_eq!(engine.get_enhanced_summary(session).unwrap(), summary);

        engine.destroy_session(session).unwrap();
        assert!(engine.list_active_sessions().is_empty());
        assert!(matches!(
            engine.process_audio_chunk(session, &[0.1]),
            Err(EngineError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_master_registry_errors() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        assert!(matches!(
            engine.set_master_call(session, "missing"),
            Err(EngineError::MasterNotFound(_))
        ));
        assert!(matches!(
            engine.unload_master_call("missing"),
            Err(EngineError::MasterNotFound(_))
        ));
        engine.unload_master_call("buck-grunt").unwrap();
        assert_eq!(engine.system_metrics().loaded_masters, 0);
    }

    #[test]
    fn test_finalize_without_master_errors() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        assert_eq!(
            engine.finalize_session_analysis(session).unwrap_err(),
            EngineError::NoMasterCall
        );
    }

    #[test]
    fn test_realtime_before_any_audio() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        engine.set_master_call(session, "buck-grunt").unwrap();
        assert_eq!(
            engine.get_realtime_similarity(session).unwrap_err(),
            EngineError::InsufficientData
        );

        for chunk in sine_wave(440., 0.5, 44_100, 0.5).chunks(4096) {
            engine.process_audio_chunk(session, chunk).unwrap();
        }
        let snapshot = engine.get_realtime_similarity(session).unwrap();
        assert!(snapshot.ready);
        assert!(snapshot.score > 0.5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let engine = Engine::with_threads(1).unwrap();
        let config = SessionConfig {
            sample_rate: 100,
            ..SessionConfig::default()
        };
        assert!(matches!(
            engine.create_session(config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_metrics_accumulate() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        engine.set_master_call(session, "buck-grunt").unwrap();
        engine
            .process_audio_chunk(session, &sine_wave(440., 0.2, 44_100, 0.5)[..8192])
            .unwrap();
        let metrics = engine.system_metrics();
        assert_eq!(metrics.active_sessions, 1);
        assert_eq!(metrics.loaded_masters, 1);
        assert_eq!(metrics.chunks_processed, 1);
        assert!(metrics.frames_processed > 10);
        assert_eq!(metrics.pool_threads, 2);
    }

    #[test]
    fn test_session_info_timeline() {
        let engine = engine_with_master();
        let session = engine.create_session(test_config()).unwrap();
        engine.set_master_call(session, "buck-grunt").unwrap();

        let info = engine.session_info(session).unwrap();
        assert_eq!(info.id, session);
        assert_eq!(info.state, SessionState::Created);
        assert_eq!(info.sample_rate, 44_100);
        assert!(info.first_audio_at.is_none());

        engine
            .process_audio_chunk(session, &sine_wave(440., 0.1, 44_100, 0.5))
            .unwrap();
        let info = engine.session_info(session).unwrap();
        assert_eq!(info.state, SessionState::Recording);
        assert!(info.first_audio_at.is_some());
        assert!(info.finalized_at.is_none());

        engine.finalize_session_analysis(session).unwrap();
        let info = engine.session_info(session).unwrap();
        assert_eq!(info.state, SessionState::Finalized);
        assert!(info.finalized_at.is_some());
        assert!(info.created_at <= info.finalized_at.unwrap());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let engine = engine_with_master();
        let a = engine.create_session(test_config()).unwrap();
        let b = engine.create_session(test_config()).unwrap();
        assert_ne!(a, b);
        assert_eq!(format!("{a}"), format!("s{}", a.raw()));
    }
}

//! A fixed set of inference sessions shared by the frame workers.
//!
//! `Session::run` needs exclusive access, so each session sits behind its own
//! mutex. A caller takes the first idle session, starting from a rotating
//! cursor, and only blocks when every session is busy.

use crate::backend::ExecutionBackend;
use ort::session::Session;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, TryLockError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionPoolError {
    #[error("session pool holds no sessions")]
    Empty,
    #[error("inference session poisoned by a panicked worker")]
    Poisoned,
}

pub struct SessionPool<S = Session> {
    sessions: Vec<Mutex<S>>,
    cursor: AtomicUsize,
}

impl SessionPool<Session> {
    /// Open `size` sessions of `model_path` (at least one).
    pub fn load(model_path: &str, backend: ExecutionBackend, size: usize) -> Result<Self, ort::Error> {
        let sessions = (0..size.max(1))
            .map(|_| backend.session(model_path))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(path = model_path, sessions = sessions.len(), "opened session pool");
        Ok(Self::new(sessions))
    }
}

impl<S> SessionPool<S> {
    pub fn new(sessions: Vec<S>) -> Self {
        Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Any session, for read-only metadata such as output names.
    pub fn first(&self) -> Result<MutexGuard<'_, S>, SessionPoolError> {
        self.sessions
            .first()
            .ok_or(SessionPoolError::Empty)?
            .lock()
            .map_err(|_| SessionPoolError::Poisoned)
    }

    /// Run `f` on an idle session, waiting for one if all are busy.
    pub fn with<T>(&self, f: impl FnOnce(&mut S) -> T) -> Result<T, SessionPoolError> {
        let mut guard = self.acquire()?;
        Ok(f(&mut guard))
    }

    fn acquire(&self) -> Result<MutexGuard<'_, S>, SessionPoolError> {
        let len = self.sessions.len();
        if len == 0 {
            return Err(SessionPoolError::Empty);
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            match self.sessions[(start + offset) % len].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(SessionPoolError::Poisoned),
            }
        }

        self.sessions[start].lock().map_err(|_| SessionPoolError::Poisoned)
    }
}

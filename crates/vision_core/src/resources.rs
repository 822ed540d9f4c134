use ndarray::{Array4, ArrayD};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------
// LEDGER — buffers vivos de todo el pipeline
// ---------------------------------------------------------

#[derive(Default)]
struct LedgerCounters {
    live: AtomicUsize,
    allocated: AtomicU64,
}

/// Process-level count of numeric buffers that are currently leased.
///
/// Every [`ResourcePool`] reports into one ledger, so a test harness can
/// compare `live()` before and after an analysis call.
#[derive(Clone, Default)]
pub struct BufferLedger {
    inner: Arc<LedgerCounters>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn allocated(&self) -> u64 {
        self.inner.allocated.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for BufferLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferLedger")
            .field("live", &self.live())
            .field("allocated", &self.allocated())
            .finish()
    }
}

// ---------------------------------------------------------
// POOL — un pool por llamada de analisis
// ---------------------------------------------------------

struct PoolShared {
    label: String,
    live: AtomicUsize,
    allocated: AtomicUsize,
    ledger: BufferLedger,
}

/// Scope that leases numeric buffers for one unit of work.
///
/// Buffers come back as [`Pooled`] guards; dropping the guard is the release
/// step, so early returns, `?` propagation and abandoned tasks all release
/// through the same path. The pool is cheap to clone and is shared by the
/// concurrent branches of one frame.
#[derive(Clone)]
pub struct ResourcePool {
    shared: Arc<PoolShared>,
}

impl ResourcePool {
    pub fn new(ledger: &BufferLedger, label: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                label: label.into(),
                live: AtomicUsize::new(0),
                allocated: AtomicUsize::new(0),
                ledger: ledger.clone(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Buffers leased from this pool that are still alive.
    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Buffers leased from this pool since it was created.
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::SeqCst)
    }

    /// Takes ownership of an already-built buffer (e.g. a model output).
    pub fn adopt<T>(&self, value: T) -> Pooled<T> {
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        self.shared.allocated.fetch_add(1, Ordering::SeqCst);
        self.shared.ledger.inner.live.fetch_add(1, Ordering::SeqCst);
        self.shared.ledger.inner.allocated.fetch_add(1, Ordering::SeqCst);
        Pooled {
            value,
            lease: Lease {
                shared: Arc::clone(&self.shared),
            },
        }
    }

    pub fn bytes(&self, len: usize) -> Pooled<Vec<u8>> {
        self.adopt(vec![0u8; len])
    }

    pub fn zeros4(&self, shape: (usize, usize, usize, usize)) -> Pooled<Array4<f32>> {
        self.adopt(Array4::<f32>::zeros(shape))
    }

    pub fn zeros_dyn(&self, shape: &[usize]) -> Pooled<ArrayD<f32>> {
        self.adopt(ArrayD::<f32>::zeros(shape))
    }
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("label", &self.shared.label)
            .field("live", &self.live())
            .field("allocated", &self.allocated())
            .finish()
    }
}

struct Lease {
    shared: Arc<PoolShared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        self.shared.ledger.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A buffer leased from a [`ResourcePool`]; released when dropped.
pub struct Pooled<T> {
    value: T,
    lease: Lease,
}

impl<T> Pooled<T> {
    pub fn pool_label(&self) -> &str {
        &self.lease.shared.label
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("pool", &self.lease.shared.label)
            .field("value", &self.value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leases_are_released_on_drop() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "frame-0");
        {
            let a = pool.zeros4((1, 3, 4, 4));
            let _b = pool.bytes(16);
            assert_eq!(a.shape(), &[1, 3, 4, 4]);
            assert_eq!(pool.live(), 2);
            assert_eq!(ledger.live(), 2);
        }
        assert_eq!(pool.live(), 0);
        assert_eq!(ledger.live(), 0);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(ledger.allocated(), 2);
    }

    #[test]
    fn early_return_paths_release() {
        fn fails(pool: &ResourcePool) -> anyhow::Result<()> {
            let _tensor = pool.zeros_dyn(&[1, 6]);
            anyhow::bail!("boom")
        }
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "frame-1");
        assert!(fails(&pool).is_err());
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn leases_outlive_their_pool_handle() {
        let ledger = BufferLedger::new();
        let kept = {
            let pool = ResourcePool::new(&ledger, "feedback");
            pool.bytes(4)
        };
        assert_eq!(ledger.live(), 1);
        assert_eq!(kept.pool_label(), "feedback");
        drop(kept);
        assert_eq!(ledger.live(), 0);
    }
}

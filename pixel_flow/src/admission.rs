use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::{InvariantViolation, Result};
use crate::Seq;

/// Ticket for one admitted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub seq: Seq,
}

/// Proof that every stage finished with one image. Consumed by [`AdmissionController::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct CompletionToken {
    seq: Seq,
}

impl CompletionToken {
    pub(crate) fn new(seq: Seq) -> Self {
        Self { seq }
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }
}

/// Bounds how many images are inside the pipeline at once.
#[derive(Debug)]
pub struct AdmissionController {
    limit: usize,
    slots: Semaphore,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    next_seq: AtomicU64,
}

impl AdmissionController {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "AdmissionController limit must be positive");
        Self {
            limit,
            slots: Semaphore::new(limit),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Waits for a free slot, then admits the next image.
    pub async fn admit(&self) -> Admission {
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            // the semaphore is never closed
            Err(_) => unreachable!("admission slots closed"),
        }
        self.take_slot()
    }

    /// Admits the next image only if a slot is free right now.
    pub fn try_admit(&self) -> Option<Admission> {
        let permit = self.slots.try_acquire().ok()?;
        permit.forget();
        Some(self.take_slot())
    }

    /// Frees the slot held by the token's image.
    pub fn release(&self, token: CompletionToken) -> Result<()> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| InvariantViolation::ReleaseWithoutAdmission { seq: token.seq })?;
        self.slots.add_permits(1);
        trace!(seq = token.seq, in_flight = self.in_flight(), "slot released");
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest in-flight count seen so far.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn take_slot(&self) -> Admission {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert!(now <= self.limit);
        self.peak.fetch_max(now, Ordering::SeqCst);

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        trace!(seq, in_flight = now, "image admitted");
        Admission { seq }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio::time::timeout;

    use super::*;
    use crate::error::Error;

    #[test]
    #[should_panic(expected = "AdmissionController limit must be positive")]
    fn new_rejects_zero_limit() {
        AdmissionController::new(0);
    }

    #[test]
    fn try_admit_stops_at_limit() -> anyhow::Result<()> {
        let controller = AdmissionController::new(2);

        let first = controller.try_admit().unwrap();
        let second = controller.try_admit().unwrap();
        assert_eq!((first.seq, second.seq), (0, 1));
        assert!(controller.try_admit().is_none());
        assert_eq!(controller.in_flight(), 2);

        controller.release(CompletionToken::new(first.seq))?;
        assert_eq!(controller.in_flight(), 1);
        assert_eq!(controller.try_admit().unwrap().seq, 2);

        Ok(())
    }

    #[test]
    fn release_without_admission_is_rejected() {
        let controller = AdmissionController::new(1);
        let result = controller.release(CompletionToken::new(9));
        assert!(matches!(
            result,
            Err(Error::Invariant(InvariantViolation::ReleaseWithoutAdmission { seq: 9 }))
        ));
        // a bogus release must not create capacity
        assert!(controller.try_admit().is_some());
        assert!(controller.try_admit().is_none());
    }

    #[test]
    fn random_interleavings_never_exceed_limit() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let limit = rng.random_range(1..=6);
            let controller = AdmissionController::new(limit);
            let mut held: Vec<Admission> = Vec::new();

            for _ in 0..100 {
                if rng.random_bool(0.55) {
                    match controller.try_admit() {
                        Some(admission) => held.push(admission),
                        None => assert_eq!(held.len(), limit),
                    }
                } else if !held.is_empty() {
                    let admission = held.swap_remove(rng.random_range(0..held.len()));
                    controller.release(CompletionToken::new(admission.seq))?;
                }

                assert!(controller.in_flight() <= limit);
                assert_eq!(controller.in_flight(), held.len());
            }

            assert!(controller.peak() <= limit);
        }

        Ok(())
    }

    #[tokio::test]
    async fn admit_waits_for_release() -> anyhow::Result<()> {
        let controller = Arc::new(AdmissionController::new(1));
        let first = controller.admit().await;

        let waiter = tokio::spawn({
            let controller = controller.clone();
            async move { controller.admit().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "second admission should block");

        controller.release(CompletionToken::new(first.seq))?;
        let second = timeout(Duration::from_millis(500), waiter).await??;
        assert_eq!(second.seq, 1);
        assert_eq!(controller.in_flight(), 1);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admissions_respect_limit() -> anyhow::Result<()> {
        let limit = 3;
        let controller = Arc::new(AdmissionController::new(limit));
        let mut tasks = tokio::task::JoinSet::new();

        for i in 0..32u64 {
            let controller = controller.clone();
            tasks.spawn(async move {
                let admission = controller.admit().await;
                assert!(controller.in_flight() <= limit);
                tokio::time::sleep(Duration::from_millis(i % 4)).await;
                controller.release(CompletionToken::new(admission.seq))
            });
        }

        while let Some(result) = tasks.join_next().await {
            result??;
        }

        assert_eq!(controller.in_flight(), 0);
        assert!(controller.peak() <= limit);

        Ok(())
    }
}

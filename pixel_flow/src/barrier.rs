use hashbrown::HashMap;

use crate::error::InvariantViolation;
use crate::Seq;

/// Rendezvous of `N` ports keyed by sequence number.
///
/// Values for different sequences may arrive in any order; a set is released
/// as soon as every port has delivered for that sequence.
#[derive(Debug)]
pub struct Join<T, const N: usize> {
    name: &'static str,
    pending: HashMap<Seq, [Option<T>; N]>,
}

impl<T, const N: usize> Join<T, N> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: HashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of sequences still waiting on at least one port.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Records `value` on `port`; returns the full set once the last port arrives.
    pub fn offer(
        &mut self,
        seq: Seq,
        port: usize,
        value: T,
    ) -> Result<Option<[T; N]>, InvariantViolation> {
        if port >= N {
            return Err(InvariantViolation::UnknownPort {
                barrier: self.name,
                port,
            });
        }

        let slots = self
            .pending
            .entry(seq)
            .or_insert_with(|| std::array::from_fn(|_| None));
        if slots[port].is_some() {
            return Err(InvariantViolation::DuplicateArrival {
                barrier: self.name,
                seq,
                port,
            });
        }
        slots[port] = Some(value);

        if slots.iter().any(Option::is_none) {
            return Ok(None);
        }

        let complete = self
            .pending
            .remove(&seq)
            .map(|slots| slots.into_iter().flatten().collect::<Vec<T>>())
            .and_then(|values| <[T; N]>::try_from(values).ok());
        match complete {
            Some(values) => Ok(Some(values)),
            None => Err(InvariantViolation::IncompleteJoin {
                barrier: self.name,
                seq,
            }),
        }
    }

    /// Fails if any sequence never completed.
    pub fn finish(self) -> Result<(), InvariantViolation> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut seqs: Vec<Seq> = self.pending.into_keys().collect();
        seqs.sort_unstable();
        Err(InvariantViolation::Unjoined {
            barrier: self.name,
            seqs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_when_all_ports_arrive() {
        let mut join: Join<&str, 3> = Join::new("test");

        assert_eq!(join.offer(0, 2, "c").unwrap(), None);
        assert_eq!(join.offer(0, 0, "a").unwrap(), None);
        assert_eq!(join.pending(), 1);
        assert_eq!(join.offer(0, 1, "b").unwrap(), Some(["a", "b", "c"]));
        assert_eq!(join.pending(), 0);
        join.finish().unwrap();
    }

    #[test]
    fn released_set_is_complete_and_no_longer_pending() {
        let mut join: Join<String, 2> = Join::new("test");

        for seq in 0..4 {
            assert_eq!(join.offer(seq, 1, format!("b{seq}")).unwrap(), None);
        }
        for seq in (0..4).rev() {
            let released = join.offer(seq, 0, format!("a{seq}")).unwrap();
            assert_eq!(released, Some([format!("a{seq}"), format!("b{seq}")]));
            assert_eq!(join.pending(), seq as usize);
        }
        join.finish().unwrap();
    }

    #[test]
    fn pairs_by_sequence_not_arrival_order() {
        let mut join: Join<u32, 2> = Join::new("test");

        assert_eq!(join.offer(1, 0, 10).unwrap(), None);
        assert_eq!(join.offer(0, 0, 0).unwrap(), None);
        assert_eq!(join.offer(0, 1, 1).unwrap(), Some([0, 1]));
        assert_eq!(join.offer(1, 1, 11).unwrap(), Some([10, 11]));
    }

    #[test]
    fn duplicate_arrival_is_a_violation() {
        let mut join: Join<u32, 2> = Join::new("stage2");
        join.offer(4, 1, 0).unwrap();

        assert_eq!(
            join.offer(4, 1, 0),
            Err(InvariantViolation::DuplicateArrival {
                barrier: "stage2",
                seq: 4,
                port: 1,
            })
        );
    }

    #[test]
    fn unknown_port_is_a_violation() {
        let mut join: Join<u32, 2> = Join::new("stage2");
        assert!(matches!(
            join.offer(0, 2, 0),
            Err(InvariantViolation::UnknownPort { port: 2, .. })
        ));
    }

    #[test]
    fn finish_reports_unjoined_sequences() {
        let mut join: Join<u32, 2> = Join::new("stage1");
        join.offer(7, 0, 0).unwrap();
        join.offer(3, 1, 0).unwrap();

        assert_eq!(
            join.finish(),
            Err(InvariantViolation::Unjoined {
                barrier: "stage1",
                seqs: vec![3, 7],
            })
        );
    }
}

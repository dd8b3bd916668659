//! Many-to-one gather of surface samples and one-to-many broadcast of the result.
//!
//! Gather protocol, per worker rank in increasing order:
//!
//! ```text
//!   worker r ── SampleCount(n) ──▶ coordinator
//!   worker r ── Samples(batch) ──▶ coordinator   (batch.len() must equal n)
//! ```
//!
//! The coordinator folds its own samples first, then rank 1, 2, ... by
//! indexed write, so on an overlap the higher rank's value is kept.

use log::{debug, warn};
use ndarray::Array1;

use crate::comm::{Communicator, Message, Rank, COORDINATOR};
use crate::config::CollisionPolicy;
use crate::error::{ConfigurationError, CouplingError, CouplingResult, ProtocolError};
use crate::pixel::{PixelGrid, PixelIndex};
use crate::sampler::SampleBatch;
use crate::stepper::{GlobalGridState, ResultField};

pub struct DistributedAggregator<'a, C: Communicator + ?Sized> {
    comm:      &'a C,
    grid:      &'a PixelGrid,
    precision: f64,
    policy:    CollisionPolicy,
}

impl<'a, C: Communicator + ?Sized> DistributedAggregator<'a, C> {
    pub fn new(comm: &'a C, grid: &'a PixelGrid, precision: f64, policy: CollisionPolicy) -> Self {
        Self { comm, grid, precision, policy }
    }

    /// Collective: returns the assembled state on the coordinator, `None` elsewhere.
    pub fn gather(&self, local: SampleBatch) -> CouplingResult<Option<GlobalGridState>> {
        if !self.comm.is_coordinator() {
            self.comm.send(COORDINATOR, Message::SampleCount(local.len()))?;
            self.comm.send(COORDINATOR, Message::Samples(local))?;
            return Ok(None);
        }

        let mut fold = SurfaceFold::new(self.grid.cell_count(), self.precision, self.policy);
        fold.absorb(COORDINATOR, &local)?;

        for rank in 1..self.comm.size() {
            let announced = match self.comm.receive(rank)? {
                Message::SampleCount(n) => n,
                other => return Err(unexpected(rank, "sample count", &other)),
            };
            let batch = match self.comm.receive(rank)? {
                Message::Samples(b) => b,
                other => return Err(unexpected(rank, "samples", &other)),
            };
            if !batch.is_consistent() || batch.pixels.len() != announced {
                return Err(ProtocolError::SizeMismatch {
                    source_rank: rank,
                    announced,
                    received: batch.pixels.len(),
                }
                .into());
            }
            debug!("rank {rank}: {announced} samples");
            fold.absorb(rank, &batch)?;
        }

        Ok(Some(fold.finish(self.grid)?))
    }

    /// Collective: the coordinator passes `Some(result)`, every rank gets it back.
    pub fn broadcast(&self, result: Option<&ResultField>) -> CouplingResult<ResultField> {
        let payload = result.map(|r| Message::Field(r.to_vec()));
        let values = match self.comm.broadcast(COORDINATOR, payload)? {
            Message::Field(v) => v,
            other => return Err(unexpected(COORDINATOR, "result field", &other)),
        };
        let expected = self.grid.cell_count();
        if values.len() != expected {
            return Err(ProtocolError::FieldLength {
                rank: self.comm.rank(),
                expected,
                found: values.len(),
            }
            .into());
        }
        Ok(ResultField::from(values))
    }
}

fn unexpected(source_rank: Rank, expected: &'static str, found: &Message) -> CouplingError {
    ProtocolError::UnexpectedMessage { source_rank, expected, found: found.kind() }.into()
}

/// Coordinator-side accumulation of one gather.
struct SurfaceFold {
    elevation:  Vec<f64>,
    velocity:   Vec<f64>,
    writer:     Vec<Option<Rank>>,
    collisions: usize,
    precision:  f64,
    policy:     CollisionPolicy,
}

impl SurfaceFold {
    fn new(cells: usize, precision: f64, policy: CollisionPolicy) -> Self {
        Self {
            elevation: vec![0.0; cells],
            velocity: vec![0.0; cells],
            writer: vec![None; cells],
            collisions: 0,
            precision,
            policy,
        }
    }

    fn absorb(&mut self, rank: Rank, batch: &SampleBatch) -> Result<(), ProtocolError> {
        let cells = self.writer.len();
        for s in batch.iter() {
            let p = s.pixel;
            if p >= cells {
                return Err(ProtocolError::PixelOutOfRange { source_rank: rank, pixel: p, cell_count: cells });
            }
            if let Some(first) = self.writer[p] {
                let differs = (self.elevation[p] - s.elevation_offset).abs() > self.precision
                    || (self.velocity[p] - s.normal_velocity).abs() > self.precision;
                if first != rank && differs {
                    if self.policy == CollisionPolicy::Reject {
                        return Err(ProtocolError::OverlappingContribution { pixel: p, first, second: rank });
                    }
                    self.collisions += 1;
                }
            }
            self.elevation[p] = s.elevation_offset;
            self.velocity[p] = s.normal_velocity;
            self.writer[p] = Some(rank);
        }
        Ok(())
    }

    fn finish(mut self, grid: &PixelGrid) -> Result<GlobalGridState, ConfigurationError> {
        let mut filled: Vec<bool> = self.writer.iter().map(Option::is_some).collect();
        let sampled = filled.iter().filter(|&&f| f).count();
        if sampled == 0 {
            return Err(ConfigurationError::NoSurfaceSamples);
        }
        if self.collisions > 0 {
            warn!(
                "{} pixel(s) sampled differently by more than one rank; kept the highest rank's value",
                self.collisions
            );
        }

        let gaps = fill_gaps(grid, &mut self.elevation, &mut self.velocity, &mut filled);
        debug!("gathered {sampled} of {} cells, {gaps} filled from neighbours", filled.len());

        Ok(GlobalGridState::new(Array1::from(self.elevation), Array1::from(self.velocity)))
    }
}

/// Give every unfilled cell the mean of its filled neighbours, one breadth-first
/// layer at a time. Returns the number of cells filled.
fn fill_gaps(grid: &PixelGrid, elevation: &mut [f64], velocity: &mut [f64], filled: &mut [bool]) -> usize {
    let n = filled.len();
    let mut queued = vec![false; n];
    let mut layer: Vec<PixelIndex> = (0..n)
        .filter(|&c| !filled[c] && grid.neighbors(c).iter().any(|&j| filled[j]))
        .collect();
    for &c in &layer {
        queued[c] = true;
    }

    let mut count = 0;
    while !layer.is_empty() {
        let updates: Vec<(PixelIndex, f64, f64)> = layer
            .iter()
            .map(|&c| {
                let (mut e, mut v, mut k) = (0.0, 0.0, 0usize);
                for j in grid.neighbors(c) {
                    if filled[j] {
                        e += elevation[j];
                        v += velocity[j];
                        k += 1;
                    }
                }
                let k = k.max(1) as f64;
                (c, e / k, v / k)
            })
            .collect();

        let mut next = Vec::new();
        for (c, e, v) in updates {
            elevation[c] = e;
            velocity[c] = v;
            filled[c] = true;
            count += 1;
        }
        for &c in &layer {
            for j in grid.neighbors(c) {
                if !filled[j] && !queued[j] {
                    queued[j] = true;
                    next.push(j);
                }
            }
        }
        layer = next;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, ThreadComm};
    use crate::pixel::Lattice;
    use crate::sampler::SurfaceSample;
    use std::thread;

    fn grid() -> PixelGrid {
        // 3 x 3 nodes
        PixelGrid::Lattice(Lattice::new(&[0.0; 3], &[2.0, 2.0, 1.0], [2, 2]).unwrap())
    }

    fn batch(samples: &[(usize, f64, f64)]) -> SampleBatch {
        samples
            .iter()
            .map(|&(pixel, elevation_offset, normal_velocity)| SurfaceSample { pixel, elevation_offset, normal_velocity })
            .collect()
    }

    #[test]
    fn single_process_gather_fills_gaps() {
        let grid = grid();
        let comm = SingleProcess::new();
        let agg = DistributedAggregator::new(&comm, &grid, 1e-3, CollisionPolicy::LastWriterWins);
        let state = agg.gather(batch(&[(0, 4.0, 1.0), (2, 8.0, 3.0)])).unwrap().unwrap();

        assert_eq!(state.elevation[0], 4.0);
        assert_eq!(state.elevation[2], 8.0);
        // node 1 sits between the two samples
        assert_eq!(state.elevation[1], 6.0);
        assert_eq!(state.uplift_velocity[1], 2.0);
        assert!(state.elevation.iter().all(|h| (4.0..=8.0).contains(h)));
        assert_eq!(state.elevation_previous, state.elevation);
    }

    #[test]
    fn nothing_sampled_is_an_error() {
        let grid = grid();
        let comm = SingleProcess::new();
        let agg = DistributedAggregator::new(&comm, &grid, 1e-3, CollisionPolicy::LastWriterWins);
        assert!(matches!(
            agg.gather(SampleBatch::default()),
            Err(CouplingError::Configuration(ConfigurationError::NoSurfaceSamples))
        ));
    }

    #[test]
    fn same_rank_overlap_is_not_a_collision() {
        let mut fold = SurfaceFold::new(4, 1e-3, CollisionPolicy::Reject);
        fold.absorb(0, &batch(&[(1, 1.0, 0.0), (1, 5.0, 0.0)])).unwrap();
        assert_eq!(fold.collisions, 0);
        assert_eq!(fold.elevation[1], 5.0);
    }

    #[test]
    fn collisions_follow_the_policy() {
        let mut keep = SurfaceFold::new(4, 1e-3, CollisionPolicy::LastWriterWins);
        keep.absorb(0, &batch(&[(2, 1.0, 0.0)])).unwrap();
        keep.absorb(1, &batch(&[(2, 1.0005, 0.0)])).unwrap();
        assert_eq!(keep.collisions, 0, "within precision");
        keep.absorb(2, &batch(&[(2, 9.0, 0.0)])).unwrap();
        assert_eq!(keep.collisions, 1);
        assert_eq!(keep.elevation[2], 9.0);

        let mut strict = SurfaceFold::new(4, 1e-3, CollisionPolicy::Reject);
        strict.absorb(0, &batch(&[(2, 1.0, 0.0)])).unwrap();
        let err = strict.absorb(1, &batch(&[(2, 2.0, 0.0)])).unwrap_err();
        assert!(matches!(err, ProtocolError::OverlappingContribution { pixel: 2, first: 0, second: 1 }));
    }

    #[test]
    fn out_of_range_pixels_are_rejected() {
        let mut fold = SurfaceFold::new(4, 1e-3, CollisionPolicy::LastWriterWins);
        assert!(matches!(
            fold.absorb(3, &batch(&[(4, 0.0, 0.0)])),
            Err(ProtocolError::PixelOutOfRange { source_rank: 3, pixel: 4, cell_count: 4 })
        ));
    }

    #[test]
    fn threaded_gather_and_broadcast() {
        let grid = grid();
        let handles: Vec<_> = ThreadComm::world(3)
            .into_iter()
            .map(|comm| {
                let grid = grid.clone();
                thread::spawn(move || {
                    let agg = DistributedAggregator::new(&comm, &grid, 1e-3, CollisionPolicy::LastWriterWins);
                    let r = comm.rank();
                    let local = batch(&[(r * 3, r as f64, 0.5), (r * 3 + 1, r as f64, 0.5), (r * 3 + 2, r as f64, 0.5)]);
                    let state = agg.gather(local).unwrap();
                    let result = state.as_ref().map(|s| ResultField::new(s.elevation.clone()));
                    (state.is_some(), agg.broadcast(result.as_ref()).unwrap())
                })
            })
            .collect();

        for (rank, h) in handles.into_iter().enumerate() {
            let (has_state, field) = h.join().unwrap();
            assert_eq!(has_state, rank == COORDINATOR);
            assert_eq!(field.to_vec(), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        }
    }

    #[test]
    fn short_field_is_rejected() {
        let grid = grid();
        let comm = SingleProcess::new();
        let agg = DistributedAggregator::new(&comm, &grid, 1e-3, CollisionPolicy::LastWriterWins);
        let err = agg.broadcast(Some(&ResultField::zeros(4))).unwrap_err();
        assert!(matches!(
            err,
            CouplingError::Protocol(ProtocolError::FieldLength { expected: 9, found: 4, .. })
        ));
    }
}

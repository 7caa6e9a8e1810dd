use std::collections::VecDeque;

use super::*;
use crate::planner::{decompose, ProcessingParameter};
use crate::pool::{ProcessPoolConfigurator, WorkerCount};
use crate::transform::convolution::FACE_DIRECTIONS;
use crate::volume::Volume;

fn run_serial(op: &Smooth, input: &Volume, passes: Option<usize>) -> (Volume, TransformStats) {
  let exec = ExecutionConfig::serial().unwrap();
  let mut source = input.clone();
  let mut sink = Volume::zeros(input.shape(), input.order());
  let request = TransformRequest {
    passes,
    processing: None,
  };
  let (output, stats) = op.run(&mut source, &mut sink, &request, &exec).unwrap();
  let result = match output {
    TransformOutput::InSource => source,
    TransformOutput::InSink => sink,
    TransformOutput::Detached(v) => v,
  };
  (result, stats)
}

fn run_blocks(
  op: &Smooth,
  input: &Volume,
  passes: Option<usize>,
  workers: usize,
) -> (Volume, TransformStats) {
  let exec = ProcessPoolConfigurator::apply(Some(WorkerCount::Count(workers))).unwrap();
  let mut source = input.clone();
  let mut sink = Volume::zeros(input.shape(), input.order());
  let request = TransformRequest {
    passes,
    processing: Some(ProcessingParameter::for_workers(input.shape(), workers)),
  };
  let (output, stats) = op.run(&mut source, &mut sink, &request, &exec).unwrap();
  let result = match output {
    TransformOutput::InSource => source,
    TransformOutput::InSink => sink,
    TransformOutput::Detached(v) => v,
  };
  (result, stats)
}

/// Connected components of voxels equal to `value`: 26-connectivity for
/// foreground, 6-connectivity for background.
fn components(v: &Volume, value: u8) -> usize {
  let shape = v.shape();
  let steps: Vec<[i64; 3]> = if value == 1 {
    kernels().offsets.to_vec()
  } else {
    FACE_DIRECTIONS.to_vec()
  };
  let mut seen = vec![false; v.voxels().len()];
  let mut count = 0;
  for x in 0..shape[0] {
    for y in 0..shape[1] {
      for z in 0..shape[2] {
        let start = [x, y, z];
        if v.get(start) != value || seen[v.index(start)] {
          continue;
        }
        count += 1;
        seen[v.index(start)] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(p) = queue.pop_front() {
          for o in &steps {
            let q = [p[0] as i64 + o[0], p[1] as i64 + o[1], p[2] as i64 + o[2]];
            if (0..3).any(|a| q[a] < 0 || q[a] as usize >= shape[a]) {
              continue;
            }
            let q = [q[0] as usize, q[1] as usize, q[2] as usize];
            if v.get(q) == value && !seen[v.index(q)] {
              seen[v.index(q)] = true;
              queue.push_back(q);
            }
          }
        }
      }
    }
  }
  count
}

/// First interior block boundary along `axis` for a `workers`-way split.
fn seam(shape: [usize; 3], workers: usize, axis: usize) -> usize {
  let param = ProcessingParameter::for_workers(shape, workers);
  decompose(shape, &param, 1)
    .iter()
    .map(|b| b.core.origin[axis])
    .find(|&o| o > 0)
    .unwrap()
}

fn blob(shape: [usize; 3], seed: u32) -> Volume {
  let mut v = Volume::zeros(shape, MemoryOrder::ColumnMajor);
  let mut state = seed;
  let centre = [shape[0] as f64 / 2.0, shape[1] as f64 / 2.0, shape[2] as f64 / 2.0];
  let radius = shape.iter().copied().min().unwrap_or(0) as f64 / 3.0;
  for x in 0..shape[0] {
    for y in 0..shape[1] {
      for z in 0..shape[2] {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let noise = (state >> 28) as f64 / 16.0;
        let d = ((x as f64 - centre[0]).powi(2)
          + (y as f64 - centre[1]).powi(2)
          + (z as f64 - centre[2]).powi(2))
        .sqrt();
        v.set([x, y, z], (d + noise * 2.0 < radius) as u8);
      }
    }
  }
  v
}

#[test]
fn test_table_matches_rule() {
  let table = lookup_table();
  assert!(table_ready());
  // isolated foreground voxel: candidate for removal
  assert_eq!(table[CENTRE_BIT as usize], CANDIDATE);
  // background surrounded on five faces: candidate for filling
  assert_eq!(table[0b011111], CANDIDATE);
  // interior voxel stays
  assert_eq!(table[0b1111111], KEEP);
  // background with four face neighbours stays
  assert_eq!(table[0b001111], KEEP);
  assert_eq!(table.iter().filter(|&&e| e == CANDIDATE).count(), 7 + 7);
}

#[test]
fn test_unknown_method_rejected() {
  assert_eq!(Smooth::with_method(None).unwrap().method(), SmoothMethod::Table);
  assert_eq!(Smooth::with_method(Some("direct")).unwrap().method(), SmoothMethod::Direct);
  let err = Smooth::with_method(Some("gauss"));
  assert!(matches!(
    err,
    Err(OperatorError::UnknownMethod { operator: "smooth", .. })
  ));
}

#[test]
fn test_empty_volume_stays_empty() {
  let input = Volume::zeros([64, 64, 64], MemoryOrder::ColumnMajor);
  let (result, stats) = run_serial(&Smooth::default(), &input, Some(3));
  assert_eq!(result.count_foreground(), 0);
  // first iteration changes nothing, so the run stops early
  assert_eq!(stats.passes, SUBFIELDS);
  assert_eq!(stats.changed, 0);
}

#[test]
fn test_isolated_voxel_grows_nothing() {
  let mut input = Volume::zeros([9, 9, 9], MemoryOrder::ColumnMajor);
  input.set([4, 4, 4], 1);
  let (result, _) = run_serial(&Smooth::default(), &input, None);
  // an isolated voxel is not simple, so it is kept
  assert_eq!(result.count_foreground(), 1);
  assert_eq!(result.get([4, 4, 4]), 1);
}

#[test]
fn test_spur_is_removed() {
  let mut input = Volume::zeros([12, 12, 12], MemoryOrder::ColumnMajor);
  for x in 3..8 {
    for y in 3..8 {
      for z in 3..8 {
        input.set([x, y, z], 1);
      }
    }
  }
  input.set([8, 5, 5], 1);
  let (result, stats) = run_serial(&Smooth::default(), &input, Some(1));
  assert_eq!(result.get([8, 5, 5]), 0);
  assert_eq!(result.get([5, 5, 5]), 1);
  assert!(stats.changed >= 1);
}

#[test]
fn test_pit_is_filled() {
  let mut input = Volume::zeros([12, 12, 12], MemoryOrder::ColumnMajor);
  for x in 3..9 {
    for y in 3..9 {
      for z in 3..9 {
        input.set([x, y, z], 1);
      }
    }
  }
  // dent in the +x face: open on one side only
  input.set([8, 5, 5], 0);
  let (result, _) = run_serial(&Smooth::default(), &input, Some(1));
  assert_eq!(result.get([8, 5, 5]), 1);
}

#[test]
fn test_table_and_direct_agree() {
  let input = blob([24, 20, 18], 11);
  let (table, a) = run_serial(&Smooth::new(SmoothMethod::Table), &input, Some(3));
  let (direct, b) = run_serial(&Smooth::new(SmoothMethod::Direct), &input, Some(3));
  assert_eq!(table, direct);
  assert_eq!(a, b);
}

#[test]
fn test_block_parallel_matches_serial() {
  let input = blob([40, 36, 34], 5);
  let (serial, _) = run_serial(&Smooth::default(), &input, Some(2));

  let (parallel, stats) = run_blocks(&Smooth::default(), &input, Some(2), 4);
  assert!(stats.blocks > 1);
  assert_eq!(parallel, serial);
}

#[test]
fn test_domino_keeps_one_voxel() {
  let mut input = Volume::zeros([5, 5, 5], MemoryOrder::ColumnMajor);
  input.set([2, 2, 2], 1);
  input.set([3, 2, 2], 1);
  for method in [SmoothMethod::Table, SmoothMethod::Direct] {
    let (result, stats) = run_serial(&Smooth::new(method), &input, Some(1));
    // both ends are removal candidates; only the first one flipped stays gone
    assert_eq!(result.count_foreground(), 1, "{:?}", method);
    assert_eq!(stats.changed, 1);
  }
}

#[test]
fn test_domino_across_block_seam() {
  let shape = [40, 36, 34];
  let x = seam(shape, 4, 0);
  let mut input = Volume::zeros(shape, MemoryOrder::ColumnMajor);
  input.set([x - 1, 5, 5], 1);
  input.set([x, 5, 5], 1);

  let (serial, _) = run_serial(&Smooth::default(), &input, None);
  let (parallel, stats) = run_blocks(&Smooth::default(), &input, None, 4);
  assert!(stats.blocks > 1);
  assert_eq!(parallel, serial);
  assert_eq!(parallel.count_foreground(), 1);
  assert_eq!(components(&parallel, 1), 1);
}

#[test]
fn test_isolated_voxel_on_block_seam_grows_nothing() {
  let shape = [40, 36, 34];
  let p = [seam(shape, 4, 0), 18, 17];
  let mut input = Volume::zeros(shape, MemoryOrder::ColumnMajor);
  input.set(p, 1);

  let (result, stats) = run_blocks(&Smooth::default(), &input, Some(3), 4);
  assert!(stats.blocks > 1);
  assert_eq!(result.count_foreground(), 1);
  assert_eq!(result.get(p), 1);
}

#[test]
fn test_topology_is_preserved() {
  let shape = [32, 30, 28];
  let mut input = blob(shape, 23);
  // loose voxel and domino outside the blob
  input.set([2, 2, 2], 1);
  input.set([2, 27, 3], 1);
  input.set([3, 27, 3], 1);
  // two-voxel cavity inside it
  input.set([16, 15, 14], 0);
  input.set([17, 15, 14], 0);

  let objects = components(&input, 1);
  let background = components(&input, 0);
  assert!(background >= 2);

  let (serial, stats) = run_serial(&Smooth::default(), &input, Some(3));
  assert!(stats.changed > 0);
  assert_eq!(components(&serial, 1), objects);
  assert_eq!(components(&serial, 0), background);

  let (parallel, _) = run_blocks(&Smooth::default(), &input, Some(3), 6);
  assert_eq!(parallel, serial);
}

use super::*;

const SHAPES: [Shape; 6] = [
  [64, 64, 64],
  [512, 300, 40],
  [17, 1000, 33],
  [16, 16, 16],
  [8, 200, 3],
  [1024, 1024, 1],
];

// =========================================================================
// plan()
// =========================================================================

#[test]
fn test_single_worker_returns_full_shape() {
  for shape in SHAPES {
    assert_eq!(plan(shape, 0), shape);
    assert_eq!(plan(shape, 1), shape);
  }
}

#[test]
fn test_cube_with_eight_workers_halves_every_axis() {
  assert_eq!(plan([64, 64, 64], 8), [32, 32, 32]);
}

#[test]
fn test_longest_axis_is_halved_first() {
  // 512*300*40 / 2 -> one halving of the X axis suffices.
  assert_eq!(plan([512, 300, 40], 2), [256, 300, 40]);
}

#[test]
fn test_ties_pick_first_axis() {
  assert_eq!(plan([64, 64, 64], 2), [32, 64, 64]);
}

#[test]
fn test_block_axes_within_bounds() {
  for shape in SHAPES {
    for workers in [2, 3, 4, 7, 16, 64, 1000] {
      let block = plan(shape, workers);
      for axis in 0..3 {
        assert!(block[axis] <= shape[axis], "{:?}/{} -> {:?}", shape, workers, block);
        assert!(
          block[axis] >= shape[axis].min(MIN_BLOCK_EDGE),
          "{:?}/{} -> {:?}",
          shape,
          workers,
          block
        );
      }
    }
  }
}

#[test]
fn test_product_is_non_increasing_across_steps() {
  for shape in SHAPES {
    for workers in [2, 5, 32, 4096] {
      let steps = plan_steps(shape, workers);
      assert_eq!(steps[0], shape);
      for pair in steps.windows(2) {
        assert!(voxel_count(pair[1]) <= voxel_count(pair[0]));
      }
    }
  }
}

#[test]
fn test_reaches_target_when_floor_allows() {
  let shape = [256, 256, 256];
  let block = plan(shape, 10);
  assert!(voxel_count(block) as f64 <= voxel_count(shape) as f64 / 10.0);
}

#[test]
fn test_floor_stops_loop_before_target() {
  // 16^3 cannot shrink at all; the planner must still terminate.
  assert_eq!(plan([16, 16, 16], 64), [16, 16, 16]);
  // Thin axes below the floor are never grown.
  assert_eq!(plan([8, 40, 3], 100), [8, 16, 3]);
}

// =========================================================================
// ProcessingParameter
// =========================================================================

#[test]
fn test_for_workers_defaults() {
  let param = ProcessingParameter::for_workers([64, 64, 64], 8);
  assert_eq!(param.size_max, [32, 32, 32]);
  assert_eq!(param.axes.as_slice(), &[0, 1, 2]);
  assert!(!param.optimization);
  assert!(param.as_memory);
  assert!(param.validate().is_ok());
}

#[test]
fn test_validate_rejects_zero_axis_and_bad_axis() {
  let mut param = ProcessingParameter::for_workers([64, 64, 64], 8);
  param.size_max = [0, 32, 32];
  assert!(matches!(param.validate(), Err(PipelineError::Config(_))));

  let mut param = ProcessingParameter::for_workers([64, 64, 64], 8);
  param.axes.push(3);
  assert!(matches!(param.validate(), Err(PipelineError::Config(_))));
}

// =========================================================================
// decompose()
// =========================================================================

fn assert_exact_cover(shape: Shape, blocks: &[Block]) {
  let mut hits = vec![0u8; voxel_count(shape)];
  for block in blocks {
    let end = block.core.end();
    for x in block.core.origin[0]..end[0] {
      for y in block.core.origin[1]..end[1] {
        for z in block.core.origin[2]..end[2] {
          hits[(x * shape[1] + y) * shape[2] + z] += 1;
        }
      }
    }
  }
  assert!(hits.iter().all(|&h| h == 1), "cores must cover every voxel once");
}

#[test]
fn test_decompose_covers_volume_once() {
  let shape = [40, 33, 17];
  let mut param = ProcessingParameter::for_workers(shape, 6);
  param.size_max = [16, 16, 16];
  for optimization in [false, true] {
    param.optimization = optimization;
    let blocks = decompose(shape, &param, 1);
    assert_exact_cover(shape, &blocks);
    for (i, block) in blocks.iter().enumerate() {
      assert_eq!(block.index, i);
      assert!(block.halo.fits(shape));
    }
  }
}

#[test]
fn test_decompose_remainder_vs_equalized() {
  let shape = [40, 16, 16];
  let mut param = ProcessingParameter::for_workers(shape, 3);
  param.size_max = [16, 16, 16];

  let fixed: Vec<usize> = decompose(shape, &param, 0)
    .iter()
    .map(|b| b.core.extent[0])
    .collect();
  assert_eq!(fixed, vec![16, 16, 8]);

  param.optimization = true;
  let equalized: Vec<usize> = decompose(shape, &param, 0)
    .iter()
    .map(|b| b.core.extent[0])
    .collect();
  assert_eq!(equalized, vec![14, 14, 12]);
}

#[test]
fn test_decompose_respects_split_axes() {
  let shape = [64, 64, 64];
  let mut param = ProcessingParameter::for_workers(shape, 8);
  param.axes = smallvec![2];
  let blocks = decompose(shape, &param, 1);
  assert_eq!(blocks.len(), 2);
  for block in &blocks {
    assert_eq!(block.core.extent[0], 64);
    assert_eq!(block.core.extent[1], 64);
  }
}

#[test]
fn test_halo_grows_inside_volume_only() {
  let shape = [32, 32, 32];
  let mut param = ProcessingParameter::for_workers(shape, 8);
  param.size_max = [16, 32, 32];
  let blocks = decompose(shape, &param, 2);
  assert_eq!(blocks[0].halo, Region::new([0, 0, 0], [18, 32, 32]));
  assert_eq!(blocks[1].halo, Region::new([14, 0, 0], [18, 32, 32]));
}

#[test]
fn test_empty_volume_has_no_blocks() {
  let param = ProcessingParameter::for_workers([0, 10, 10], 4);
  assert!(decompose([0, 10, 10], &param, 1).is_empty());
}

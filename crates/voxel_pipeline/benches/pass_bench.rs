//! Benchmarks for single operator passes - 96³ blob workloads.
//!
//! Each iteration runs one smoothing iteration or one thinning step over the same
//! volume, serially and on the block-parallel path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use voxel_pipeline::{
	ExecutionConfig, MemoryOrder, OperatorKind, ProcessPoolConfigurator, ProcessingParameter,
	TransformRequest, Volume, VolumeView, WorkerCount,
};

const EDGE: usize = 96;
const SHAPE: [usize; 3] = [EDGE, EDGE, EDGE];

/// Sphere with a ripple on its surface.
fn rippled_sphere() -> Volume {
	let mut v = Volume::zeros(SHAPE, MemoryOrder::ColumnMajor);
	let c = EDGE as f64 / 2.0;
	for x in 1..EDGE - 1 {
		for y in 1..EDGE - 1 {
			for z in 1..EDGE - 1 {
				let (dx, dy, dz) = (x as f64 - c, y as f64 - c, z as f64 - c);
				let r = (dx * dx + dy * dy + dz * dz).sqrt();
				let ripple = 2.0 * ((x + 2 * y + 3 * z) % 5) as f64 / 5.0;
				v.set([x, y, z], (r + ripple < c * 0.8) as u8);
			}
		}
	}
	v
}

fn bench_operator(c: &mut Criterion, kind: OperatorKind, method: &str) {
	let input = rippled_sphere();
	let op = kind.build(Some(method)).expect("known method");

	let mut group = c.benchmark_group(format!("{:?}_{}", kind, method).to_lowercase());
	group.throughput(Throughput::Elements((EDGE * EDGE * EDGE) as u64));
	group.sample_size(10);

	for workers in [1usize, 4, 8] {
		let exec = if workers == 1 {
			ExecutionConfig::serial().expect("serial pool")
		} else {
			ProcessPoolConfigurator::apply(Some(WorkerCount::Count(workers))).expect("pool")
		};
		let request = TransformRequest {
			passes: Some(1),
			processing: (workers > 1).then(|| ProcessingParameter::for_workers(SHAPE, workers)),
		};
		op.prepare(&exec);

		group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
			b.iter(|| {
				let mut source = input.clone();
				let mut sink = Volume::zeros(SHAPE, MemoryOrder::ColumnMajor);
				let (_, stats) = op
					.run(&mut source, &mut sink, &request, &exec)
					.expect("operator run");
				black_box((stats.changed, sink.count_foreground()))
			})
		});
	}

	group.finish();
}

fn bench_smoothing(c: &mut Criterion) {
	bench_operator(c, OperatorKind::Smooth, "table");
	bench_operator(c, OperatorKind::Smooth, "direct");
}

fn bench_thinning_step(c: &mut Criterion) {
	bench_operator(c, OperatorKind::Skeletonize, "indexed");
	bench_operator(c, OperatorKind::Skeletonize, "full");
}

criterion_group!(benches, bench_smoothing, bench_thinning_step);
criterion_main!(benches);

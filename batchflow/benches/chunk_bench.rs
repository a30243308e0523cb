//! Benchmarks for chunk step throughput.

use batchflow::core::JobParameters;
use batchflow::ledger::{in_memory_ledger, RestartRules};
use batchflow::step::{execute_step, ChunkStep, ListItemReader, PassThroughItemProcessor, Step, StepContext};
use batchflow::stop::StopSignal;
use batchflow::testing::RecordingWriter;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn run_chunks(items: Arc<Vec<u64>>, commit_interval: usize) -> u64 {
    let ledger = in_memory_ledger();
    let job = ledger
        .create_job_execution("bench", &JobParameters::new(), RestartRules::default())
        .await
        .unwrap();
    let writer = RecordingWriter::new();
    let step = ChunkStep::builder("load")
        .commit_interval(commit_interval)
        .reader(move |_| ListItemReader::shared(Arc::clone(&items)))
        .processor(PassThroughItemProcessor::new())
        .writer(move |_| writer.clone())
        .build()
        .unwrap();
    let mut execution = ledger.add_step_execution(job.id, step.name()).await.unwrap();
    let context = StepContext::new(ledger, Arc::new(StopSignal::new()), JobParameters::new());
    execute_step(&step, &mut execution, &context).await.unwrap();
    execution.write_count
}

fn chunk_benchmark(c: &mut Criterion) {
    let runtime = Runtime::new().unwrap();
    let items: Arc<Vec<u64>> = Arc::new((0..10_000).collect());

    let mut group = c.benchmark_group("chunk_step");
    for commit_interval in [1, 10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(commit_interval),
            &commit_interval,
            |b, &interval| {
                b.iter(|| runtime.block_on(run_chunks(Arc::clone(&items), black_box(interval))));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, chunk_benchmark);
criterion_main!(benches);

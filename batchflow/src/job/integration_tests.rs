//! End-to-end tests: jobs launched through the launcher against an
//! in-memory ledger.

#[cfg(test)]
mod tests {
    use crate::core::{BatchStatus, ExecutionContext, ExitStatus, JobParameters};
    use crate::errors::ItemError;
    use crate::flow::FlowBuilder;
    use crate::job::{Job, JobLauncher};
    use crate::ledger::{in_memory_ledger, ExecutionLedger};
    use crate::partition::{partition_step_name, PartitionStep, RangePartitioner, SyncTaskExecutor, RANGE_MAX_KEY, RANGE_MIN_KEY};
    use crate::retry::{BackOffPolicy, RetryContext, RetryTemplate, SimpleRetryPolicy};
    use crate::step::{ChunkStep, ItemReader, ItemStream, ListItemReader, Step};
    use crate::testing::{assert_counts, assert_job_status, assert_step_status, job_parameters, FailingProcessor, RecordingWriter, ScriptedStep};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Reads `min..=max` from a range partition's context.
    struct RangeReader {
        next: i64,
        max: i64,
    }

    impl RangeReader {
        const NEXT_KEY: &'static str = "range.reader.next";

        fn new() -> Self {
            Self { next: 1, max: 0 }
        }
    }

    #[async_trait]
    impl ItemStream for RangeReader {
        async fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
            let min = context.get_i64(RANGE_MIN_KEY).unwrap_or(1);
            self.next = context.get_i64(Self::NEXT_KEY).unwrap_or(min);
            self.max = context.get_i64(RANGE_MAX_KEY).unwrap_or(0);
            Ok(())
        }

        async fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
            context.put(Self::NEXT_KEY, self.next);
            Ok(())
        }
    }

    #[async_trait]
    impl ItemReader<i64> for RangeReader {
        async fn read(&mut self) -> Result<Option<i64>, ItemError> {
            if self.next > self.max {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next - 1))
        }
    }

    fn numbers(n: u32) -> Vec<u32> {
        (1..=n).collect()
    }

    fn chunk_job(
        commit_interval: usize,
        items: Vec<u32>,
        processor: FailingProcessor<u32>,
        writer: &RecordingWriter<u32>,
        configure: impl FnOnce(crate::step::ChunkStepBuilder<u32, u32>) -> crate::step::ChunkStepBuilder<u32, u32>,
    ) -> Job {
        let out = writer.clone();
        let items = Arc::new(items);
        let builder = ChunkStep::builder("load")
            .commit_interval(commit_interval)
            .reader(move |_| ListItemReader::shared(Arc::clone(&items)))
            .processor(processor)
            .writer(move |_| out.clone());
        let step = configure(builder).build().unwrap();
        Job::builder("import").step(Arc::new(step)).build().unwrap()
    }

    async fn only_step(ledger: &ExecutionLedger, job_execution_id: u64) -> crate::core::StepExecution {
        let mut steps = ledger.step_executions(job_execution_id).await.unwrap();
        assert_eq!(steps.len(), 1);
        steps.remove(0)
    }

    #[tokio::test]
    async fn test_chunks_of_two_over_five_items() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let job = chunk_job(2, numbers(5), FailingProcessor::new(), &writer, |b| b);

        let execution = launcher.run(&job, job_parameters(1)).await.unwrap();

        assert_job_status(&execution, BatchStatus::Completed);
        assert_eq!(execution.exit_status.code, ExitStatus::COMPLETED);
        assert_eq!(writer.chunk_sizes(), vec![2, 2, 1]);
        let step = only_step(launcher.ledger(), execution.id).await;
        assert_counts(&step, 5, 5, 0);
        assert_eq!(step.commit_count, 3);
    }

    #[tokio::test]
    async fn test_commit_count_is_items_over_interval_rounded_up() {
        for (interval, count) in [(1, 0), (3, 7), (10, 7), (4, 8)] {
            let launcher = JobLauncher::new(in_memory_ledger());
            let writer = RecordingWriter::new();
            let job = chunk_job(interval, numbers(count), FailingProcessor::new(), &writer, |b| b);

            let execution = launcher.run(&job, job_parameters(1)).await.unwrap();
            let step = only_step(launcher.ledger(), execution.id).await;

            assert_step_status(&step, BatchStatus::Completed);
            assert_counts(&step, u64::from(count), u64::from(count), 0);
            assert_eq!(step.commit_count, u64::from(count).div_ceil(interval as u64));
        }
    }

    #[tokio::test]
    async fn test_skippable_item_is_isolated() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let processor = FailingProcessor::new().fail_on(3, ItemError::new("data.invalid", "bad row"), 1);
        let job = chunk_job(2, numbers(5), processor, &writer, |b| b.skip("data").skip_limit(1));

        let execution = launcher.run(&job, job_parameters(1)).await.unwrap();

        assert_job_status(&execution, BatchStatus::Completed);
        assert_eq!(writer.written(), vec![1, 2, 4, 5]);
        let step = only_step(launcher.ledger(), execution.id).await;
        assert_counts(&step, 5, 4, 1);
        // [1,2], item 4 alone during the scan, [5]
        assert_eq!(step.commit_count, 3);
    }

    #[tokio::test]
    async fn test_second_skip_over_limit_fails_job() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let processor = FailingProcessor::new()
            .fail_on(2, ItemError::new("data.invalid", "a"), usize::MAX)
            .fail_on(5, ItemError::new("data.invalid", "b"), usize::MAX);
        let job = chunk_job(2, numbers(6), processor, &writer, |b| b.skip("data").skip_limit(1));

        let execution = launcher.run(&job, job_parameters(1)).await.unwrap();

        assert_job_status(&execution, BatchStatus::Failed);
        let step = only_step(launcher.ledger(), execution.id).await;
        assert_eq!(step.skip_count(), 1);
        assert!(!execution.all_failures().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_failure_resumes_from_checkpoint_on_relaunch() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let processor = FailingProcessor::new().fail_on(4, ItemError::new("data.corrupt", "unreadable"), 1);
        let job = chunk_job(2, numbers(5), processor, &writer, |b| b);

        let first = launcher.run(&job, job_parameters(1)).await.unwrap();
        assert_job_status(&first, BatchStatus::Failed);
        assert_eq!(first.all_failures()[0].kind, "data.corrupt");
        let failed = only_step(launcher.ledger(), first.id).await;
        assert_step_status(&failed, BatchStatus::Failed);
        assert_eq!(failed.write_count, 2);
        assert_eq!(failed.execution_context.get_u64("list.reader.index"), Some(2));

        let second = launcher.run(&job, job_parameters(1)).await.unwrap();
        assert_job_status(&second, BatchStatus::Completed);
        assert_eq!(second.job_instance.id, first.job_instance.id);
        let resumed = only_step(launcher.ledger(), second.id).await;
        assert_eq!(resumed.write_count, 3);
        assert_eq!(failed.write_count + resumed.write_count, 5);
        assert_eq!(writer.written(), numbers(5));
    }

    #[tokio::test]
    async fn test_completed_instance_cannot_be_relaunched() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let job = chunk_job(2, numbers(3), FailingProcessor::new(), &writer, |b| b);

        launcher.run(&job, job_parameters(1)).await.unwrap();
        assert!(launcher.run(&job, job_parameters(1)).await.is_err());
        assert_eq!(writer.written(), numbers(3));
    }

    fn partitioned_job(processor: FailingProcessor<i64>, writer: &RecordingWriter<i64>) -> Job {
        let out = writer.clone();
        let worker = ChunkStep::builder("load.worker")
            .commit_interval(5)
            .reader(|_| RangeReader::new())
            .processor(processor)
            .writer(move |_| out.clone())
            .build()
            .unwrap();
        let step = PartitionStep::builder("load", Arc::new(worker))
            .partitioner(RangePartitioner::new(1, 30))
            .grid_size(3)
            .strategy(Arc::new(SyncTaskExecutor))
            .build()
            .unwrap();
        Job::builder("partitioned").step(Arc::new(step)).build().unwrap()
    }

    async fn step_statuses(ledger: &ExecutionLedger, job_execution_id: u64) -> Vec<(String, BatchStatus)> {
        ledger
            .step_executions(job_execution_id)
            .await
            .unwrap()
            .into_iter()
            .map(|step| (step.step_name, step.status))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_partition_fails_umbrella_and_job() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let processor = FailingProcessor::new().fail_on(15, ItemError::new("data.corrupt", "x"), usize::MAX);
        let job = partitioned_job(processor, &writer);

        let execution = launcher.run(&job, job_parameters(1)).await.unwrap();

        assert_job_status(&execution, BatchStatus::Failed);
        assert_eq!(
            step_statuses(launcher.ledger(), execution.id).await,
            vec![
                ("load".to_string(), BatchStatus::Failed),
                (partition_step_name("load", "partition0"), BatchStatus::Completed),
                (partition_step_name("load", "partition1"), BatchStatus::Failed),
                (partition_step_name("load", "partition2"), BatchStatus::Completed),
            ]
        );
        assert_eq!(writer.written().len(), 20);
    }

    #[tokio::test]
    async fn test_partitioned_restart_reruns_only_failed_partition() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let writer = RecordingWriter::new();
        let processor = FailingProcessor::new().fail_on(15, ItemError::new("data.corrupt", "x"), 1);
        let job = partitioned_job(processor, &writer);

        let first = launcher.run(&job, job_parameters(1)).await.unwrap();
        assert_job_status(&first, BatchStatus::Failed);

        let second = launcher.run(&job, job_parameters(1)).await.unwrap();
        assert_job_status(&second, BatchStatus::Completed);
        assert_eq!(
            step_statuses(launcher.ledger(), second.id).await,
            vec![
                ("load".to_string(), BatchStatus::Completed),
                (partition_step_name("load", "partition1"), BatchStatus::Completed),
            ]
        );
        let mut written = writer.written();
        written.sort_unstable();
        assert_eq!(written, (1..=30).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_retry_with_fixed_backoff() {
        let template = RetryTemplate::new()
            .with_retry_policy(SimpleRetryPolicy::new(3))
            .with_backoff(BackOffPolicy::fixed(Duration::from_millis(100)));
        let calls = AtomicUsize::new(0);

        let started = Instant::now();
        let outcome = template
            .execute_with_context(RetryContext::new(), |_| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(ItemError::new("io.timeout", "slow"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 3);
        assert_eq!(outcome.context.attempts(), 3);
        assert_eq!(outcome.context.retry_count(), 2);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failed_step_routes_to_cleanup() {
        let launcher = JobLauncher::new(in_memory_ledger());
        let extract: Arc<dyn Step> = Arc::new(ScriptedStep::new("extract").failing_times(1));
        let cleanup = Arc::new(ScriptedStep::new("cleanup"));
        let load = Arc::new(ScriptedStep::new("load"));
        let flow = FlowBuilder::new("etl")
            .start(extract)
            .on("FAILED")
            .to(cleanup.clone())
            .from("extract")
            .on("*")
            .to(load.clone())
            .build()
            .unwrap();
        let job = Job::builder("etl").flow(Arc::new(flow)).build().unwrap();

        let execution = launcher.run(&job, JobParameters::new()).await.unwrap();

        assert_job_status(&execution, BatchStatus::Completed);
        assert_eq!(cleanup.calls(), 1);
        assert_eq!(load.calls(), 0);
        assert_eq!(
            step_statuses(launcher.ledger(), execution.id).await,
            vec![
                ("extract".to_string(), BatchStatus::Failed),
                ("cleanup".to_string(), BatchStatus::Completed),
            ]
        );
    }
}

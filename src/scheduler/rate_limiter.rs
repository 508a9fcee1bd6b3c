//! Throughput shaping on top of a scheduler.
//!
//! The limiter never blocks and never queues on its own: each submission is
//! assigned a delay so that total permit consumption stays at or below the
//! configured permits per second, and the underlying scheduler does the
//! waiting. Sustained over-submission pushes the schedule further and further
//! out; the limiter flattens bursts, it is not a back-pressure mechanism.

use crate::clock;
use crate::error::TaskError;
use crate::future::{
    immediate_result_future, Callable, Job, ListenableFuture, Scheduler, TaskFuture,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Meters submissions onto `scheduler` at a permit budget per second.
///
/// One permit costs `1000 / permits_per_second` milliseconds of schedule time.
pub struct RateLimiterExecutor<S: Scheduler> {
    scheduler: S,
    permits_per_second: u32,
    /// Monotonic timestamp up to which schedule time is already spoken for.
    last_schedule_time: Mutex<i64>,
}

impl<S: Scheduler> RateLimiterExecutor<S> {
    pub fn new(scheduler: S, permits_per_second: u32) -> Result<Self, TaskError> {
        if permits_per_second == 0 {
            return Err(TaskError::InvalidArgument(
                "permits_per_second must be at least one",
            ));
        }
        Ok(RateLimiterExecutor {
            scheduler,
            permits_per_second,
            last_schedule_time: Mutex::new(clock::last_known_millis()),
        })
    }

    pub fn permits_per_second(&self) -> u32 {
        self.permits_per_second
    }

    /// How far out the next submission would be scheduled, in milliseconds.
    ///
    /// Since the limiter never blocks, this is the best signal for how backed
    /// up callers have let it become.
    pub fn minimum_delay(&self) -> u64 {
        let last = *self.last_schedule_time.lock();
        (last - clock::last_known_millis()).max(0) as u64
    }

    /// A future that completes once the minimum delay falls to `maximum_delay`
    /// or below.
    ///
    /// Already satisfied delays return an immediately complete future;
    /// otherwise a no-op is scheduled at the difference and its future
    /// returned. Submissions made after this call do not move the completion.
    pub fn future_till_delay(
        &self,
        maximum_delay: Duration,
    ) -> Result<Arc<dyn ListenableFuture<()>>, TaskError> {
        let current = self.minimum_delay();
        let maximum = maximum_delay.as_millis() as u64;
        if current <= maximum {
            return Ok(Arc::new(immediate_result_future(())));
        }
        let future = TaskFuture::once(|| {});
        let job: Job = {
            let future = Arc::clone(&future);
            Box::new(move || future.run())
        };
        self.scheduler
            .schedule_job(job, Duration::from_millis(current - maximum))?;
        Ok(future)
    }

    /// Run `task` when the rate allows, consuming one permit.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        self.execute_with_permits(1, task)
    }

    /// Run `task` when the rate allows, consuming `permits`. Zero permits is
    /// allowed and reserves no schedule time.
    pub fn execute_with_permits(
        &self,
        permits: u32,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<(), TaskError> {
        let delay = self.pace(permits);
        self.scheduler.schedule_job(Box::new(task), delay)
    }

    /// Submit with a completion future, consuming one permit.
    pub fn submit(
        &self,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<TaskFuture<()>>, TaskError> {
        self.submit_with_permits(1, task)
    }

    pub fn submit_with_permits(
        &self,
        permits: u32,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<TaskFuture<()>>, TaskError> {
        self.submit_callable_with_permits(permits, move || {
            task();
        })
    }

    /// Submit, resolving the future to `result` on completion.
    pub fn submit_with_result<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() + Send + 'static,
        result: T,
    ) -> Result<Arc<TaskFuture<T>>, TaskError> {
        self.submit_callable_with_permits(1, move || {
            task();
            result
        })
    }

    /// Submit a value-producing task, consuming one permit.
    pub fn submit_callable<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Arc<TaskFuture<T>>, TaskError> {
        self.submit_callable_with_permits(1, task)
    }

    pub fn submit_callable_with_permits<T: Clone + Send + Sync + 'static>(
        &self,
        permits: u32,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Arc<TaskFuture<T>>, TaskError> {
        let delay = self.pace(permits);
        let future = TaskFuture::once(task);
        let job: Job = {
            let future = Arc::clone(&future);
            Box::new(move || future.run())
        };
        self.scheduler.schedule_job(job, delay)?;
        Ok(future)
    }

    /// Boxed-task variant of [`RateLimiterExecutor::submit_callable_with_permits`].
    pub fn submit_boxed<T: Clone + Send + Sync + 'static>(
        &self,
        permits: u32,
        task: Callable<T>,
    ) -> Result<Arc<TaskFuture<T>>, TaskError> {
        self.submit_callable_with_permits(permits, move || task())
    }

    /// Compute this submission's delay and advance the schedule horizon by
    /// the permit cost.
    fn pace(&self, permits: u32) -> Duration {
        let permit_cost = permits as i64 * 1000 / self.permits_per_second as i64;
        let mut last = self.last_schedule_time.lock();
        let now = clock::accurate_millis();
        let delay = (*last - now).max(0);
        *last = now + delay + permit_cost;
        Duration::from_millis(delay as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::time::Duration;

    /// Records scheduled delays instead of running anything.
    #[derive(Clone, Default)]
    struct RecordingScheduler {
        delays: Arc<PlMutex<Vec<u64>>>,
    }

    impl crate::future::Executor for RecordingScheduler {
        fn execute(&self, _job: Job) -> Result<(), TaskError> {
            self.delays.lock().push(0);
            Ok(())
        }
    }

    impl Scheduler for RecordingScheduler {
        fn schedule_job(&self, _job: Job, delay: Duration) -> Result<(), TaskError> {
            self.delays.lock().push(delay.as_millis() as u64);
            Ok(())
        }
    }

    #[test]
    fn zero_permits_per_second_is_rejected() {
        let result = RateLimiterExecutor::new(RecordingScheduler::default(), 0);
        assert!(matches!(result, Err(TaskError::InvalidArgument(_))));
    }

    #[test]
    fn burst_is_spread_at_the_permit_rate() {
        let recorder = RecordingScheduler::default();
        let limiter = RateLimiterExecutor::new(recorder.clone(), 10).unwrap();

        for _ in 0..5 {
            limiter.execute(|| {}).unwrap();
        }

        let delays = recorder.delays.lock();
        assert_eq!(delays.len(), 5);
        for (index, delay) in delays.iter().enumerate() {
            let expected = index as u64 * 100;
            assert!(
                delay.abs_diff(expected) <= 20,
                "submission {index} scheduled at {delay}ms, expected about {expected}ms"
            );
        }
    }

    #[test]
    fn minimum_delay_reflects_reserved_time() {
        let limiter = RateLimiterExecutor::new(RecordingScheduler::default(), 10).unwrap();
        assert_eq!(limiter.minimum_delay(), 0);

        for _ in 0..5 {
            limiter.execute(|| {}).unwrap();
        }
        let minimum = limiter.minimum_delay();
        assert!(
            (400..=520).contains(&minimum),
            "expected about 500ms of reserved time, got {minimum}"
        );
    }

    #[test]
    fn permit_count_scales_the_reservation() {
        let recorder = RecordingScheduler::default();
        let limiter = RateLimiterExecutor::new(recorder.clone(), 2).unwrap();

        limiter.execute_with_permits(4, || {}).unwrap();
        limiter.execute(|| {}).unwrap();

        let delays = recorder.delays.lock();
        // four permits at two per second reserve two seconds
        assert!(delays[1].abs_diff(2_000) <= 20);
    }

    #[test]
    fn zero_permits_reserve_no_time() {
        let limiter = RateLimiterExecutor::new(RecordingScheduler::default(), 5).unwrap();
        limiter.execute_with_permits(0, || {}).unwrap();
        assert_eq!(limiter.minimum_delay(), 0);
    }

    #[test]
    fn future_till_delay_is_immediate_when_within_bound() {
        let limiter = RateLimiterExecutor::new(RecordingScheduler::default(), 10).unwrap();
        let future = limiter.future_till_delay(Duration::from_millis(100)).unwrap();
        assert!(future.is_done());
    }

    #[test]
    fn future_till_delay_schedules_the_gap() {
        let recorder = RecordingScheduler::default();
        let limiter = RateLimiterExecutor::new(recorder.clone(), 10).unwrap();
        for _ in 0..5 {
            limiter.execute(|| {}).unwrap();
        }

        let future = limiter.future_till_delay(Duration::from_millis(100)).unwrap();
        assert!(!future.is_done());
        let delays = recorder.delays.lock();
        let gap = *delays.last().unwrap();
        // about 500ms reserved, so the no-op lands about 400ms out
        assert!(gap.abs_diff(400) <= 30, "no-op scheduled at {gap}ms");
    }

    #[test]
    fn submit_callable_resolves_when_the_job_runs() {
        // run jobs inline to complete the future synchronously
        #[derive(Clone)]
        struct InlineScheduler;

        impl crate::future::Executor for InlineScheduler {
            fn execute(&self, job: Job) -> Result<(), TaskError> {
                job();
                Ok(())
            }
        }

        impl Scheduler for InlineScheduler {
            fn schedule_job(&self, job: Job, _delay: Duration) -> Result<(), TaskError> {
                job();
                Ok(())
            }
        }

        let limiter = RateLimiterExecutor::new(InlineScheduler, 100).unwrap();
        let future = limiter.submit_callable(|| 11_u32).unwrap();
        assert_eq!(future.get().unwrap(), 11);
    }
}

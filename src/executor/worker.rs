// worker thread loop
use super::pool::PoolShared;
use super::queue::Pop;
use super::task::RunOutcome;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) shared: Arc<PoolShared>,
}

impl Worker {
    // main loop: dequeue, run, repeat. Exits when the queue is closed and
    // drained, or after a keep-alive timeout with the pool above its core
    // size. Task failures are recorded on futures inside the task cell, so
    // nothing here can take the worker down.
    pub(crate) fn run(self) {
        let keep_alive = self.shared.elastic_keep_alive();

        loop {
            self.shared.idle.fetch_add(1, Ordering::Relaxed);
            let popped = self.shared.queue.pop(keep_alive);
            self.shared.idle.fetch_sub(1, Ordering::Relaxed);

            match popped {
                Pop::Task(task) => match task.run() {
                    RunOutcome::Completed => {
                        self.shared.tasks_executed.fetch_add(1, Ordering::Relaxed);
                    }
                    RunOutcome::Failed => {
                        self.shared.tasks_executed.fetch_add(1, Ordering::Relaxed);
                        self.shared.tasks_failed.fetch_add(1, Ordering::Relaxed);
                    }
                    RunOutcome::Skipped => {}
                },
                Pop::TimedOut => {
                    // Only workers beyond the core count may leave.
                    if self.shared.try_reclaim() {
                        tracing::debug!(worker = self.id, "idle worker reclaimed");
                        self.shared.worker_exited(true);
                        return;
                    }
                }
                Pop::Closed => break,
            }
        }

        tracing::debug!(worker = self.id, "worker stopping");
        self.shared.worker_exited(false);
    }
}

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinHandle};

/// A group of spawned tasks joined either fail-fast or best-effort.
///
/// Results are always returned in spawn order.
pub struct TaskManager<T, E> {
    tasks: Vec<JoinHandle<Result<T, E>>>,
    worker_semaphore: Option<Arc<Semaphore>>,
}

impl<T, E> Default for TaskManager<T, E> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            worker_semaphore: None,
        }
    }
}

impl<T, E> TaskManager<T, E>
where
    T: Send + 'static,
    E: From<tokio::task::JoinError> + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits how many tasks run at once. `None` or zero leaves the group unbounded.
    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.worker_semaphore = max_workers
            .filter(|max_workers| *max_workers > 0)
            .map(|max_workers| Arc::new(Semaphore::new(max_workers)));
        self
    }

    pub fn with_task_capacity(mut self, capacity: usize) -> Self {
        self.tasks = Vec::with_capacity(capacity);
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let worker_semaphore = self.worker_semaphore.clone();
        self.tasks.push(tokio::spawn(async move {
            let _permit = match worker_semaphore {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            task.await
        }));
    }

    /// Waits for every task, failing with the first error in spawn order.
    ///
    /// Tasks that have not finished when an error is found are aborted.
    pub async fn join_all(self) -> Result<Vec<T>, E> {
        let mut results = Vec::with_capacity(self.tasks.len());
        let mut tasks = self.tasks.into_iter();

        while let Some(task) = tasks.next() {
            match task.await.map_err(E::from).and_then(|result| result) {
                Ok(value) => results.push(value),
                Err(err) => {
                    tasks.for_each(|task| task.abort());
                    return Err(err);
                }
            }
        }

        Ok(results)
    }

    /// Waits for every task and returns each outcome, a failed task never affects the others.
    pub async fn join_settled(self) -> Vec<Result<T, E>> {
        let mut results = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            results.push(task.await.map_err(E::from).and_then(|result| result));
        }

        results
    }
}

//! Active and completed task collections behind a single lock.

use log::debug;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::task::{TransferStatus, TransferTask};
use crate::events::{CourierEvent, EventSink};
use crate::ignore_poison::IgnorePoison;

#[derive(Default)]
struct Board {
    active: Vec<TransferTask>,
    /// Newest first.
    completed: Vec<TransferTask>,
}

/// Owns every task. A task leaves `active` only through a terminal transition, and that
/// move happens under the same lock as the transition, so it happens once.
pub struct TaskBoard {
    inner: Mutex<Board>,
    events: Arc<dyn EventSink>,
}

impl TaskBoard {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Mutex::new(Board::default()),
            events,
        }
    }

    pub fn add(&self, task: TransferTask) -> Uuid {
        let id = task.id;
        debug!("Task {} added: {:?} {}", id, task.direction, task.file_name);
        self.inner.lock_ignore_poison().active.push(task);
        self.notify();
        id
    }

    pub fn start(&self, id: Uuid) -> bool {
        let mut board = self.inner.lock_ignore_poison();
        board.active.iter_mut().find(|t| t.id == id).is_some_and(TransferTask::start)
    }

    pub fn update_progress(&self, id: Uuid, transferred: u64) {
        let mut board = self.inner.lock_ignore_poison();
        if let Some(task) = board.active.iter_mut().find(|t| t.id == id) {
            task.update_progress(transferred);
        }
    }

    /// Applies a terminal status and moves the task to `completed`. Returns `false` if the
    /// task isn't active (already finished, or unknown).
    pub fn finish(&self, id: Uuid, status: TransferStatus) -> bool {
        {
            let mut board = self.inner.lock_ignore_poison();
            let Some(pos) = board.active.iter().position(|t| t.id == id) else {
                return false;
            };
            let mut task = board.active.remove(pos);
            task.finish(status);
            debug!("Task {} finished: {:?}", id, task.status);
            board.completed.insert(0, task);
        }
        self.notify();
        true
    }

    /// Sets the cancel flag of an active task.
    pub fn request_cancel(&self, id: Uuid) -> bool {
        let board = self.inner.lock_ignore_poison();
        match board.active.iter().find(|t| t.id == id) {
            Some(task) => {
                task.request_cancel();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<TransferTask> {
        let board = self.inner.lock_ignore_poison();
        board
            .active
            .iter()
            .chain(board.completed.iter())
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn status(&self, id: Uuid) -> Option<TransferStatus> {
        self.get(id).map(|t| t.status)
    }

    pub fn active(&self) -> Vec<TransferTask> {
        self.inner.lock_ignore_poison().active.clone()
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.inner.lock_ignore_poison().active.iter().map(|t| t.id).collect()
    }

    pub fn completed(&self) -> Vec<TransferTask> {
        self.inner.lock_ignore_poison().completed.clone()
    }

    pub fn clear_completed(&self) {
        self.inner.lock_ignore_poison().completed.clear();
        self.notify();
    }

    fn notify(&self) {
        let (active, completed) = {
            let board = self.inner.lock_ignore_poison();
            (board.active.len(), board.completed.len())
        };
        self.events.emit(CourierEvent::TaskListChanged { active, completed });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingEvents;
    use crate::transfer::task::{Direction, FailureReason};

    fn board() -> (TaskBoard, Arc<RecordingEvents>) {
        let events = Arc::new(RecordingEvents::default());
        (TaskBoard::new(events.clone()), events)
    }

    fn task(name: &str) -> TransferTask {
        TransferTask::new(Direction::Download, name, "DCIM", "/tmp", 10)
    }

    #[test]
    fn test_finish_moves_exactly_once() {
        let (board, _) = board();
        let id = board.add(task("a.jpg"));
        board.start(id);

        assert!(board.finish(id, TransferStatus::Completed));
        assert!(!board.finish(id, TransferStatus::Cancelled));

        assert!(board.active().is_empty());
        let completed = board.completed();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].status, TransferStatus::Completed);
    }

    #[test]
    fn test_completed_is_newest_first() {
        let (board, _) = board();
        let first = board.add(task("a.jpg"));
        let second = board.add(task("b.jpg"));

        board.finish(first, TransferStatus::Completed);
        board.finish(second, TransferStatus::failed(FailureReason::TransferFailed));

        let names: Vec<String> = board.completed().into_iter().map(|t| t.file_name).collect();
        assert_eq!(names, vec!["b.jpg", "a.jpg"]);
    }

    #[test]
    fn test_request_cancel_only_for_active() {
        let (board, _) = board();
        let id = board.add(task("a.jpg"));
        assert!(board.request_cancel(id));
        assert!(board.get(id).unwrap().is_cancel_requested());

        board.finish(id, TransferStatus::Cancelled);
        assert!(!board.request_cancel(id));
        assert!(!board.request_cancel(Uuid::new_v4()));
    }

    #[test]
    fn test_progress_only_touches_active_tasks() {
        let (board, _) = board();
        let id = board.add(task("a.jpg"));
        board.start(id);
        board.update_progress(id, 4);
        assert_eq!(board.get(id).unwrap().transferred, 4);

        board.finish(id, TransferStatus::Cancelled);
        board.update_progress(id, 9);
        assert_eq!(board.get(id).unwrap().transferred, 4);
    }

    #[test]
    fn test_clear_completed_keeps_active() {
        let (board, events) = board();
        let done = board.add(task("a.jpg"));
        let running = board.add(task("b.jpg"));
        board.finish(done, TransferStatus::Completed);

        board.clear_completed();

        assert!(board.completed().is_empty());
        assert_eq!(board.active_ids(), vec![running]);
        assert_eq!(
            events.events().last(),
            Some(&CourierEvent::TaskListChanged { active: 1, completed: 0 })
        );
    }
}

use crate::gateway::{GatewayError, TypeFilter, WorkoutGateway};
use crate::model::Workout;
use crate::progress::{DeleteTicket, FetchTicket, Notice, ProgressView, SaveTicket};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

enum Completion {
    Fetched(FetchTicket, Result<Vec<Workout>, GatewayError>),
    Saved(SaveTicket, Result<(), GatewayError>),
    Deleted(DeleteTicket, Result<(), GatewayError>),
}

/// Runs gateway calls on worker threads and hands their results back to the
/// thread that owns the [`ProgressView`].
///
/// Results are only applied from [`Dispatcher::poll`] or
/// [`Dispatcher::wait_idle`], so the view is never touched concurrently.
pub struct Dispatcher {
    gateway: Arc<dyn WorkoutGateway>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: usize,
    refresh_after_save: bool,
    waker: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn WorkoutGateway>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            gateway,
            tx,
            rx,
            in_flight: 0,
            refresh_after_save: true,
            waker: None,
        }
    }

    /// Re-fetch the current filter after every successful save.
    pub fn with_refresh_after_save(mut self, refresh: bool) -> Self {
        self.refresh_after_save = refresh;
        self
    }

    /// Called from the worker thread once a result is queued, e.g. to
    /// request a repaint.
    pub fn with_waker(mut self, waker: impl Fn() + Send + Sync + 'static) -> Self {
        self.waker = Some(Arc::new(waker));
        self
    }

    pub fn set_refresh_after_save(&mut self, refresh: bool) {
        self.refresh_after_save = refresh;
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    pub fn set_filter(&mut self, view: &mut ProgressView, filter: TypeFilter) {
        let ticket = view.set_filter(filter);
        self.spawn_fetch(ticket);
    }

    pub fn reload(&mut self, view: &mut ProgressView) {
        let ticket = view.reload();
        self.spawn_fetch(ticket);
    }

    /// Flush pending edits. Returns a notice right away when there is
    /// nothing to send.
    pub fn save(&mut self, view: &ProgressView) -> Option<Notice> {
        match view.begin_save() {
            Ok(ticket) => {
                self.spawn(move |gateway| {
                    let result = gateway.update_exercises(&ticket.updates);
                    Completion::Saved(ticket, result)
                });
                None
            }
            Err(e) => Some(e.into()),
        }
    }

    /// Delete an exercise once the user answered the confirmation prompt.
    pub fn delete_exercise(
        &mut self,
        view: &ProgressView,
        workout_id: i64,
        exercise_id: i64,
        confirmed: bool,
    ) -> Option<Notice> {
        match view.begin_delete(workout_id, exercise_id, confirmed) {
            Ok(ticket) => {
                self.spawn(move |gateway| {
                    let result = gateway.delete_exercise(ticket.exercise_id);
                    Completion::Deleted(ticket, result)
                });
                None
            }
            Err(e) => Some(e.into()),
        }
    }

    /// Apply every completion that has arrived so far.
    pub fn poll(&mut self, view: &mut ProgressView) -> Vec<Notice> {
        let mut notices = Vec::new();
        while let Ok(completion) = self.rx.try_recv() {
            self.apply(view, completion, &mut notices);
        }
        notices
    }

    /// Block until every issued call has completed and been applied,
    /// including reloads triggered by the completions themselves.
    pub fn wait_idle(&mut self, view: &mut ProgressView) -> Vec<Notice> {
        let mut notices = Vec::new();
        while self.in_flight > 0 {
            match self.rx.recv() {
                Ok(completion) => self.apply(view, completion, &mut notices),
                Err(_) => break,
            }
        }
        notices
    }

    fn apply(
        &mut self,
        view: &mut ProgressView,
        completion: Completion,
        notices: &mut Vec<Notice>,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Fetched(ticket, result) => {
                notices.extend(view.finish_fetch(ticket, result));
            }
            Completion::Saved(ticket, result) => {
                let notice = view.finish_save(ticket, result);
                let reload = notice.is_success() && self.refresh_after_save;
                notices.push(notice);
                if reload {
                    self.reload(view);
                }
            }
            Completion::Deleted(ticket, result) => {
                notices.push(view.finish_delete(ticket, result));
            }
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket) {
        self.spawn(move |gateway| {
            let result = gateway.fetch_workouts(&ticket.request);
            Completion::Fetched(ticket, result)
        });
    }

    fn spawn<F>(&mut self, call: F)
    where
        F: FnOnce(&dyn WorkoutGateway) -> Completion + Send + 'static,
    {
        self.in_flight += 1;
        let gateway = Arc::clone(&self.gateway);
        let tx = self.tx.clone();
        let waker = self.waker.clone();
        std::thread::spawn(move || {
            let completion = call(gateway.as_ref());
            if tx.send(completion).is_err() {
                log::debug!("Progress view closed before a gateway call finished");
                return;
            }
            if let Some(wake) = waker {
                wake();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExerciseField;
    use crate::progress::{Expansion, NoticeLevel};
    use crate::session::Session;
    use crate::test_support::{Call, RecordingGateway};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(gateway: Arc<RecordingGateway>) -> (Dispatcher, ProgressView) {
        let mut dispatcher = Dispatcher::new(gateway).with_refresh_after_save(false);
        let mut view = ProgressView::new(Session::new(Some(3), Vec::new()));
        dispatcher.set_filter(&mut view, TypeFilter::All);
        assert!(dispatcher.wait_idle(&mut view).is_empty());
        (dispatcher, view)
    }

    fn sample() -> serde_json::Value {
        json!([{"id": 1, "type": "Push", "exercises": [{"id": 10, "name": "Bench", "sets": 3}]}])
    }

    #[test]
    fn loads_through_gateway() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (dispatcher, view) = setup(gateway.clone());
        assert_eq!(view.total_workouts(), 1);
        assert!(!dispatcher.is_busy());
        assert_eq!(
            gateway.calls(),
            vec![Call::Fetch {
                user_id: Some(3),
                filter: TypeFilter::All
            }]
        );
    }

    #[test]
    fn empty_save_makes_no_call() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (mut dispatcher, view) = setup(gateway.clone());

        let notice = dispatcher.save(&view).unwrap();
        assert_eq!(notice.level, NoticeLevel::Info);
        assert!(!dispatcher.is_busy());
        assert_eq!(gateway.calls().len(), 1);
    }

    #[test]
    fn save_sends_one_batch_and_clears_buffer() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (mut dispatcher, mut view) = setup(gateway.clone());

        view.record_edit(1, 10, ExerciseField::Sets, "5");
        assert!(dispatcher.save(&view).is_none());
        let notices = dispatcher.wait_idle(&mut view);

        assert_eq!(notices, vec![Notice::success("Changes saved!")]);
        assert!(view.edits().is_empty());
        assert_eq!(
            gateway.calls().last(),
            Some(&Call::Update(json!([{"id": 10, "sets": "5"}])))
        );
    }

    #[test]
    fn refresh_after_save_reloads_current_filter() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (dispatcher, mut view) = setup(gateway.clone());
        let mut dispatcher = dispatcher.with_refresh_after_save(true);

        dispatcher.set_filter(&mut view, TypeFilter::Type(4));
        dispatcher.wait_idle(&mut view);
        view.toggle(1);
        view.record_edit(1, 10, ExerciseField::Reps, "8");
        dispatcher.save(&view);
        dispatcher.wait_idle(&mut view);

        let calls = gateway.calls();
        assert_eq!(
            calls.last(),
            Some(&Call::Fetch {
                user_id: Some(3),
                filter: TypeFilter::Type(4)
            })
        );
        assert_eq!(view.expansion(), Expansion::Collapsed);
        assert_eq!(view.total_workouts(), 1);
    }

    #[test]
    fn failed_save_reports_and_keeps_edits() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (mut dispatcher, mut view) = setup(gateway.clone());
        gateway.fail_next();

        view.record_edit(1, 10, ExerciseField::Sets, "5");
        dispatcher.save(&view);
        let notices = dispatcher.wait_idle(&mut view);

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
        assert_eq!(view.edits().len(), 1);
    }

    #[test]
    fn confirmed_delete_prunes_store_and_buffer() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (mut dispatcher, mut view) = setup(gateway.clone());

        view.record_edit(1, 10, ExerciseField::Sets, "5");
        assert!(dispatcher.delete_exercise(&view, 1, 10, true).is_none());
        dispatcher.wait_idle(&mut view);

        assert_eq!(gateway.calls().last(), Some(&Call::Delete(10)));
        assert!(view.store().workout(1).unwrap().exercises.is_empty());
        assert!(view.edits().is_empty());
    }

    #[test]
    fn declined_delete_makes_no_call() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let (mut dispatcher, view) = setup(gateway.clone());

        let notice = dispatcher.delete_exercise(&view, 1, 10, false).unwrap();
        assert_eq!(notice.message, "Delete cancelled.");
        assert_eq!(gateway.calls().len(), 1);
        assert!(view.store().exercise(1, 10).is_some());
    }

    #[test]
    fn waker_fires_per_completion() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&wakes);
        let mut dispatcher = Dispatcher::new(gateway).with_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut view = ProgressView::new(Session::new(None, Vec::new()));

        dispatcher.set_filter(&mut view, TypeFilter::All);
        dispatcher.reload(&mut view);
        dispatcher.wait_idle(&mut view);
        assert_eq!(view.total_workouts(), 1);

        // the waker runs just after the result is queued
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while wakes.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn poll_applies_without_blocking() {
        let gateway = Arc::new(RecordingGateway::with_workouts(sample()));
        let mut dispatcher = Dispatcher::new(gateway);
        let mut view = ProgressView::new(Session::new(None, Vec::new()));

        dispatcher.set_filter(&mut view, TypeFilter::All);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while dispatcher.is_busy() && std::time::Instant::now() < deadline {
            dispatcher.poll(&mut view);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!dispatcher.is_busy());
        assert_eq!(view.total_workouts(), 1);
    }
}

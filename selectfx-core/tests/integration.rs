//! Integration Tests for Effect Reconciliation
//!
//! These tests drive full render cycles through an `EffectContext`: selectors
//! request effects during evaluation, and the host commits once per cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use selectfx_core::{
    key_of, CommitReport, EffectContext, EffectError, EntryState, ParamEffect, Store, Teardown,
};

#[derive(Debug, Clone, PartialEq)]
enum Action {
    FetchUser(u32),
    CancelUser(u32),
}

#[derive(Debug, Clone, Default)]
struct AppState {
    users: HashMap<u32, String>,
}

#[derive(Default)]
struct AppStore {
    state: Mutex<AppState>,
    log: Mutex<Vec<Action>>,
}

impl Store for AppStore {
    type State = AppState;
    type Action = Action;

    fn dispatch(&self, action: Action) {
        self.log.lock().push(action);
    }

    fn get_state(&self) -> AppState {
        self.state.lock().clone()
    }
}

impl AppStore {
    fn fetches(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|a| matches!(a, Action::FetchUser(_)))
            .count()
    }

    fn cancels(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|a| matches!(a, Action::CancelUser(_)))
            .count()
    }
}

/// Registers `ensureUserIsFetched(id)`: dispatches a fetch unless the user is
/// already loaded.
fn ensure_user_effect(ctx: &EffectContext<AppStore>) -> ParamEffect<(u32,), AppStore> {
    ctx.param_effect("ensureUserIsFetched", |&(id,): &(u32,), store: &AppStore| {
        if store.get_state().users.contains_key(&id) {
            return Teardown::none();
        }
        store.dispatch(Action::FetchUser(id));
        Teardown::new(|| {})
    })
    .unwrap()
}

/// Selector that reads a user and makes sure it gets fetched.
fn select_user_state(
    ctx: &EffectContext<AppStore>,
    ensure_user: &ParamEffect<(u32,), AppStore>,
    user_id: u32,
) -> Option<String> {
    let state = ctx.store().get_state();
    ctx.select(&state, |state, fx| {
        fx.request_with(ensure_user, (user_id,));
        state.users.get(&user_id).cloned()
    })
    .unwrap()
}

/// Test the user-fetch scenario across three cycles: start, stable, restart.
#[test]
fn user_fetch_scenario() {
    let ctx = EffectContext::new(AppStore::default());
    let stops = Arc::new(AtomicUsize::new(0));

    let stops_clone = stops.clone();
    let ensure_user = ctx
        .param_effect("ensureUserIsFetched", move |&(id,): &(u32,), store: &AppStore| {
            store.dispatch(Action::FetchUser(id));
            let stops = stops_clone.clone();
            Teardown::new(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            })
        })
        .unwrap();

    // Cycle 1: userId = 7
    assert_eq!(select_user_state(&ctx, &ensure_user, 7), None);
    assert_eq!(ctx.store().fetches(), 0, "effects never start during evaluation");

    ctx.commit().unwrap();
    assert_eq!(ctx.registry().len(), 1);
    assert!(ctx.is_running("ensureUserIsFetched:[7]"));
    assert_eq!(*ctx.store().log.lock(), vec![Action::FetchUser(7)]);

    // Cycle 2: userId unchanged, no new dispatch
    select_user_state(&ctx, &ensure_user, 7);
    let report = ctx.commit().unwrap();
    assert!(report.is_noop());
    assert_eq!(ctx.store().fetches(), 1);

    // Cycle 3: userId = 9, one teardown and one start
    select_user_state(&ctx, &ensure_user, 9);
    let report = ctx.commit().unwrap();

    assert_eq!(report.stopped.len(), 1);
    assert_eq!(report.started.len(), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        *ctx.store().log.lock(),
        vec![Action::FetchUser(7), Action::FetchUser(9)]
    );
    assert!(!ctx.is_running("ensureUserIsFetched:[7]"));
    assert!(ctx.is_running("ensureUserIsFetched:[9]"));
}

/// Test that deep-equal parameters from separate call sites start one effect.
#[test]
fn equal_descriptors_start_once() {
    let ctx = EffectContext::new(AppStore::default());
    let ensure_user = ensure_user_effect(&ctx);

    let a = ensure_user.descriptor(&(3,)).unwrap();
    let b = ensure_user.descriptor(&(3,)).unwrap();
    assert_eq!(key_of(&a), key_of(&b));

    select_user_state(&ctx, &ensure_user, 3);
    select_user_state(&ctx, &ensure_user, 3);
    ctx.commit().unwrap();

    select_user_state(&ctx, &ensure_user, 3);
    ctx.commit().unwrap();

    assert_eq!(ctx.store().fetches(), 1);
}

/// Test that a key survives as long as any call site still requests it.
#[test]
fn ref_count_keeps_effect_alive() {
    let ctx = EffectContext::new(AppStore::default());
    let ensure_user = ensure_user_effect(&ctx);

    // Cycle 1: three independent selectors
    for _ in 0..3 {
        select_user_state(&ctx, &ensure_user, 1);
    }
    ctx.commit().unwrap();
    assert_eq!(ctx.registry().ref_count("ensureUserIsFetched:[1]"), Some(3));

    // Cycle 2: only one remains
    select_user_state(&ctx, &ensure_user, 1);
    let report = ctx.commit().unwrap();
    assert!(report.stopped.is_empty());
    assert!(ctx.is_running("ensureUserIsFetched:[1]"));
    assert_eq!(ctx.registry().ref_count("ensureUserIsFetched:[1]"), Some(1));

    // Cycle 3: none remain
    let report = ctx.commit().unwrap();
    assert_eq!(report.stopped.len(), 1);
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.store().fetches(), 1);
}

/// Test that a selector asking twice in one evaluation counts once.
#[test]
fn repeated_request_in_one_evaluation_counts_once() {
    let ctx = EffectContext::new(AppStore::default());
    let ensure_user = ensure_user_effect(&ctx);

    ctx.select(&(), |_, fx| {
        fx.request_with(&ensure_user, (5,));
        fx.request_with(&ensure_user, (5,));
    })
    .unwrap();
    ctx.commit().unwrap();

    assert_eq!(ctx.registry().ref_count("ensureUserIsFetched:[5]"), Some(1));
}

/// Test teardown-exactly-once across request, drop, and re-request.
#[test]
fn teardown_runs_once_per_instance() {
    let ctx = EffectContext::new(AppStore::default());
    let events = Arc::new(Mutex::new(Vec::new()));

    let events_clone = events.clone();
    let watch = ctx
        .effect("watchPresence", move |_: &AppStore| {
            events_clone.lock().push("start");
            let events = events_clone.clone();
            Teardown::new(move || events.lock().push("stop"))
        })
        .unwrap();

    let cycle = |requested: bool| {
        ctx.select(&(), |_, fx| {
            if requested {
                fx.request(watch.request());
            }
        })
        .unwrap();
        ctx.commit().unwrap()
    };

    cycle(true);
    cycle(true);
    cycle(false);
    cycle(false);
    cycle(true);
    cycle(false);

    assert_eq!(
        *events.lock(),
        vec!["start", "stop", "start", "stop"]
    );
}

/// Test that a speculative pass never reaches the registry.
#[test]
fn discarded_speculative_pass_is_not_committed() {
    let ctx = EffectContext::new(AppStore::default());
    let ensure_user = ensure_user_effect(&ctx);

    // Speculative evaluation asks for user 1, then the host throws it away.
    select_user_state(&ctx, &ensure_user, 1);
    assert_eq!(
        ctx.state("ensureUserIsFetched:[1]"),
        Some(EntryState::Requested)
    );
    assert_eq!(ctx.discard_pass(), 1);
    assert_eq!(ctx.state("ensureUserIsFetched:[1]"), None);

    // The accepted pass asks for user 2.
    select_user_state(&ctx, &ensure_user, 2);
    ctx.commit().unwrap();

    assert_eq!(*ctx.store().log.lock(), vec![Action::FetchUser(2)]);
}

/// Test that a failed effect is not retried until its key is evicted.
#[test]
fn failed_effect_retries_only_after_eviction() {
    let ctx = EffectContext::new(AppStore::default());
    let attempts = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(Mutex::new(Vec::new()));

    let failures_clone = failures.clone();
    ctx.on_error(move |err| failures_clone.lock().push(err.clone()));

    let attempts_clone = attempts.clone();
    let flaky = ctx
        .param_effect("ensureFeed", move |&(page,): &(u32,), _: &AppStore| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            if page == 0 {
                Err("page 0 does not exist")
            } else {
                Ok(Teardown::none())
            }
        })
        .unwrap();

    let cycle = |page: Option<u32>| -> CommitReport {
        ctx.select(&(), |_, fx| {
            if let Some(page) = page {
                fx.request_with(&flaky, (page,));
            }
        })
        .unwrap();
        ctx.commit().unwrap()
    };

    let report = cycle(Some(0));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(ctx.state("ensureFeed:[0]"), Some(EntryState::Failed));

    cycle(Some(0));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    // Different parameters: a distinct attempt.
    cycle(Some(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // Back to the failing key after it was evicted: retried once.
    cycle(Some(0));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let failures = failures.lock();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| !f.is_usage_error()));
}

/// Test that a teardown which tries to commit the same context fails fast.
#[test]
fn commit_from_teardown_is_rejected() {
    let ctx = Arc::new(EffectContext::new(AppStore::default()));
    let observed = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&ctx);
    let observed_clone = observed.clone();
    let nested = ctx
        .effect("nested", move |_: &AppStore| {
            let weak = weak.clone();
            let observed = observed_clone.clone();
            Teardown::new(move || {
                if let Some(ctx) = weak.upgrade() {
                    *observed.lock() = Some(ctx.commit().map(|_| ()));
                }
            })
        })
        .unwrap();

    ctx.select(&(), |_, fx| fx.request(nested.request())).unwrap();
    ctx.commit().unwrap();
    ctx.commit().unwrap();

    assert_eq!(
        observed.lock().take(),
        Some(Err(EffectError::ReentrantCommit))
    );
}

/// Test that shutdown stops everything and the store sees the cancels.
#[test]
fn shutdown_cancels_in_flight_work() {
    let ctx = EffectContext::new(AppStore::default());

    let store = Arc::clone(ctx.store());
    let poll = ctx
        .param_effect("pollUser", move |&(id,): &(u32,), _: &AppStore| {
            store.dispatch(Action::FetchUser(id));
            let store = Arc::clone(&store);
            Teardown::new(move || store.dispatch(Action::CancelUser(id)))
        })
        .unwrap();

    ctx.select(&(), |_, fx| {
        fx.request_with(&poll, (1,));
        fx.request_with(&poll, (2,));
    })
    .unwrap();
    ctx.commit().unwrap();
    assert_eq!(ctx.store().fetches(), 2);

    let report = ctx.shutdown().unwrap();
    assert_eq!(report.stopped.len(), 2);
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.store().cancels(), 2);
}

/// Test an async dispatch-and-forget effect cancelled through its teardown.
#[tokio::test]
async fn async_effect_is_cancelled_by_teardown() {
    let ctx = EffectContext::new(AppStore::default());
    let handles = Arc::new(Mutex::new(Vec::new()));

    let handles_clone = handles.clone();
    let stream = ctx
        .effect("streamUpdates", move |_: &AppStore| {
            let handle = tokio::spawn(async {
                std::future::pending::<()>().await;
            });
            let abort = handle.abort_handle();
            handles_clone.lock().push(handle);
            Teardown::new(move || abort.abort())
        })
        .unwrap();

    ctx.select(&(), |_, fx| fx.request(stream.request())).unwrap();
    ctx.commit().unwrap();
    assert_eq!(handles.lock().len(), 1);

    // Nobody asks for it anymore.
    ctx.commit().unwrap();

    let handle = handles.lock().pop().unwrap();
    let err = handle.await.unwrap_err();
    assert!(err.is_cancelled());
}

//! Dispatch behaviour of listeners on the default pool.
//!
//! Tests run in parallel against the one process-wide pool, so every test
//! posts its own event type; listeners for other types never see it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tether_common::{ModuleRef, ModuleScope};
use tether_events::{
    global_listen, impl_event, Event, EventFilter, EventHeader, EventType, Listener,
    ListenerResult,
};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Foo {
    header: EventHeader,
}
impl_event!(Foo);

#[derive(Default)]
struct Bar {
    header: EventHeader,
}
impl_event!(Bar);

#[derive(Default)]
struct Joined {
    header: EventHeader,
}
impl_event!(Joined);

#[derive(Default)]
struct Removal {
    header: EventHeader,
}
impl_event!(Removal);

#[derive(Default)]
struct SelfRemoval {
    header: EventHeader,
}
impl_event!(SelfRemoval);

#[derive(Default)]
struct Unheard {
    header: EventHeader,
}
impl_event!(Unheard);

#[derive(Default)]
struct Moved {
    header: EventHeader,
}
impl_event!(Moved);

#[derive(Default)]
struct Greeting {
    header: EventHeader,
    name: String,
}
impl_event!(Greeting);

#[derive(Default)]
struct Plain {
    header: EventHeader,
}
impl_event!(Plain);

#[derive(Default)]
struct Forever {
    header: EventHeader,
}
impl_event!(Forever);

#[derive(Default)]
struct Signed {
    header: EventHeader,
}
impl_event!(Signed);

#[derive(Default)]
struct Tick {
    header: EventHeader,
}
impl_event!(Tick);

#[derive(Default)]
struct Boom {
    header: EventHeader,
}
impl_event!(Boom);

#[derive(Default)]
struct Outer {
    header: EventHeader,
    depth: u32,
}
impl_event!(Outer);

#[derive(Default)]
struct Slow {
    header: EventHeader,
}
impl_event!(Slow);

#[derive(Default)]
struct Ranked {
    header: EventHeader,
}
impl_event!(Ranked);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Trace = Arc<Mutex<Vec<&'static str>>>;

fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn recorder<E: EventType>(
    trace: &Trace,
    name: &'static str,
    result: ListenerResult,
) -> Listener<EventFilter<E>> {
    let trace = trace.clone();
    Listener::new(
        move |_: &E| {
            trace.lock().unwrap().push(name);
            result
        },
        EventFilter::new(),
    )
}

fn counter<E: EventType>(hits: &Arc<AtomicUsize>) -> Listener<EventFilter<E>> {
    let hits = hits.clone();
    Listener::new(
        move |_: &E| {
            hits.fetch_add(1, Ordering::SeqCst);
            ListenerResult::Propagate
        },
        EventFilter::new(),
    )
}

// =========================================================================
// Ordering and short-circuiting
// =========================================================================

#[test]
fn stop_ends_delivery_and_other_types_are_skipped() {
    let seen = trace();
    let _a = recorder::<Foo>(&seen, "A", ListenerResult::Propagate);
    let _c = recorder::<Bar>(&seen, "C", ListenerResult::Stop);
    let _b = recorder::<Foo>(&seen, "B", ListenerResult::Stop);

    assert_eq!(Foo::default().post(), ListenerResult::Stop);
    assert_eq!(*seen.lock().unwrap(), vec!["A", "B"]);
}

#[test]
fn stop_at_position_skips_only_later_listeners() {
    let seen = trace();
    let _first = recorder::<Ranked>(&seen, "first", ListenerResult::Propagate);
    let _second = recorder::<Ranked>(&seen, "second", ListenerResult::Propagate);
    let _third = recorder::<Ranked>(&seen, "third", ListenerResult::Stop);
    let _fourth = recorder::<Ranked>(&seen, "fourth", ListenerResult::Propagate);

    assert_eq!(Ranked::default().post(), ListenerResult::Stop);
    assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn unmatched_type_propagates_without_callbacks() {
    let hits = Arc::new(AtomicUsize::new(0));
    let _foo = counter::<Foo>(&hits);
    let _bar = counter::<Bar>(&hits);

    assert_eq!(Unheard::default().post(), ListenerResult::Propagate);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

// =========================================================================
// Reentrant mutation
// =========================================================================

#[test]
fn listener_added_during_dispatch_waits_for_next_event() {
    let seen = trace();
    let added: Arc<Mutex<Vec<Listener<EventFilter<Joined>>>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = seen.clone();
    let store = added.clone();
    let _a = Listener::new(
        move |_: &Joined| {
            sink.lock().unwrap().push("A");
            let mut store = store.lock().unwrap();
            if store.is_empty() {
                store.push(recorder::<Joined>(&sink, "D", ListenerResult::Propagate));
            }
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );

    assert_eq!(Joined::default().post(), ListenerResult::Propagate);
    assert_eq!(*seen.lock().unwrap(), vec!["A"]);

    Joined::default().post();
    assert_eq!(*seen.lock().unwrap(), vec!["A", "A", "D"]);
}

#[test]
fn listener_removed_during_dispatch_is_never_invoked_again() {
    let seen = trace();
    let victim: Arc<Mutex<Option<Listener<EventFilter<Removal>>>>> = Arc::new(Mutex::new(None));

    let sink = seen.clone();
    let slot = victim.clone();
    let _remover = Listener::new(
        move |_: &Removal| {
            sink.lock().unwrap().push("remover");
            drop(slot.lock().unwrap().take());
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );
    *victim.lock().unwrap() = Some(recorder::<Removal>(&seen, "victim", ListenerResult::Stop));

    assert_eq!(Removal::default().post(), ListenerResult::Propagate);
    assert_eq!(Removal::default().post(), ListenerResult::Propagate);
    assert_eq!(*seen.lock().unwrap(), vec!["remover", "remover"]);
}

#[test]
fn listener_can_remove_itself() {
    let hits = Arc::new(AtomicUsize::new(0));
    let own: Arc<Mutex<Option<Listener<EventFilter<SelfRemoval>>>>> = Arc::new(Mutex::new(None));

    let counter = hits.clone();
    let slot = own.clone();
    let listener = Listener::new(
        move |_: &SelfRemoval| {
            counter.fetch_add(1, Ordering::SeqCst);
            let me = slot.lock().unwrap().take();
            drop(me);
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );
    *own.lock().unwrap() = Some(listener);

    SelfRemoval::default().post();
    SelfRemoval::default().post();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(own.lock().unwrap().is_none());
}

#[test]
fn callbacks_can_post_nested_events() {
    let depths = Arc::new(Mutex::new(Vec::new()));
    let sink = depths.clone();
    let _listener = Listener::new(
        move |event: &Outer| {
            sink.lock().unwrap().push(event.depth);
            if event.depth < 3 {
                Outer {
                    depth: event.depth + 1,
                    ..Default::default()
                }
                .post();
            }
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );

    Outer::default().post();
    assert_eq!(*depths.lock().unwrap(), vec![0, 1, 2, 3]);
}

// =========================================================================
// Construction paths and ownership
// =========================================================================

#[test]
fn moved_listener_keeps_exactly_one_subscription() {
    let hits = Arc::new(AtomicUsize::new(0));
    let listener = counter::<Moved>(&hits);
    let id = listener.id();

    let mut owners = Vec::new();
    owners.push(Box::new(listener));

    Moved::default().post();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(owners[0].id(), id);
    assert!(owners[0].is_enabled());

    owners.clear();
    Moved::default().post();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

struct Greeter {
    greeted: Mutex<Vec<String>>,
}

impl Greeter {
    fn on_greeting(&self, event: &Greeting) -> ListenerResult {
        self.greeted.lock().unwrap().push(event.name.clone());
        ListenerResult::Stop
    }
}

#[test]
fn method_listener_calls_bound_object() {
    let greeter = Arc::new(Greeter {
        greeted: Mutex::new(Vec::new()),
    });
    let _listener = Listener::bound(greeter.clone(), Greeter::on_greeting, EventFilter::new());

    let result = Greeting {
        name: "ada".into(),
        ..Default::default()
    }
    .post();

    assert_eq!(result, ListenerResult::Stop);
    assert_eq!(*greeter.greeted.lock().unwrap(), vec!["ada".to_string()]);
}

static PLAIN_HITS: AtomicUsize = AtomicUsize::new(0);

fn on_plain(_: &Plain) -> ListenerResult {
    PLAIN_HITS.fetch_add(1, Ordering::SeqCst);
    ListenerResult::Propagate
}

#[test]
fn plain_function_listener() {
    let _listener = Listener::new(on_plain, EventFilter::<Plain>::new());
    Plain::default().post();
    assert_eq!(PLAIN_HITS.load(Ordering::SeqCst), 1);
}

#[test]
fn global_listener_outlives_every_scope() {
    static HEARD: AtomicUsize = AtomicUsize::new(0);

    {
        global_listen(
            |_: &Forever| {
                HEARD.fetch_add(1, Ordering::SeqCst);
                ListenerResult::Propagate
            },
            EventFilter::new(),
        );
    }

    Forever::default().post();
    Forever::default().post();
    assert_eq!(HEARD.load(Ordering::SeqCst), 2);
}

// =========================================================================
// Sender identity
// =========================================================================

#[test]
fn post_records_current_module_as_sender() {
    let senders = Arc::new(Mutex::new(Vec::new()));
    let sink = senders.clone();
    let _listener = Listener::new(
        move |event: &Signed| {
            sink.lock()
                .unwrap()
                .push(event.sender().map(|m| m.id().to_string()));
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );

    {
        let _scope = ModuleScope::enter(ModuleRef::from_id("acme.weather"));
        Signed::default().post();
    }
    Signed::default().post_from(ModuleRef::from_id("acme.explicit"));

    assert_eq!(
        *senders.lock().unwrap(),
        vec![
            Some("acme.weather".to_string()),
            Some("acme.explicit".to_string())
        ]
    );
}

// =========================================================================
// Threads and failures
// =========================================================================

#[test]
fn concurrent_posts_and_churn_deliver_to_stable_listener_exactly_once_each() {
    const POSTERS: usize = 4;
    const POSTS: usize = 500;

    let stable_hits = Arc::new(AtomicUsize::new(0));
    let _stable = counter::<Tick>(&stable_hits);
    let done = Arc::new(AtomicBool::new(false));

    let churn = {
        let done = done.clone();
        thread::spawn(move || {
            let churn_hits = Arc::new(AtomicUsize::new(0));
            let mut round = 0usize;
            while !done.load(Ordering::SeqCst) {
                let listener = counter::<Tick>(&churn_hits);
                if round % 2 == 0 {
                    listener.disable();
                    listener.enable();
                }
                drop(listener);
                round += 1;
            }
            round
        })
    };

    let posters: Vec<_> = (0..POSTERS)
        .map(|_| {
            thread::spawn(|| {
                for _ in 0..POSTS {
                    assert_eq!(Tick::default().post(), ListenerResult::Propagate);
                }
            })
        })
        .collect();

    for poster in posters {
        poster.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    churn.join().unwrap();

    assert_eq!(stable_hits.load(Ordering::SeqCst), POSTERS * POSTS);
}

#[test]
fn removal_from_another_thread_lets_in_flight_call_finish() {
    let (entered_tx, entered_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let entered_tx = Mutex::new(entered_tx);
    let release_rx = Mutex::new(release_rx);
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = hits.clone();
    let listener = Listener::new(
        move |_: &Slow| {
            counter.fetch_add(1, Ordering::SeqCst);
            entered_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );

    let poster = thread::spawn(|| Slow::default().post());
    entered_rx.recv().unwrap();

    // Does not wait for the running callback.
    drop(listener);
    release_tx.send(()).unwrap();
    assert_eq!(poster.join().unwrap(), ListenerResult::Propagate);

    assert_eq!(Slow::default().post(), ListenerResult::Propagate);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_callback_propagates_and_pool_recovers() {
    let explode = Arc::new(AtomicBool::new(true));
    let hits = Arc::new(AtomicUsize::new(0));

    let trigger = explode.clone();
    let _bomb = Listener::new(
        move |_: &Boom| {
            if trigger.load(Ordering::SeqCst) {
                panic!("listener failure");
            }
            ListenerResult::Propagate
        },
        EventFilter::new(),
    );
    let _after = counter::<Boom>(&hits);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| Boom::default().post()));
    assert!(outcome.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    explode.store(false, Ordering::SeqCst);
    assert_eq!(Boom::default().post(), ListenerResult::Propagate);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

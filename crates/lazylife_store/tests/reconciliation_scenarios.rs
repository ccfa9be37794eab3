use lazylife_store::{
    namespace_for, BindingPhase, KeyScope, MemoryMedium, StorageContext, StorageMedium,
    WriteOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Task {
    title: String,
    done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
struct UserProfile {
    name: String,
    #[serde(default)]
    focus_minutes: u32,
}

fn task(title: &str) -> Task {
    Task {
        title: title.to_string(),
        done: false,
    }
}

fn context_over(medium: MemoryMedium) -> (Arc<MemoryMedium>, StorageContext) {
    let medium = Arc::new(medium);
    let context = StorageContext::new(medium.clone());
    (medium, context)
}

#[test]
fn guest_data_is_not_visible_to_a_new_identity() {
    let (_medium, context) = context_over(MemoryMedium::new());
    let accessor = context.accessor();

    let guest_ns = context.resolve_namespace("daily_tasks", KeyScope::Identity);
    assert_eq!(guest_ns, "guest_daily_tasks");
    accessor.write(&guest_ns, &vec![task("A")]);
    assert_eq!(accessor.read(&guest_ns, Vec::<Task>::new()), vec![task("A")]);

    context.session().impersonate("u1").unwrap();
    let user_ns = context.resolve_namespace("daily_tasks", KeyScope::Identity);
    assert_eq!(user_ns, "u1_daily_tasks");
    assert!(accessor.read(&user_ns, Vec::<Task>::new()).is_empty());
}

#[test]
fn sibling_binding_sees_write_without_calling_set() {
    let (_medium, context) = context_over(MemoryMedium::new());
    let first = context.bind("user_profile", UserProfile::default(), KeyScope::Identity);
    let second = context.bind("user_profile", UserProfile::default(), KeyScope::Identity);
    let second_renders = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&second_renders);
    second.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let profile = first.value();
    first.set(UserProfile {
        name: "X".to_string(),
        ..profile
    });

    assert_eq!(second.value().name, "X");
    assert_eq!(second_renders.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_persist_still_updates_exposed_value() {
    let (medium, context) = context_over(MemoryMedium::new().with_quota(48));
    let binding = context.bind("daily_tasks", Vec::<Task>::new(), KeyScope::Identity);

    let big = vec![task("a task title long enough to blow the tiny quota")];
    binding.set(big.clone());

    assert_eq!(binding.value(), big);
    assert!(medium.get_item("guest_daily_tasks").unwrap().is_none());

    context.poll_once();
    assert_eq!(binding.value(), big);
}

#[test]
fn failing_medium_never_panics_the_caller() {
    let (medium, context) = context_over(MemoryMedium::new());
    medium.fail_writes(true);
    let binding = context.bind("streak", 0u32, KeyScope::Identity);

    binding.set(7);
    binding.update(|n| n + 1);
    assert_eq!(binding.value(), 8);

    medium.fail_writes(false);
    binding.set(8);
    assert_eq!(medium.get_item("guest_streak").unwrap().as_deref(), Some("8"));
}

#[test]
fn malformed_record_reads_as_default() {
    let (medium, context) = context_over(MemoryMedium::new());
    medium.set_item("guest_daily_tasks", "[{\"title\": ").unwrap();

    let tasks: Vec<Task> = context.accessor().read("guest_daily_tasks", Vec::new());
    assert!(tasks.is_empty());

    let binding = context.bind("daily_tasks", vec![task("seed")], KeyScope::Identity);
    assert_eq!(binding.value(), vec![task("seed")]);
}

#[test]
fn mounted_binding_follows_identity_switch_without_resubscribing() {
    let (medium, context) = context_over(MemoryMedium::new());
    medium
        .set_item("guest_daily_tasks", "[{\"title\":\"guest\",\"done\":false}]")
        .unwrap();
    medium
        .set_item("u1_daily_tasks", "[{\"title\":\"mine\",\"done\":true}]")
        .unwrap();
    let binding = context.bind("daily_tasks", Vec::<Task>::new(), KeyScope::Identity);
    assert_eq!(binding.value()[0].title, "guest");

    context.session().impersonate("u1").unwrap();
    assert_eq!(binding.namespace(), "u1_daily_tasks");
    assert_eq!(binding.value()[0].title, "mine");
    assert_eq!(binding.phase(), BindingPhase::Bound);

    context.session().continue_as_guest().unwrap();
    assert_eq!(binding.value()[0].title, "guest");
}

#[test]
fn marker_change_without_signal_is_caught_on_next_read() {
    let (medium, context) = context_over(MemoryMedium::new());
    let binding = context.bind("streak", 0u32, KeyScope::Identity);
    binding.set(3);

    medium
        .set_item(context.resolver().session_key(), "u2")
        .unwrap();
    assert_eq!(binding.value(), 0);
    assert_eq!(binding.namespace(), "u2_streak");
}

#[test]
fn update_after_identity_switch_applies_to_new_identity_value() {
    let (medium, context) = context_over(MemoryMedium::new());
    medium.set_item("u1_streak", "10").unwrap();
    let binding = context.bind("streak", 1u32, KeyScope::Identity);

    medium
        .set_item(context.resolver().session_key(), "u1")
        .unwrap();
    binding.update(|n| n + 1);

    assert_eq!(medium.get_item("u1_streak").unwrap().as_deref(), Some("11"));
    assert!(medium.get_item("guest_streak").unwrap().is_none());
}

#[test]
fn namespace_is_deterministic_per_identity() {
    let (medium, context) = context_over(MemoryMedium::new());
    for key in ["daily_tasks", "reflections", "chat_history"] {
        assert_eq!(
            context.resolve_namespace(key, KeyScope::Identity),
            format!("guest_{key}")
        );
        for identity in ["u1", "alice@example.com", "42"] {
            medium
                .set_item(context.resolver().session_key(), identity)
                .unwrap();
            assert_eq!(
                context.resolve_namespace(key, KeyScope::Identity),
                format!("{identity}_{key}")
            );
            assert_eq!(
                context.resolve_namespace(key, KeyScope::Identity),
                namespace_for(Some(identity), key, KeyScope::Identity)
            );
            assert_eq!(context.resolve_namespace(key, KeyScope::Global), key);
        }
        medium.remove_item(context.resolver().session_key()).unwrap();
    }
}

#[test]
fn write_then_read_roundtrips_in_same_context() {
    let (_medium, context) = context_over(MemoryMedium::new());
    let accessor = context.accessor();
    let reflections = serde_json::json!({
        "2026-10-01": {"mood": 4, "note": "shipped"},
        "2026-10-02": {"mood": 2, "note": null}
    });

    accessor.write("guest_reflections", &reflections);
    assert_eq!(
        accessor.read("guest_reflections", serde_json::Value::Null),
        reflections
    );
}

#[test]
fn repeated_identical_write_persists_and_signals_once() {
    let (medium, context) = context_over(MemoryMedium::new());
    let accessor = context.accessor();
    let tasks = vec![task("A"), task("B")];

    assert_eq!(accessor.write("guest_daily_tasks", &tasks), WriteOutcome::Persisted);
    assert_eq!(accessor.write("guest_daily_tasks", &tasks), WriteOutcome::Unchanged);
    assert_eq!(medium.write_count(), 1);
    assert_eq!(context.notifier().signals_dispatched(), 1);
}

#[test]
fn cross_context_write_arrives_by_push() {
    let shared = MemoryMedium::new();
    let tab_b_medium = shared.open_context();
    let (_a_medium, tab_a) = context_over(shared);
    let tab_b = StorageContext::new(Arc::new(tab_b_medium));

    let a = tab_a.bind("daily_tasks", Vec::<Task>::new(), KeyScope::Identity);
    let b = tab_b.bind("daily_tasks", Vec::<Task>::new(), KeyScope::Identity);

    a.set(vec![task("from A")]);
    assert_eq!(b.value(), vec![task("from A")]);
}

#[test]
fn cross_context_write_arrives_by_poll_when_push_is_disabled() {
    let shared = MemoryMedium::new().without_push_events();
    let tab_b_medium = shared.open_context();
    let (_a_medium, tab_a) = context_over(shared);
    let tab_b = StorageContext::new(Arc::new(tab_b_medium));
    assert!(!tab_b.supports_push());

    let a = tab_a.bind("groups", Vec::<String>::new(), KeyScope::Global);
    let b = tab_b.bind("groups", Vec::<String>::new(), KeyScope::Global);

    a.set(vec!["book club".to_string()]);
    assert_eq!(b.revision(), 0);

    assert!(tab_b.poll_once());
    assert_eq!(b.value(), vec!["book club".to_string()]);
    assert_eq!(b.revision(), 1);
}

#[test]
fn hidden_tab_catches_up_when_visible_again() {
    let shared = MemoryMedium::new().without_push_events();
    let tab_b_medium = shared.open_context();
    let (_a_medium, tab_a) = context_over(shared);
    let tab_b = StorageContext::new(Arc::new(tab_b_medium));

    let a = tab_a.bind("streak", 0u32, KeyScope::Identity);
    let b = tab_b.bind("streak", 0u32, KeyScope::Identity);

    tab_b.set_visibility(lazylife_store::Visibility::Hidden);
    a.set(5);
    assert!(!tab_b.poll_once());
    assert_eq!(b.revision(), 0);

    tab_b.set_visibility(lazylife_store::Visibility::Visible);
    assert_eq!(b.value(), 5);
}

#[test]
fn login_in_one_tab_rebinds_the_other_tab() {
    let shared = MemoryMedium::new().without_push_events();
    let tab_b_medium = shared.open_context();
    let (medium, tab_a) = context_over(shared);
    let tab_b = StorageContext::new(Arc::new(tab_b_medium));
    medium.set_item("u9_streak", "9").unwrap();

    let b = tab_b.bind("streak", 0u32, KeyScope::Identity);
    tab_a.session().impersonate("u9").unwrap();

    tab_b.poll_once();
    assert_eq!(b.namespace(), "u9_streak");
    assert_eq!(b.value(), 9);
}

//! Value groups: sequence and map consumption.

use std::sync::Arc;

use appwire::{invoke, module, provide, supply, App, CoreError, Group, GroupMap};

#[derive(Debug)]
struct Handler {
    route: &'static str,
}

#[test]
fn group_collects_every_contributor() {
    let app = App::new((
        provide(|| Handler { route: "/a" }).group("handlers"),
        provide(|| Handler { route: "/b" }).group("handlers"),
        provide(|| Handler { route: "/c" }).group("handlers"),
        invoke(|handlers: Group<Handler>| {
            let routes: Vec<&str> = handlers.0.iter().map(|h| h.route).collect();
            assert_eq!(routes, vec!["/a", "/b", "/c"]);
        })
        .param_group(0, "handlers"),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
}

#[test]
fn named_group_contributors_form_a_map() {
    let app = App::new((
        provide(|| Handler { route: "/a" }).name("a").group("handlers"),
        provide(|| Handler { route: "/b" }).name("b").group("handlers"),
        provide(|| Handler { route: "/c" }).name("c").group("handlers"),
        invoke(|handlers: GroupMap<Handler>| {
            assert_eq!(handlers.0.len(), 3);
            assert_eq!(handlers.0["a"].route, "/a");
            assert_eq!(handlers.0["b"].route, "/b");
            assert_eq!(handlers.0["c"].route, "/c");
        })
        .param_group(0, "handlers"),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
}

#[test]
fn map_consumption_requires_names_on_every_contributor() {
    let app = App::new((
        provide(|| Handler { route: "/a" }).name("a").group("handlers"),
        provide(|| Handler { route: "/b" }).group("handlers"),
        invoke(|_handlers: GroupMap<Handler>| {}).param_group(0, "handlers"),
    ));
    match app.err() {
        Some(CoreError::InvalidOption { reason, .. }) => {
            assert!(reason.contains("handlers"), "{}", reason);
            assert!(reason.contains("name"), "{}", reason);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn map_consumption_rejects_duplicate_names() {
    let app = App::new((
        provide(|| Handler { route: "/a" }).name("a").group("handlers"),
        provide(|| Handler { route: "/b" }).name("a").group("handlers"),
        invoke(|_handlers: GroupMap<Handler>| {}).param_group(0, "handlers"),
    ));
    match app.err() {
        Some(CoreError::InvalidOption { reason, .. }) => {
            assert!(reason.contains("twice"), "{}", reason);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn empty_required_group_is_missing() {
    let app = App::new(invoke(|_handlers: Group<Handler>| {}).param_group(0, "handlers"));
    assert!(matches!(app.err(), Some(CoreError::Missing { .. })));
}

#[test]
fn empty_soft_group_resolves_to_empty() {
    let app = App::new(
        invoke(|handlers: Group<Handler>| assert!(handlers.0.is_empty()))
            .param_group(0, "handlers")
            .soft(0),
    );
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
}

#[test]
fn group_parameter_without_tag_is_rejected() {
    let app = App::new(invoke(|_handlers: Group<Handler>| {}));
    match app.err() {
        Some(CoreError::InvalidOption { reason, .. }) => {
            assert!(reason.contains("param_group"), "{}", reason);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn module_contributions_follow_parent_contributions() {
    let app = App::new((
        supply(Handler { route: "/root" }).group("handlers"),
        module(
            "extra",
            supply(Handler { route: "/extra" }).group("handlers"),
        ),
        invoke(|handlers: Group<Handler>| {
            let routes: Vec<&str> = handlers.0.iter().map(|h| h.route).collect();
            assert_eq!(routes, vec!["/root", "/extra"]);
        })
        .param_group(0, "handlers"),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
}

#[test]
fn private_group_contributions_stay_local() {
    let app = App::new((
        supply(Handler { route: "/public" }).group("handlers"),
        module(
            "hidden",
            supply(Handler { route: "/private" })
                .group("handlers")
                .private(),
        ),
        invoke(|handlers: Group<Handler>| {
            let routes: Vec<&str> = handlers.0.iter().map(|h| h.route).collect();
            assert_eq!(routes, vec!["/public"]);
        })
        .param_group(0, "handlers"),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
}

#[test]
fn group_members_are_singletons_across_consumers() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let app = App::new((
        provide(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Handler { route: "/counted" }
        })
        .group("handlers"),
        invoke(|handlers: Group<Handler>| assert_eq!(handlers.0.len(), 1))
            .param_group(0, "handlers"),
        invoke(|handlers: Group<Handler>| assert_eq!(handlers.0.len(), 1))
            .param_group(0, "handlers"),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn both_name_and_group_on_a_parameter_is_rejected() {
    let app = App::new((
        supply(1u32),
        invoke(|_n: Arc<u32>| {})
            .param_name(0, "a")
            .param_group(0, "g"),
    ));
    match app.err() {
        Some(CoreError::InvalidOption { reason, .. }) => {
            assert!(reason.contains("both"), "{}", reason);
        }
        other => panic!("unexpected: {:?}", other),
    }
}

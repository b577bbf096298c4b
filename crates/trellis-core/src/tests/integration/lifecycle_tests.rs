use std::sync::{Arc, Mutex};

use crate::event::Event;
use crate::event::EventDispatcher;
use crate::event::types::{
    FrameworkShutdownEvent, FrameworkShuttingDownEvent, FrameworkStartedEvent, FrameworkStartingEvent,
    FrameworkWarmRestartedEvent, FrameworkWarmRestartingEvent,
};
use crate::kernel::ManagerState;
use crate::plugin_system::manager::PluginManager;

use super::common::{Greeter, Layout, service_factory, service_plugin, write_plugin};

fn record_framework_events(events: &EventDispatcher) -> Arc<Mutex<Vec<&'static str>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    macro_rules! record {
        ($ty:ty) => {{
            let seen = Arc::clone(&seen);
            events.subscribe::<$ty, _>(move |event| {
                seen.lock().unwrap().push(event.name());
                Ok(())
            });
        }};
    }
    record!(FrameworkStartingEvent);
    record!(FrameworkStartedEvent);
    record!(FrameworkWarmRestartingEvent);
    record!(FrameworkWarmRestartedEvent);
    record!(FrameworkShuttingDownEvent);
    record!(FrameworkShutdownEvent);
    seen
}

#[tokio::test]
async fn test_framework_runs_through_its_lifecycle_twice() {
    let layout = Layout::new();
    write_plugin(&layout.installed(), &service_plugin("a", "1.0", "hi"));
    let events = Arc::new(EventDispatcher::new());
    let seen = record_framework_events(&events);

    let manager = PluginManager::from_config(layout.config(), service_factory()).with_events(Arc::clone(&events));
    assert_eq!(manager.state(), ManagerState::NotStarted);

    manager.init().await.unwrap();
    manager.warm_restart().await.unwrap();
    manager.shutdown().await.unwrap();
    assert_eq!(manager.state(), ManagerState::Shutdown);
    assert_eq!(manager.plugin_count(), 0);

    manager.init().await.unwrap();
    assert_eq!(manager.state(), ManagerState::Started);
    assert!(manager.is_plugin_enabled("a").unwrap());

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "framework.starting",
            "framework.started",
            "framework.warm_restarting",
            "framework.warm_restarted",
            "framework.shutting_down",
            "framework.shutdown",
            "framework.starting",
            "framework.started",
        ]
    );
}

#[tokio::test]
async fn test_typed_module_lookup_follows_enablement() {
    let layout = Layout::new();
    write_plugin(&layout.installed(), &service_plugin("en", "1.0", "hello"));
    write_plugin(&layout.installed(), &service_plugin("fr", "1.0", "bonjour"));

    let manager = PluginManager::from_config(layout.config(), service_factory());
    manager.init().await.unwrap();

    let mut greetings: Vec<String> = manager
        .get_enabled_modules_by_type::<Greeter>()
        .into_iter()
        .map(|(_, greeter)| greeter.greeting.clone())
        .collect();
    greetings.sort();
    assert_eq!(greetings, vec!["bonjour", "hello"]);

    manager.disable_plugin_module("fr:svc").await.unwrap();
    let found = manager.get_enabled_modules_by_type::<Greeter>();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].0.complete_key(), "en:svc");

    // Objects are cached per descriptor until the module goes down.
    let again = manager.get_enabled_modules_by_type::<Greeter>();
    assert!(Arc::ptr_eq(&found[0].1, &again[0].1));
}

use crate::event::types::*;
use crate::event::Event;

#[test]
fn test_event_names() {
    assert_eq!(FrameworkStartingEvent.name(), "framework.starting");
    assert_eq!(FrameworkShutdownEvent.name(), "framework.shutdown");
    assert_eq!(PluginEnabledEvent::new("a").name(), "plugin.enabled");
    assert_eq!(PluginModuleDisabledEvent::new("a", "a:m").name(), "plugin.module.disabled");
}

#[test]
fn test_downcast_through_as_any() {
    let event: Box<dyn Event> = Box::new(PluginModuleEnabledEvent::new("com.example.alpha", "com.example.alpha:web"));
    let typed = event
        .as_any()
        .downcast_ref::<PluginModuleEnabledEvent>()
        .expect("should downcast to the concrete event");
    assert_eq!(typed.plugin_key, "com.example.alpha");
    assert_eq!(typed.module_key, "com.example.alpha:web");
    assert!(event.as_any().downcast_ref::<PluginEnabledEvent>().is_none());
}

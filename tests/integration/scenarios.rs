//! Engine behavior on complete card trees, through the public API.

use cardtpl_cli::templating::{Context, Dialect, Engine, NodePath, Partial, RegistrationError};
use cardtpl_cli::test_utils::init_test_logging;
use serde_json::{Value, json};
use std::sync::Arc;

fn room_engine() -> Engine {
    let (engine, report) = Engine::builder()
        .partial(Partial::new("label", "{{ name | title }} ({{ area }})", Dialect::Jinja))
        .marked_template(&json!({
            "card_template": "light",
            "context": {"area": "house"},
            "type": "button",
            "entity": "light.{{ context.id }}",
            "name": "{{ include_partial(partial=\"label\", name=context.id, area=context.area) }}"
        }))
        .marked_template(&json!({
            "card_template": "room",
            "replicate_context": false,
            "key_map": {"cards": "lights"},
            "type": "vertical-stack",
            "title": "{{ context.area | upper }}",
            "cards": []
        }))
        .build();
    assert!(report.is_clean(), "{report:?}");
    engine
}

#[test]
fn test_room_stack_expands_every_light() {
    init_test_logging(None);
    let engine = room_engine();

    let view = json!({
        "title": "Downstairs",
        "cards": [{
            "ref": "room",
            "context": {
                "area": "kitchen",
                "lights": [
                    {"ref": "light", "context": {"id": "ceiling"}},
                    {"ref": "light", "context": {"id": "counter", "area": "worktop"}}
                ]
            }
        }]
    });

    let resolution = engine.resolve_with(&view, &Context::new(), &NodePath::root("views[0]"));
    assert!(resolution.is_clean(), "{:?}", resolution.failures);

    let room = &resolution.node["cards"][0];
    assert_eq!(room["type"], json!("vertical-stack"));
    assert_eq!(room["title"], json!("KITCHEN"));

    let lights = room["cards"].as_array().unwrap();
    assert_eq!(lights.len(), 2);
    assert_eq!(lights[0]["entity"], json!("light.ceiling"));
    // The room's context flows to the lights; a light's own context wins.
    assert_eq!(lights[0]["name"], json!("Ceiling (kitchen)"));
    assert_eq!(lights[1]["name"], json!("Counter (worktop)"));
}

#[test]
fn test_mutually_referencing_templates_are_both_rejected() {
    let (engine, report) = Engine::builder()
        .template_node("a", &json!({"type": "vertical-stack", "cards": [{"ref": "b"}]}))
        .template_node("b", &json!({"type": "vertical-stack", "cards": [{"ref": "a"}]}))
        .template_node("c", &json!({"type": "button"}))
        .build();

    assert!(!engine.templates().contains("a"));
    assert!(!engine.templates().contains("b"));
    assert!(engine.templates().contains("c"));
    assert_eq!(report.templates.rejected.len(), 2);
    assert!(
        report
            .templates
            .rejected
            .iter()
            .all(|e| matches!(e, RegistrationError::CircularDependency { .. }))
    );

    let resolution = engine.resolve(&json!({"cards": [{"ref": "a"}, {"ref": "c"}]}));
    assert!(resolution.node["cards"][0]["error"].as_str().unwrap().contains("'a' is not registered"));
    assert_eq!(resolution.node["cards"][1]["type"], json!("button"));
}

#[test]
fn test_eta_template_with_overrides_and_key_map() {
    let (engine, report) = Engine::builder()
        .partial(Partial::new("state_icon", "mdi:<%= it.state ?? 'lightbulb' %>", Dialect::Eta))
        .template_node(
            "tile",
            &json!({
                "dialect": "eta",
                "type": "tile",
                "entity": "<%= context.entity %>",
                "icon": "<%~ include('state_icon', {state: context.state}) %>",
                "color": "<%= context.color || 'amber' %>"
            }),
        )
        .build();
    assert!(report.is_clean(), "{report:?}");

    let node = json!({
        "ref": "tile",
        "context": {"entity": "light.desk", "state": "lightbulb-on", "label": "Desk lamp"},
        "key_map": {"name": "label"},
        "overrides": {"color": "red", "vertical": true}
    });
    let resolution = engine.resolve(&node);
    assert!(resolution.is_clean(), "{:?}", resolution.failures);

    let card = &resolution.node;
    assert_eq!(card["entity"], json!("light.desk"));
    assert_eq!(card["icon"], json!("mdi:lightbulb-on"));
    assert_eq!(card["color"], json!("red"));
    assert_eq!(card["vertical"], json!(true));
    assert_eq!(card["name"], json!("Desk lamp"));
}

#[test]
fn test_shared_engine_across_threads() {
    let engine = Arc::new(room_engine());
    let views: Vec<Value> = (0..8)
        .map(|i| json!({"cards": [{"ref": "light", "context": {"id": format!("l{i}")}}]}))
        .collect();

    let results: Vec<Value> = std::thread::scope(|scope| {
        let handles: Vec<_> = views
            .iter()
            .map(|view| {
                let engine = Arc::clone(&engine);
                scope.spawn(move || engine.resolve(view).node)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (i, view) in results.iter().enumerate() {
        assert_eq!(view["cards"][0]["entity"], json!(format!("light.l{i}")));
    }
}

#[test]
fn test_failures_report_full_paths() {
    let engine = room_engine();
    let view = json!({
        "sections": [
            {"cards": [{"type": "heading"}, {"card": {"ref": "missing"}}]}
        ]
    });

    let resolution = engine.resolve_with(&view, &Context::new(), &NodePath::root("views[2]"));
    assert_eq!(resolution.failures.len(), 1);
    assert_eq!(resolution.failures[0].path, "views[2].sections[0].cards[1].card");
    assert_eq!(resolution.failures[0].key.as_deref(), Some("missing"));
}

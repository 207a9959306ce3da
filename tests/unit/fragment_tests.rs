//! Wire shape of producer fragments.

use serde_json::json;

use stream_relay::models::{Fragment, AggregatedState};

#[test]
fn fragment_fields_default_when_absent() {
    let fragment: Fragment = serde_json::from_value(json!({})).expect("empty fragment");
    assert_eq!(fragment, Fragment::default());
}

#[test]
fn fragment_accepts_camel_case_fields() {
    let fragment: Fragment = serde_json::from_value(json!({
        "text": "hi",
        "attachments": [{"contentType": "image/png", "contentUrl": "https://example.test/a.png"}],
        "sideChannel": {"trace": 7},
        "entities": [{"type": "mention", "text": "@bot"}]
    }))
    .expect("fragment");

    assert_eq!(fragment.text.as_deref(), Some("hi"));
    assert_eq!(fragment.attachments[0].content_type, "image/png");
    assert_eq!(
        fragment.attachments[0].content_url.as_deref(),
        Some("https://example.test/a.png")
    );
    assert_eq!(fragment.side_channel["trace"], 7);
    assert_eq!(fragment.entities[0].kind, "mention");
    assert_eq!(fragment.entities[0].properties["text"], "@bot");
}

#[test]
fn entity_properties_flatten_on_output() {
    let fragment: Fragment = serde_json::from_value(json!({
        "entities": [{"type": "citation", "url": "https://example.test"}]
    }))
    .expect("fragment");
    let mut state = AggregatedState::default();
    state.merge(fragment);

    let value = serde_json::to_value(&state.entities[0]).expect("serialize");
    assert_eq!(value, json!({"type": "citation", "url": "https://example.test"}));
}

#[test]
fn merge_keeps_attachment_order_across_fragments() {
    let first: Fragment = serde_json::from_value(json!({
        "attachments": [{"contentType": "a"}, {"contentType": "b"}]
    }))
    .expect("fragment");
    let second: Fragment =
        serde_json::from_value(json!({"attachments": [{"contentType": "c"}]})).expect("fragment");

    let mut state = AggregatedState::default();
    state.merge(first);
    state.merge(second);

    let order: Vec<_> = state.attachments.iter().map(|a| a.content_type.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

// src/capture/classifier.rs
//! Event classification and enrichment
//!
//! Every raw event falls into exactly one `EventClass`:
//!
//! ```text
//! IncrementalSnapshot ─┬─ MouseInteraction ─────────► Click
//!                      ├─ MouseMove | TouchMove ────► PointerMove
//!                      ├─ Scroll ───────────────────► Scroll
//!                      ├─ Mutation ─┬─ style only ──► CosmeticMutation
//!                      │            └─ otherwise ───► StructuralMutation
//!                      └─ anything else ────────────► Other
//! Meta ─────────────────────────────────────────────► PageMeta
//! FullSnapshot ─────────────────────────────────────► Snapshot
//! everything else ──────────────────────────────────► Other
//! ```
//!
//! The predicates are pure; enrichment mutates `data` in place using the page
//! context and the provider's node lookup.

use crate::capture::event::{IncrementalSource, RawEvent, RawEventType};
use crate::capture::selector::{leaf_text, NodeLookup, SelectorResolver, FALLBACK_SELECTOR};
use crate::identity::page::PageContext;
use serde_json::{json, Value};

/// Attributes whose changes never alter structure or content
pub const COSMETIC_ATTRIBUTES: [&str; 2] = ["style", "transform"];

/// Classification of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Click,
    PointerMove,
    Scroll,
    StructuralMutation,
    CosmeticMutation,
    PageMeta,
    Snapshot,
    Other,
}

impl EventClass {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            EventClass::StructuralMutation | EventClass::CosmeticMutation
        )
    }

    /// Click-like or scroll; resets the inactivity cutoff
    pub fn is_user_interaction(&self) -> bool {
        matches!(self, EventClass::Click | EventClass::Scroll)
    }
}

pub fn is_click(event: &RawEvent) -> bool {
    event.source() == Some(IncrementalSource::MouseInteraction)
}

pub fn is_pointer_move(event: &RawEvent) -> bool {
    matches!(
        event.source(),
        Some(IncrementalSource::MouseMove) | Some(IncrementalSource::TouchMove)
    )
}

pub fn is_scroll(event: &RawEvent) -> bool {
    event.source() == Some(IncrementalSource::Scroll)
}

pub fn is_structural_mutation(event: &RawEvent) -> bool {
    event.source() == Some(IncrementalSource::Mutation) && !is_cosmetic(event)
}

pub fn is_cosmetic_mutation(event: &RawEvent) -> bool {
    event.source() == Some(IncrementalSource::Mutation) && is_cosmetic(event)
}

pub fn is_page_meta(event: &RawEvent) -> bool {
    event.kind == RawEventType::Meta
}

pub fn is_snapshot(event: &RawEvent) -> bool {
    event.kind == RawEventType::FullSnapshot
}

/// Classify an event; exactly one predicate above holds for the result
pub fn classify(event: &RawEvent) -> EventClass {
    if is_click(event) {
        EventClass::Click
    } else if is_pointer_move(event) {
        EventClass::PointerMove
    } else if is_scroll(event) {
        EventClass::Scroll
    } else if is_structural_mutation(event) {
        EventClass::StructuralMutation
    } else if is_cosmetic_mutation(event) {
        EventClass::CosmeticMutation
    } else if is_page_meta(event) {
        EventClass::PageMeta
    } else if is_snapshot(event) {
        EventClass::Snapshot
    } else {
        EventClass::Other
    }
}

pub fn is_user_interaction(event: &RawEvent) -> bool {
    classify(event).is_user_interaction()
}

/// Mutation payload with no adds, removes or text changes and only cosmetic
/// attribute changes. An entirely empty mutation counts as cosmetic.
pub fn is_cosmetic(event: &RawEvent) -> bool {
    let empty = |key: &str| {
        event
            .data
            .get(key)
            .and_then(Value::as_array)
            .map_or(true, |items| items.is_empty())
    };

    if !empty("adds") || !empty("removes") || !empty("texts") {
        return false;
    }

    let attributes = match event.data.get("attributes").and_then(Value::as_array) {
        Some(attributes) => attributes,
        None => return true,
    };

    attributes.iter().all(|change| {
        change
            .get("attributes")
            .and_then(Value::as_object)
            .map_or(true, |names| {
                names
                    .keys()
                    .all(|name| COSMETIC_ATTRIBUTES.contains(&name.as_str()))
            })
    })
}

/// `href` carried by a meta event
pub fn meta_href(event: &RawEvent) -> Option<String> {
    if !is_page_meta(event) {
        return None;
    }

    event
        .data
        .get("href")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Attach selector, path, leaf text and element-relative position to a click
pub fn enrich_click<N: NodeLookup + ?Sized>(
    event: &mut RawEvent,
    nodes: &N,
    resolver: &dyn SelectorResolver,
    page: &dyn PageContext,
) {
    let node = event.node_id().and_then(|id| nodes.node(id));

    let selector = node
        .as_ref()
        .map(|node| resolver.selector(node))
        .unwrap_or_else(|| FALLBACK_SELECTOR.to_string());

    let x = event.data.get("x").and_then(Value::as_f64);
    let y = event.data.get("y").and_then(Value::as_f64);

    event.data.insert("selector".to_string(), json!(selector));
    event.data.insert("href".to_string(), json!(page.pathname()));

    if let Some(node) = node {
        if let Some(text) = leaf_text(&node) {
            event.data.insert("text".to_string(), json!(text));
        }

        if let (Some(x), Some(y)) = (x, y) {
            event.data.insert(
                "relativeToElementX".to_string(),
                json!((x - node.bounding_box.x).round()),
            );
            event.data.insert(
                "relativeToElementY".to_string(),
                json!((y - node.bounding_box.y).round()),
            );
        }
    }
}

pub fn enrich_scroll(event: &mut RawEvent, page: &dyn PageContext) {
    event.data.insert("href".to_string(), json!(page.pathname()));
}

/// Attach the path and scroll-adjusted absolute coordinates to each position
pub fn enrich_pointer_move(event: &mut RawEvent, page: &dyn PageContext) {
    let (scroll_x, scroll_y) = page.scroll_offset();

    if let Some(positions) = event
        .data
        .get_mut("positions")
        .and_then(Value::as_array_mut)
    {
        for position in positions.iter_mut().filter_map(Value::as_object_mut) {
            let x = position.get("x").and_then(Value::as_f64);
            let y = position.get("y").and_then(Value::as_f64);

            if let (Some(x), Some(y)) = (x, y) {
                position.insert("absoluteX".to_string(), json!(x + scroll_x));
                position.insert("absoluteY".to_string(), json!(y + scroll_y));
            }
        }
    }

    event.data.insert("href".to_string(), json!(page.pathname()));
}

/// Apply the enrichment for `class`; other classes pass through untouched
pub fn enrich<N: NodeLookup + ?Sized>(
    class: EventClass,
    event: &mut RawEvent,
    nodes: &N,
    resolver: &dyn SelectorResolver,
    page: &dyn PageContext,
) {
    match class {
        EventClass::Click => enrich_click(event, nodes, resolver, page),
        EventClass::Scroll => enrich_scroll(event, page),
        EventClass::PointerMove => enrich_pointer_move(event, page),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::selector::{ChildKind, CssPathResolver, ElementStep, NodeSnapshot, Rect};
    use crate::identity::page::{PageState, SharedPage};
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct FakeNodes(HashMap<i64, NodeSnapshot>);

    impl NodeLookup for FakeNodes {
        fn node(&self, id: i64) -> Option<NodeSnapshot> {
            self.0.get(&id).cloned()
        }
    }

    fn incremental(source: u8, data: Value) -> RawEvent {
        let mut event = RawEvent::new(RawEventType::IncrementalSnapshot, data, 0);
        event.data.insert("source".to_string(), json!(source));
        event
    }

    fn predicates(event: &RawEvent) -> [bool; 7] {
        [
            is_click(event),
            is_pointer_move(event),
            is_scroll(event),
            is_structural_mutation(event),
            is_cosmetic_mutation(event),
            is_page_meta(event),
            is_snapshot(event),
        ]
    }

    #[test]
    fn test_classify_sources() {
        assert_eq!(classify(&incremental(2, json!({}))), EventClass::Click);
        assert_eq!(classify(&incremental(1, json!({}))), EventClass::PointerMove);
        assert_eq!(classify(&incremental(6, json!({}))), EventClass::PointerMove);
        assert_eq!(classify(&incremental(3, json!({}))), EventClass::Scroll);
        assert_eq!(classify(&incremental(5, json!({}))), EventClass::Other);
        assert_eq!(
            classify(&RawEvent::new(RawEventType::Meta, json!({ "href": "/" }), 0)),
            EventClass::PageMeta
        );
        assert_eq!(
            classify(&RawEvent::new(RawEventType::FullSnapshot, json!({}), 0)),
            EventClass::Snapshot
        );
        assert_eq!(
            classify(&RawEvent::new(RawEventType::Load, json!({}), 0)),
            EventClass::Other
        );
    }

    #[test]
    fn test_add_mutation_is_structural() {
        let event = incremental(
            0,
            json!({
                "adds": [{ "parentId": 1, "node": { "id": 10, "tagName": "div" } }],
                "removes": [],
                "texts": [],
                "attributes": [],
            }),
        );

        assert_eq!(classify(&event), EventClass::StructuralMutation);
    }

    #[test]
    fn test_style_mutation_is_cosmetic() {
        let event = incremental(
            0,
            json!({
                "adds": [],
                "removes": [],
                "texts": [],
                "attributes": [
                    { "id": 4, "attributes": { "style": { "top": "10px" } } },
                    { "id": 5, "attributes": { "transform": "scale(2)" } },
                ],
            }),
        );

        assert_eq!(classify(&event), EventClass::CosmeticMutation);
    }

    #[test]
    fn test_mixed_attribute_mutation_is_structural() {
        let event = incremental(
            0,
            json!({
                "attributes": [{ "id": 4, "attributes": { "style": "x", "class": "open" } }],
            }),
        );

        assert_eq!(classify(&event), EventClass::StructuralMutation);
    }

    #[test]
    fn test_empty_mutation_is_cosmetic() {
        assert_eq!(classify(&incremental(0, json!({}))), EventClass::CosmeticMutation);
    }

    #[test]
    fn test_user_interaction() {
        assert!(is_user_interaction(&incremental(2, json!({}))));
        assert!(is_user_interaction(&incremental(3, json!({}))));
        assert!(!is_user_interaction(&incremental(1, json!({}))));
        assert!(!is_user_interaction(&incremental(0, json!({}))));
    }

    #[test]
    fn test_meta_href() {
        let event = RawEvent::new(
            RawEventType::Meta,
            json!({ "href": "http://localhost/pricing", "width": 1024, "height": 768 }),
            0,
        );
        assert_eq!(meta_href(&event).as_deref(), Some("http://localhost/pricing"));
        assert_eq!(meta_href(&incremental(2, json!({ "href": "/" }))), None);
    }

    #[test]
    fn test_enrich_click() {
        let page = SharedPage::new(PageState::from_url("http://localhost/test"));
        let nodes = FakeNodes(HashMap::from([(
            14,
            NodeSnapshot {
                ancestry: vec![
                    ElementStep::new("a"),
                    ElementStep::new("li"),
                    ElementStep::new("ul"),
                    ElementStep::new("menu").with_id("navigation"),
                ],
                first_child: Some(ChildKind::Text),
                has_element_child: false,
                inner_text: "Pricing".to_string(),
                bounding_box: Rect {
                    x: 100.0,
                    y: 40.0,
                    width: 80.0,
                    height: 20.0,
                },
            },
        )]));

        let mut event = incremental(2, json!({ "type": 2, "id": 14, "x": 110, "y": 55 }));
        enrich(classify(&event), &mut event, &nodes, &CssPathResolver, &page);

        assert_eq!(event.data["selector"], json!("menu#navigation > ul > li > a"));
        assert_eq!(event.data["href"], json!("/test"));
        assert_eq!(event.data["text"], json!("Pricing"));
        assert_eq!(event.data["relativeToElementX"], json!(10.0));
        assert_eq!(event.data["relativeToElementY"], json!(15.0));
    }

    #[test]
    fn test_enrich_click_unknown_node() {
        let page = SharedPage::default();
        let nodes = FakeNodes(HashMap::new());

        let mut event = incremental(2, json!({ "type": 2, "id": 99, "x": 1, "y": 1 }));
        enrich_click(&mut event, &nodes, &CssPathResolver, &page);

        assert_eq!(event.data["selector"], json!(FALLBACK_SELECTOR));
        assert_eq!(event.data["href"], json!("/"));
        assert!(event.data.get("text").is_none());
        assert!(event.data.get("relativeToElementX").is_none());
    }

    #[test]
    fn test_enrich_pointer_move() {
        let page = SharedPage::new(PageState::from_url("http://localhost/blog"));
        page.set_scroll_offset(0.0, 300.0);

        let mut event = incremental(
            1,
            json!({ "positions": [{ "x": 10, "y": 20, "id": 3, "timeOffset": -5 }] }),
        );
        enrich_pointer_move(&mut event, &page);

        assert_eq!(event.data["href"], json!("/blog"));
        assert_eq!(event.data["positions"][0]["absoluteX"], json!(10.0));
        assert_eq!(event.data["positions"][0]["absoluteY"], json!(320.0));
    }

    #[test]
    fn test_enrich_scroll() {
        let page = SharedPage::new(PageState::from_url("http://localhost/docs"));
        let mut event = incremental(3, json!({ "id": 1, "x": 0, "y": 400 }));
        enrich(classify(&event), &mut event, &FakeNodes(HashMap::new()), &CssPathResolver, &page);
        assert_eq!(event.data["href"], json!("/docs"));
    }

    fn arbitrary_event() -> impl Strategy<Value = RawEvent> {
        (
            0u8..7,
            0u64..20,
            prop::collection::vec(0u8..3, 0..3),
            prop::collection::vec(prop::sample::select(vec!["style", "transform", "class", "src"]), 0..3),
        )
            .prop_map(|(kind, source, adds, names)| {
                let attributes: serde_json::Map<String, Value> =
                    names.into_iter().map(|name| (name.to_string(), json!("v"))).collect();

                let data = json!({
                    "source": source,
                    "adds": adds,
                    "attributes": [{ "id": 1, "attributes": attributes }],
                });

                let kind = RawEventType::try_from(kind).unwrap();
                RawEvent::new(kind, data, 0)
            })
    }

    proptest! {
        #[test]
        fn prop_classes_are_mutually_exclusive(event in arbitrary_event()) {
            let hits = predicates(&event).iter().filter(|hit| **hit).count();
            prop_assert!(hits <= 1);

            let class = classify(&event);
            prop_assert_eq!(hits == 0, class == EventClass::Other);
        }
    }
}

#![allow(clippy::unwrap_used)]
// Integration tests for `HttpStudySource` and one-shot sessions using wiremock.

use serde_json::json;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gridstudy_core::{
    EquipmentType, FetchOptions, HttpStudySource, NodeId, Session, SessionConfig, StudySource,
};

const STUDY: &str = "11111111-1111-1111-1111-111111111111";
const ROOT_NETWORK: &str = "33333333-3333-3333-3333-333333333333";
const ROOT: &str = "44444444-4444-4444-4444-444444444444";
const CHILD: &str = "55555555-5555-5555-5555-555555555555";

// ── Helpers ─────────────────────────────────────────────────────────

fn config(server: &MockServer) -> SessionConfig {
    let mut config = SessionConfig::new(
        Url::parse(&server.uri()).unwrap(),
        Uuid::parse_str(STUDY).unwrap(),
        Uuid::parse_str(ROOT_NETWORK).unwrap(),
    );
    config.active_types = [EquipmentType::Load].into();
    config.notifications_enabled = false;
    config
}

fn node_path(node: &str, suffix: &str) -> String {
    format!("/v1/studies/{STUDY}/root-networks/{ROOT_NETWORK}/nodes/{node}/{suffix}")
}

fn node_id(raw: &str) -> NodeId {
    raw.parse().unwrap()
}

async fn mount_tree_and_aliases(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/studies/{STUDY}/tree")))
        .and(query_param("rootNetworkUuid", ROOT_NETWORK))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": ROOT,
            "name": "Root",
            "type": "ROOT",
            "children": [{
                "id": CHILD,
                "name": "N1",
                "type": "NETWORK_MODIFICATION",
                "nodeBuildStatus": { "globalBuildStatus": "BUILT_WITH_WARNING" },
                "children": []
            }]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v1/studies/{STUDY}/node-aliases")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": CHILD, "name": "N1", "alias": "variant" },
            { "id": null, "name": null, "alias": "unbound" }
        ])))
        .mount(server)
        .await;
}

async fn mount_loads(server: &MockServer, node: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(node_path(node, "network/elements")))
        .and(query_param("elementType", "LOAD"))
        .and(query_param("infoType", "TAB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ── HttpStudySource ─────────────────────────────────────────────────

#[tokio::test]
async fn test_source_flattens_tree() {
    let server = MockServer::start().await;
    mount_tree_and_aliases(&server).await;
    let source = HttpStudySource::new(config(&server)).unwrap();

    let tree = source.tree().await.unwrap();
    assert_eq!(tree.len(), 2);
    assert!(tree[0].is_root());
    assert!(tree[1].build_status.is_built());
    assert_eq!(tree[1].parent, Some(node_id(ROOT)));

    let aliases = source.node_aliases().await.unwrap();
    assert_eq!(aliases.len(), 2);
    assert!(aliases[0].is_valid());
    assert!(!aliases[1].is_valid());
}

#[tokio::test]
async fn test_source_requests_optional_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(node_path(CHILD, "network/elements")))
        .and(query_param("elementType", "LINE"))
        .and(query_param("loadOptionalFields", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "LINE1", "currentLimits1": { "permanentLimit": 500.0 } },
            { "name": "no id" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    let source = HttpStudySource::new(config(&server)).unwrap();

    let records = source
        .equipments(
            EquipmentType::Line,
            node_id(CHILD),
            FetchOptions {
                optional_fields: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("permanentLimit1"), Some(&json!(500.0)));
}

#[tokio::test]
async fn test_source_substations_equipments() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(node_path(CHILD, "network/all")))
        .and(query_param("substationsIds", "S1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "LOAD": [{ "id": "L1" }],
            "SWITCH": [{ "id": "SW1" }]
        })))
        .mount(&server)
        .await;
    let source = HttpStudySource::new(config(&server)).unwrap();

    let by_type = source
        .substations_equipments(node_id(CHILD), &["S1".to_owned()])
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[&EquipmentType::Load][0].id, "L1");
}

#[tokio::test]
async fn test_source_maps_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/studies/{STUDY}/node-aliases")))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    let source = HttpStudySource::new(config(&server)).unwrap();

    let err = source.node_aliases().await.unwrap_err();
    assert!(matches!(
        err,
        gridstudy_core::CoreError::Api {
            status: Some(500),
            ..
        }
    ));
}

// ── One-shot session ────────────────────────────────────────────────

#[tokio::test]
async fn test_oneshot_loads_selected_and_aliased_nodes() {
    let server = MockServer::start().await;
    mount_tree_and_aliases(&server).await;
    mount_loads(&server, ROOT, json!([{ "id": "L1", "p0": 10.0 }])).await;
    mount_loads(&server, CHILD, json!([{ "id": "L1", "p0": 12.0 }, { "id": "L2" }])).await;

    let state = Session::oneshot(config(&server), Some(node_id(ROOT)), |session| async move {
        Ok(session.snapshot())
    })
    .await
    .unwrap();

    assert_eq!(state.loaded_node_ids().len(), 2);
    let root = state
        .equipments(EquipmentType::Load, &node_id(ROOT))
        .unwrap();
    assert_eq!(root[0].get("p0"), Some(&json!(10.0)));
    let child = state
        .equipments(EquipmentType::Load, &node_id(CHILD))
        .unwrap();
    assert_eq!(child.len(), 2);
}

#[tokio::test]
async fn test_oneshot_tolerates_failing_node() {
    let server = MockServer::start().await;
    mount_tree_and_aliases(&server).await;
    mount_loads(&server, ROOT, json!([{ "id": "L1" }])).await;
    Mock::given(method("GET"))
        .and(path(node_path(CHILD, "network/elements")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let state = Session::oneshot(config(&server), Some(node_id(ROOT)), |session| async move {
        Ok(session.snapshot())
    })
    .await
    .unwrap();

    assert!(state.equipments(EquipmentType::Load, &node_id(ROOT)).is_some());
    assert!(state.equipments(EquipmentType::Load, &node_id(CHILD)).is_none());
    assert!(state.failed_node_ids().contains(&node_id(CHILD)));
}

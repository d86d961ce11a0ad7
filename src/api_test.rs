use super::*;
use crate::condition::SortOrder;

#[test]
fn history_path_carries_encoded_condition() {
    let condition = Condition::new()
        .with_run_id("r1")
        .with_limit(10)
        .with_order("id", SortOrder::Desc);
    let path = history_path(&EventKind::Scalar, "p1", &condition);
    assert_eq!(
        path,
        format!("/scalar/p1/history?condition={}", urlencoding::encode(&condition.to_json()))
    );
    assert!(!path.contains('{'));
}

#[test]
fn project_and_run_paths() {
    assert_eq!(project_path("p1"), "/project/p1");
    assert_eq!(run_path("p1", "r 2"), "/project/p1/run/r%202");
}

#[test]
fn series_path_formats_run_query() {
    assert_eq!(
        series_path("p1", &EventKind::Log, "r1"),
        "/project/p1/series/log?runId=r1"
    );
}

#[test]
fn image_url_joins_api_base() {
    let client = ApiClient::new(&ClientConfig::default()).unwrap();
    assert_eq!(
        client.image_url("p1", 42),
        "http://127.0.0.1:20202/api/project/p1/image/42"
    );
}

#[test]
fn status_error_mentions_code_and_body() {
    let err = ApiError::Status {
        status: 404,
        path: "/project/x".to_owned(),
        body: "no such project".to_owned(),
    };
    assert_eq!(err.to_string(), "HTTP 404 from /project/x: no such project");
}

#[tokio::test]
#[ignore = "requires a running backend at RUNBOARD_BASE_URL"]
async fn live_project_status() {
    let config = ClientConfig::from_env();
    let client = ApiClient::new(&config).unwrap();
    let project = std::env::var("RUNBOARD_PROJECT").unwrap_or_else(|_| "default".to_owned());
    let status = client.project_status(&project).await.unwrap();
    for run in &status.runids {
        assert!(!run.run_id.is_empty());
    }
}
